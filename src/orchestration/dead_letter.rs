//! Dead-letter queue for executions that failed after exhausting retries.

use super::types::{DeadLetter, Execution, StepFailure};
use crate::constants::events;
use crate::error::{Result, SagaflowError};
use crate::events::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::persistence::PersistenceStore;
use crate::scheduler::clock::{to_chrono, Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Queryable, prunable store of permanently failed executions.
///
/// Retrying a letter needs the engine; see
/// [`ExecutionEngine::retry_dead_letter`](super::ExecutionEngine::retry_dead_letter).
#[derive(Clone)]
pub struct DeadLetterQueue {
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
    enabled: bool,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NoopSink),
            enabled: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a failure belongs in the queue: terminal and cancelled
    /// failures are surfaced immediately instead
    pub fn accepts(&self, failure: &StepFailure) -> bool {
        self.enabled && !failure.error.is_terminal()
    }

    /// Record a failed execution; `None` when the failure is not dead-lettered
    pub async fn record(&self, execution: &Execution, failure: &StepFailure) -> Result<Option<Uuid>> {
        if !self.accepts(failure) {
            return Ok(None);
        }
        let letter = DeadLetter::from_execution(execution, failure.clone(), self.clock.now());
        self.store.save_dead_letter(&letter).await?;

        warn!(
            execution_id = %execution.id,
            workflow = %execution.workflow_name,
            dead_letter_id = %letter.id,
            step = %failure.step,
            "📪 Execution dead-lettered"
        );
        self.sink.emit(
            TelemetryEvent::new(events::EXECUTION_DEAD_LETTERED)
                .meta("execution_id", execution.id.to_string())
                .meta("workflow", execution.workflow_name.clone())
                .meta("dead_letter_id", letter.id.to_string())
                .meta("step", failure.step.clone())
                .measure("attempts", f64::from(execution.total_attempts())),
        );
        Ok(Some(letter.id))
    }

    /// Oldest first
    pub async fn list(&self) -> Result<Vec<DeadLetter>> {
        self.store.list_dead_letters().await
    }

    pub async fn list_for_workflow(&self, workflow_name: &str) -> Result<Vec<DeadLetter>> {
        let letters = self.store.list_dead_letters().await?;
        Ok(letters.into_iter().filter(|l| l.workflow_name == workflow_name).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<DeadLetter> {
        self.store
            .load_dead_letter(id)
            .await?
            .ok_or(SagaflowError::DeadLetterNotFound(id))
    }

    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        self.store.delete_dead_letter(id).await
    }

    /// Delete letters that failed more than `older_than` ago
    pub async fn prune(&self, older_than: Duration) -> Result<usize> {
        let cutoff: DateTime<Utc> = self
            .clock
            .now()
            .checked_sub_signed(to_chrono(older_than))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut pruned = 0;
        for letter in self.store.list_dead_letters().await? {
            if letter.failed_at < cutoff && self.store.delete_dead_letter(letter.id).await? {
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!(pruned = pruned, "🧹 Pruned dead letters");
        }
        Ok(pruned)
    }
}

impl std::fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
