//! # Saga Rollback
//!
//! Compensates completed steps in strict reverse completion order. Members
//! of one parallel group that completed together are compensated
//! concurrently, but only after every later-completed step has been
//! compensated. A failing compensation is recorded and the traversal moves
//! on; every registered compensation is attempted exactly once.

use super::step_runner::panic_message;
use super::types::{CompletedStep, RollbackError};
use crate::constants::events;
use crate::context::Context;
use crate::events::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::workflow::{StepError, Workflow};
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one rollback traversal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackSummary {
    /// Compensated successfully, in invocation order
    pub rolled_back: Vec<String>,
    pub errors: Vec<RollbackError>,
}

impl RollbackSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs compensations for a failed execution
#[derive(Clone)]
pub struct SagaCoordinator {
    sink: Arc<dyn TelemetrySink>,
}

impl SagaCoordinator {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Compensate `completed` (in completion order) in reverse
    pub async fn rollback(
        &self,
        execution_id: Uuid,
        workflow: &Workflow,
        completed: &[CompletedStep],
        context: Arc<Context>,
        error: &StepError,
    ) -> RollbackSummary {
        let started = Instant::now();
        let batches = rollback_batches(workflow, completed);
        let total: usize = batches.iter().map(Vec::len).sum();

        info!(
            execution_id = %execution_id,
            workflow = workflow.name(),
            compensations = total,
            "↩️ Starting saga rollback"
        );
        self.sink.emit(
            TelemetryEvent::new(events::ROLLBACK_START)
                .meta("execution_id", execution_id.to_string())
                .meta("workflow", workflow.name())
                .meta("error", error.message.clone())
                .measure("steps", total as f64),
        );

        let mut summary = RollbackSummary::default();
        for batch in batches {
            let results = join_all(batch.iter().map(|name| {
                let context = Arc::clone(&context);
                let error = error.clone();
                async move { (name.clone(), compensate(workflow, name, context, error).await) }
            }))
            .await;

            for (step, result) in results {
                match result {
                    Ok(()) => {
                        debug!(execution_id = %execution_id, step = %step, "✅ Step compensated");
                        summary.rolled_back.push(step);
                    }
                    Err(error) => {
                        warn!(execution_id = %execution_id, step = %step, error = %error, "⚠️ Compensation failed");
                        summary.errors.push(RollbackError { step, error });
                    }
                }
            }
        }

        self.sink.emit(
            TelemetryEvent::new(events::ROLLBACK_STOP)
                .meta("execution_id", execution_id.to_string())
                .meta("workflow", workflow.name())
                .measure("rolled_back", summary.rolled_back.len() as f64)
                .measure("errors", summary.errors.len() as f64)
                .measure("duration_ms", started.elapsed().as_secs_f64() * 1000.0),
        );
        info!(
            execution_id = %execution_id,
            rolled_back = summary.rolled_back.len(),
            errors = summary.errors.len(),
            "↩️ Saga rollback finished"
        );
        summary
    }
}

impl Default for SagaCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SagaCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCoordinator").finish_non_exhaustive()
    }
}

async fn compensate(workflow: &Workflow, name: &str, context: Arc<Context>, error: StepError) -> Result<(), StepError> {
    let Some(compensator) = workflow.step(name).and_then(|s| s.compensation()) else {
        return Ok(());
    };
    AssertUnwindSafe(compensator.compensate(context, error))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(StepError::panicked(panic_message(panic.as_ref()))))
}

/// Group compensable steps into sequential batches, latest first.
///
/// Consecutive completions from the same partition that share a group tag
/// form one concurrent batch; everything else is its own batch.
pub fn rollback_batches(workflow: &Workflow, completed: &[CompletedStep]) -> Vec<Vec<String>> {
    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut current_key: Option<(usize, String)> = None;

    for entry in completed.iter().rev() {
        let Some(step) = workflow.step(&entry.name) else {
            continue;
        };
        if !step.has_compensation() {
            continue;
        }

        let key = step.group_name().map(|g| (entry.partition, g.to_string()));
        let joins = key.is_some() && key == current_key;
        match batches.last_mut() {
            Some(batch) if joins => batch.push(entry.name.clone()),
            _ => batches.push(vec![entry.name.clone()]),
        }
        current_key = key;
    }
    batches
}
