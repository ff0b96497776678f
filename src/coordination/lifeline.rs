//! # Lifeline
//!
//! Finds running executions whose per-execution heartbeat has gone stale,
//! snapshots them to a rescue checkpoint, marks them `rescued` and releases
//! their lock. The original driver, if it is still alive, sees its next
//! heartbeat refused and stops; the leader re-drives the execution through
//! [`ExecutionEngine::resume_rescued`](crate::orchestration::ExecutionEngine::resume_rescued).

use crate::checkpoint::CheckpointStore;
use crate::config::LifelineSettings;
use crate::constants::{events, system};
use crate::error::Result;
use crate::events::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::orchestration::Execution;
use crate::persistence::PersistenceStore;
use crate::scheduler::clock::{to_chrono, Clock, SystemClock};
use crate::state_machine::ExecutionState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stale-execution detector
pub struct Lifeline {
    store: Arc<dyn PersistenceStore>,
    checkpoints: CheckpointStore,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
    rescue_after: Duration,
    scan_interval: Duration,
    enabled: bool,
}

impl Lifeline {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self::from_settings(store, &LifelineSettings::default())
    }

    pub fn from_settings(store: Arc<dyn PersistenceStore>, settings: &LifelineSettings) -> Self {
        Self {
            checkpoints: CheckpointStore::new(Arc::clone(&store)),
            store,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NoopSink),
            rescue_after: settings.rescue_after(),
            scan_interval: settings.scan_interval(),
            enabled: settings.enabled,
        }
    }

    pub fn with_rescue_after(mut self, rescue_after: Duration) -> Self {
        self.rescue_after = rescue_after;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether an execution's heartbeat is older than `rescue_after` at `now`
    pub fn is_stale(&self, execution: &Execution, now: DateTime<Utc>) -> bool {
        execution.last_seen() < self.stale_before(now)
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(to_chrono(self.rescue_after)).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Rescue every stale running execution; returns their ids
    pub async fn scan(&self) -> Result<Vec<Uuid>> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let running = self.store.list_executions(&[ExecutionState::Running]).await?;
        debug!(candidates = running.len(), "🩺 Lifeline scan");

        let mut rescued = Vec::new();
        for execution in running.into_iter().filter(|e| self.is_stale(e, now)) {
            let id = execution.id;
            match self.rescue(execution, now).await {
                Ok(true) => rescued.push(id),
                Ok(false) => debug!(execution_id = %id, "💓 Execution heartbeat resumed before rescue"),
                Err(e) => warn!(execution_id = %id, error = %e, "⚠️ Lifeline could not rescue execution"),
            }
        }

        if !rescued.is_empty() {
            info!(rescued = rescued.len(), "🛟 Lifeline rescued stale executions");
        }
        Ok(rescued)
    }

    /// `false` when the store no longer considers the execution stale
    async fn rescue(&self, seen: Execution, now: DateTime<Utc>) -> Result<bool> {
        let Some(execution) = self
            .store
            .rescue_execution(seen.id, self.stale_before(now), now)
            .await?
        else {
            return Ok(false);
        };

        let stale_owner = seen.locked_by;
        let silent_for = (now - execution.last_seen()).num_milliseconds();
        self.checkpoints
            .save(&execution, system::RESCUE_CHECKPOINT_LABEL, now)
            .await?;

        warn!(
            execution_id = %execution.id,
            workflow = %execution.workflow_name,
            stale_owner = ?stale_owner,
            silent_for_ms = silent_for,
            "🛟 Execution rescued"
        );
        self.sink.emit(
            TelemetryEvent::new(events::LIFELINE_RESCUED)
                .meta("execution_id", execution.id.to_string())
                .meta("workflow", execution.workflow_name.clone())
                .meta("stale_owner", stale_owner.unwrap_or_default())
                .measure("silent_for_ms", silent_for as f64),
        );
        Ok(true)
    }

    /// Scan every scan interval until `shutdown`
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.scan_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        warn!(error = %e, "⚠️ Lifeline scan failed");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Lifeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifeline")
            .field("rescue_after", &self.rescue_after)
            .field("scan_interval", &self.scan_interval)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
