//! # Scheduler Front-end
//!
//! Thin driver that turns due triggers into engine executions. Only the
//! current leader fires: every tick re-checks the lease and validates its
//! fencing term against the store before anything is submitted, so a node
//! whose lease was taken over stays silent even before it notices.
//!
//! A leader tick also hands due snoozes and awaits back to the engine, runs
//! the lifeline scan and re-drives rescued executions.

use super::clock::{Clock, SystemClock};
use super::cron::{CronEvaluator, CronerEvaluator};
use super::trigger::Trigger;
use crate::config::SagaflowConfig;
use crate::constants::events;
use crate::coordination::{LeaderElector, Lifeline};
use crate::error::{Result, SagaflowError};
use crate::events::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::orchestration::ExecutionEngine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TriggerEntry {
    trigger: Trigger,
    next_fire: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
}

/// Registered trigger with its schedule position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerStatus {
    pub trigger: Trigger,
    pub next_fire: DateTime<Utc>,
    pub last_fired: Option<DateTime<Utc>>,
}

/// One trigger firing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredTrigger {
    pub trigger: String,
    pub workflow: String,
    pub execution_id: Uuid,
}

/// Outcome of a scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Set when this node was not the fenced leader and did nothing
    pub refused: bool,
    pub fired: Vec<FiredTrigger>,
    /// Snoozed or awaiting executions handed back to the engine
    pub resumed: Vec<Uuid>,
    pub rescued: Vec<Uuid>,
    /// Rescued executions now running on this node
    pub redriven: Vec<Uuid>,
    pub pruned_dead_letters: usize,
}

/// Cron/interval trigger driver gated on leadership
pub struct Scheduler {
    engine: Arc<ExecutionEngine>,
    leader: Arc<LeaderElector>,
    lifeline: Option<Arc<Lifeline>>,
    cron: Arc<dyn CronEvaluator>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
    triggers: Mutex<HashMap<String, TriggerEntry>>,
    tick_interval: Duration,
    dead_letter_retention: Option<Duration>,
}

impl Scheduler {
    pub fn new(engine: Arc<ExecutionEngine>, leader: Arc<LeaderElector>) -> Self {
        Self {
            engine,
            leader,
            lifeline: None,
            cron: Arc::new(CronerEvaluator),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NoopSink),
            triggers: Mutex::new(HashMap::new()),
            tick_interval: Duration::from_secs(1),
            dead_letter_retention: None,
        }
    }

    /// Tick interval and dead-letter retention from configuration
    pub fn from_config(engine: Arc<ExecutionEngine>, leader: Arc<LeaderElector>, config: &SagaflowConfig) -> Self {
        let mut scheduler = Self::new(engine, leader).with_tick_interval(config.scheduler.tick_interval());
        if config.dead_letter.enabled {
            scheduler.dead_letter_retention = Some(config.dead_letter.retention());
        }
        scheduler
    }

    pub fn with_lifeline(mut self, lifeline: Arc<Lifeline>) -> Self {
        self.lifeline = Some(lifeline);
        self
    }

    pub fn with_cron(mut self, cron: Arc<dyn CronEvaluator>) -> Self {
        self.cron = cron;
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

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_dead_letter_retention(mut self, retention: Duration) -> Self {
        self.dead_letter_retention = Some(retention);
        self
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn leader(&self) -> &Arc<LeaderElector> {
        &self.leader
    }

    /// Register or replace a trigger; its first fire is computed from now
    pub fn add_trigger(&self, trigger: Trigger) -> Result<DateTime<Utc>> {
        if !self.engine.registry().contains(&trigger.workflow) {
            return Err(SagaflowError::WorkflowNotFound(trigger.workflow.clone()));
        }
        let next_fire = trigger.schedule.next_after(self.cron.as_ref(), self.clock.now())?;
        info!(
            trigger = %trigger.name,
            workflow = %trigger.workflow,
            next_fire = %next_fire,
            "⏰ Trigger registered"
        );
        self.triggers.lock().insert(
            trigger.name.clone(),
            TriggerEntry {
                trigger,
                next_fire,
                last_fired: None,
            },
        );
        Ok(next_fire)
    }

    pub fn remove_trigger(&self, name: &str) -> Option<Trigger> {
        self.triggers.lock().remove(name).map(|entry| entry.trigger)
    }

    /// Registered triggers, soonest first
    pub fn triggers(&self) -> Vec<TriggerStatus> {
        let mut statuses: Vec<TriggerStatus> = self
            .triggers
            .lock()
            .values()
            .map(|entry| TriggerStatus {
                trigger: entry.trigger.clone(),
                next_fire: entry.next_fire,
                last_fired: entry.last_fired,
            })
            .collect();
        statuses.sort_by(|a, b| a.next_fire.cmp(&b.next_fire).then_with(|| a.trigger.name.cmp(&b.trigger.name)));
        statuses
    }

    /// Fire a trigger now, out of schedule. Refused unless this node is the fenced leader.
    pub async fn fire(&self, name: &str) -> Result<Uuid> {
        let term = self.leader.ensure_leader().await?;
        let trigger = self
            .triggers
            .lock()
            .get(name)
            .map(|entry| entry.trigger.clone())
            .ok_or_else(|| SagaflowError::InvalidState(format!("no trigger named '{name}'")))?;
        let fired = self.submit(&trigger, term).await?;
        if let Some(entry) = self.triggers.lock().get_mut(name) {
            entry.last_fired = Some(self.clock.now());
        }
        Ok(fired.execution_id)
    }

    /// One scheduling round
    pub async fn tick(&self) -> Result<TickReport> {
        let Some(term) = self.leader.fencing_token() else {
            debug!(node_id = %self.leader.node_id(), "💤 Not leader, skipping scheduler tick");
            return Ok(TickReport {
                refused: true,
                ..Default::default()
            });
        };
        if !self.leader.validate(term).await? {
            warn!(node_id = %self.leader.node_id(), term = term, "🚫 Stale fencing term, skipping scheduler tick");
            return Ok(TickReport {
                refused: true,
                ..Default::default()
            });
        }

        let mut report = TickReport::default();
        let now = self.clock.now();

        for trigger in self.take_due(now) {
            match self.submit(&trigger, term).await {
                Ok(fired) => report.fired.push(fired),
                Err(e) => warn!(trigger = %trigger.name, error = %e, "⚠️ Trigger could not start its workflow"),
            }
        }

        // Re-driven executions run on their own tasks; the tick does not wait for them
        report.resumed = self.engine.tick().await?.into_iter().map(|r| r.execution_id).collect();

        if let Some(lifeline) = &self.lifeline {
            report.rescued = lifeline.scan().await?;
        }
        report.redriven = self
            .engine
            .resume_rescued()
            .await?
            .into_iter()
            .map(|r| r.execution_id)
            .collect();

        if let Some(retention) = self.dead_letter_retention {
            report.pruned_dead_letters = self.engine.dead_letters().prune(retention).await?;
        }

        if !report.fired.is_empty() {
            info!(
                node_id = %self.leader.node_id(),
                term = term,
                fired = report.fired.len(),
                "⏰ Scheduler tick fired triggers"
            );
        }
        Ok(report)
    }

    /// Tick every tick interval until `shutdown`
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "⚠️ Scheduler tick failed");
                    }
                }
            }
        }
        info!(node_id = %self.leader.node_id(), "🛑 Scheduler stopped");
    }

    /// Due, enabled triggers in descending priority; their next fire is advanced past `now`
    fn take_due(&self, now: DateTime<Utc>) -> Vec<Trigger> {
        let mut triggers = self.triggers.lock();
        let mut due: Vec<&mut TriggerEntry> = triggers
            .values_mut()
            .filter(|entry| entry.trigger.enabled && entry.next_fire <= now)
            .collect();
        due.sort_by(|a, b| {
            b.trigger
                .priority
                .cmp(&a.trigger.priority)
                .then_with(|| a.next_fire.cmp(&b.next_fire))
                .then_with(|| a.trigger.name.cmp(&b.trigger.name))
        });

        let mut fired = Vec::with_capacity(due.len());
        for entry in due {
            match entry.trigger.schedule.next_after(self.cron.as_ref(), now) {
                Ok(next) => entry.next_fire = next,
                Err(e) => {
                    warn!(trigger = %entry.trigger.name, error = %e, "⚠️ Trigger schedule exhausted, disabling");
                    entry.trigger.enabled = false;
                }
            }
            entry.last_fired = Some(now);
            fired.push(entry.trigger.clone());
        }
        fired
    }

    async fn submit(&self, trigger: &Trigger, term: u64) -> Result<FiredTrigger> {
        let (execution_id, _handle) = self.engine.submit(&trigger.workflow, trigger.input.clone()).await?;
        debug!(
            trigger = %trigger.name,
            workflow = %trigger.workflow,
            execution_id = %execution_id,
            term = term,
            "🚀 Trigger fired"
        );
        self.sink.emit(
            TelemetryEvent::new(events::TRIGGER_FIRED)
                .meta("trigger", trigger.name.clone())
                .meta("workflow", trigger.workflow.clone())
                .meta("execution_id", execution_id.to_string())
                .measure("priority", f64::from(trigger.priority))
                .measure("term", term as f64),
        );
        Ok(FiredTrigger {
            trigger: trigger.name.clone(),
            workflow: trigger.workflow.clone(),
            execution_id,
        })
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("node_id", &self.leader.node_id())
            .field("triggers", &self.triggers.lock().len())
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::persistence::InMemoryStore;
    use crate::scheduler::clock::ManualClock;
    use crate::scheduler::trigger::Schedule;
    use crate::workflow::{Step, StepOutcome, Workflow, WorkflowRegistry};
    use serde_json::json;

    struct Fixture {
        clock: Arc<ManualClock>,
        sink: Arc<MemorySink>,
        leader: Arc<LeaderElector>,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let registry = Arc::new(WorkflowRegistry::new());
        registry
            .register(
                Workflow::builder("noop")
                    .step(Step::from_fn("only", |_ctx| async { StepOutcome::done() }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let engine = Arc::new(
            ExecutionEngine::builder(registry, store.clone())
                .node_id("a")
                .clock(clock.clone())
                .build(),
        );
        let leader = Arc::new(
            LeaderElector::new(store, "a")
                .with_lease_ttl(Duration::from_secs(10))
                .with_renew_interval(Duration::from_secs(3))
                .with_clock(clock.clone()),
        );
        let sink = Arc::new(MemorySink::new());
        let scheduler = Scheduler::new(engine, leader.clone())
            .with_clock(clock.clone())
            .with_sink(sink.clone());
        Fixture {
            clock,
            sink,
            leader,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_rejected() {
        let f = fixture();
        let result = f
            .scheduler
            .add_trigger(Trigger::new("t", "missing", Schedule::every(Duration::from_secs(5))));
        assert!(matches!(result, Err(SagaflowError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn test_standby_refuses_to_fire() {
        let f = fixture();
        f.scheduler
            .add_trigger(Trigger::new("t", "noop", Schedule::every(Duration::from_secs(5))))
            .unwrap();
        f.clock.advance(Duration::from_secs(6));

        let report = f.scheduler.tick().await.unwrap();
        assert!(report.refused);
        assert!(report.fired.is_empty());
        assert!(matches!(f.scheduler.fire("t").await, Err(SagaflowError::NotLeader(_))));
    }

    #[tokio::test]
    async fn test_due_triggers_fire_by_priority() {
        let f = fixture();
        assert!(f.leader.try_acquire().await.unwrap());
        f.scheduler
            .add_trigger(Trigger::new("low", "noop", Schedule::every(Duration::from_secs(5))).with_priority(1))
            .unwrap();
        f.scheduler
            .add_trigger(
                Trigger::new("high", "noop", Schedule::every(Duration::from_secs(5)))
                    .with_priority(9)
                    .with_input(json!({"source": "cron"})),
            )
            .unwrap();
        f.scheduler
            .add_trigger(Trigger::new("off", "noop", Schedule::every(Duration::from_secs(5))).disabled())
            .unwrap();

        assert!(f.scheduler.tick().await.unwrap().fired.is_empty());

        f.clock.advance(Duration::from_secs(5));
        let report = f.scheduler.tick().await.unwrap();
        let order: Vec<&str> = report.fired.iter().map(|fired| fired.trigger.as_str()).collect();
        assert_eq!(order, vec!["high", "low"]);
        assert_eq!(f.sink.count(events::TRIGGER_FIRED), 2);

        // Advanced past now, so the same tick time does not fire again
        assert!(f.scheduler.tick().await.unwrap().fired.is_empty());
        let statuses = f.scheduler.triggers();
        assert!(statuses
            .iter()
            .filter(|s| s.trigger.enabled)
            .all(|s| s.next_fire > f.clock.now() && s.last_fired.is_some()));
    }
}
