//! Shared fixtures for integration tests: a recording journal for step and
//! rollback invocations, and an engine wired to a manual clock.

#![allow(dead_code)]

use parking_lot::Mutex;
use sagaflow::events::MemorySink;
use sagaflow::orchestration::{Execution, ExecutionEngine, ExecutionReport, Redrive};
use sagaflow::persistence::InMemoryStore;
use sagaflow::scheduler::ManualClock;
use sagaflow::workflow::{Step, StepError, StepOutcome, Workflow, WorkflowRegistry};
use sagaflow::SagaflowConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Ordered log of what ran
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries with `prefix`, prefix stripped
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().iter().any(|e| e == entry)
    }
}

/// Step that records `run:<name>`, writes `<name>: true` and rolls back as `rollback:<name>`
pub fn recording_step(name: &str, journal: &Journal) -> Step {
    let run_journal = journal.clone();
    let rollback_journal = journal.clone();
    let step_name = name.to_string();
    let rollback_name = name.to_string();
    Step::from_fn(name, move |_ctx| {
        let journal = run_journal.clone();
        let name = step_name.clone();
        async move {
            journal.record(format!("run:{name}"));
            StepOutcome::ok(json!({ name: true }))
        }
    })
    .rollback(move |_ctx| {
        let journal = rollback_journal.clone();
        let name = rollback_name.clone();
        async move {
            journal.record(format!("rollback:{name}"));
            Ok(())
        }
    })
}

/// Step that records `run:<name>` and fails terminally
pub fn failing_step(name: &str, journal: &Journal) -> Step {
    let journal = journal.clone();
    let step_name = name.to_string();
    Step::from_fn(name, move |_ctx| {
        let journal = journal.clone();
        let name = step_name.clone();
        async move {
            journal.record(format!("run:{name}"));
            StepOutcome::error(StepError::terminal(format!("{name} refused")))
        }
    })
}

pub struct Harness {
    pub registry: Arc<WorkflowRegistry>,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<MemorySink>,
    pub engine: Arc<ExecutionEngine>,
}

impl Harness {
    pub fn new(workflows: Vec<Workflow>) -> Self {
        Self::with_config(workflows, SagaflowConfig::default(), "node-a")
    }

    pub fn with_config(workflows: Vec<Workflow>, config: SagaflowConfig, node_id: &str) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        Self::on_store(workflows, config, node_id, store, clock)
    }

    /// Engine sharing an existing store and clock, as a second node would
    pub fn on_store(
        workflows: Vec<Workflow>,
        config: SagaflowConfig,
        node_id: &str,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    ) -> Self {
        let registry = Arc::new(WorkflowRegistry::new());
        for workflow in workflows {
            registry.register(workflow).expect("unique workflow names");
        }
        let sink = Arc::new(MemorySink::new());
        let engine = Arc::new(
            ExecutionEngine::builder(registry.clone(), store.clone())
                .config(config)
                .node_id(node_id)
                .clock(clock.clone())
                .sink(sink.clone())
                .build(),
        );
        Self {
            registry,
            store,
            clock,
            sink,
            engine,
        }
    }
}

/// Wait for every re-driven execution to settle, in the order given
pub async fn settle_all(redrives: Vec<Redrive>) -> Vec<ExecutionReport> {
    let mut reports = Vec::with_capacity(redrives.len());
    for redrive in redrives {
        reports.push(redrive.join().await.expect("re-driven execution settles"));
    }
    reports
}

/// Poll until no task on `engine` drives the execution and it has left `running`
pub async fn wait_until_settled(engine: &ExecutionEngine, id: Uuid) -> Execution {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let execution = engine.get_execution(id).await.expect("execution exists");
            if !engine.in_flight().contains(&id) && (execution.state.is_terminal() || execution.state.is_paused()) {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("execution settles in time")
}
