//! Leader election, scheduler fencing and lifeline rescue across two nodes
//! sharing one store.

mod common;

use common::{recording_step, settle_all, wait_until_settled, Harness, Journal};
use sagaflow::constants::events;
use sagaflow::coordination::{LeaderElector, Lifeline};
use sagaflow::persistence::PersistenceStore;
use sagaflow::scheduler::{Clock, Schedule, Scheduler, Trigger};
use sagaflow::workflow::{Step, StepOutcome, Workflow};
use sagaflow::{ExecutionState, SagaflowConfig, SagaflowError};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

fn elector(h: &Harness, node: &str) -> Arc<LeaderElector> {
    Arc::new(
        LeaderElector::new(h.store.clone(), node)
            .with_cluster_key("billing")
            .with_lease_ttl(Duration::from_secs(10))
            .with_renew_interval(Duration::from_secs(3))
            .with_clock(h.clock.clone()),
    )
}

fn nightly() -> Workflow {
    Workflow::builder("nightly")
        .step(Step::from_fn("report", |_ctx| async { StepOutcome::done() }))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_expired_lease_moves_scheduling_to_the_standby() {
    let node_a = Harness::new(vec![nightly()]);
    let node_b = Harness::on_store(
        vec![nightly()],
        SagaflowConfig::default(),
        "node-b",
        node_a.store.clone(),
        node_a.clock.clone(),
    );
    let leader_a = elector(&node_a, "node-a");
    let leader_b = elector(&node_b, "node-b");
    let scheduler_a = Scheduler::new(node_a.engine.clone(), leader_a.clone())
        .with_clock(node_a.clock.clone())
        .with_sink(node_a.sink.clone());
    let scheduler_b = Scheduler::new(node_b.engine.clone(), leader_b.clone())
        .with_clock(node_b.clock.clone())
        .with_sink(node_b.sink.clone());

    let every_five = || Trigger::new("nightly", "nightly", Schedule::every(Duration::from_secs(5)));
    scheduler_a.add_trigger(every_five()).unwrap();
    scheduler_b.add_trigger(every_five()).unwrap();

    assert!(leader_a.try_acquire().await.unwrap());
    assert!(!leader_b.try_acquire().await.unwrap());

    node_a.clock.advance(Duration::from_secs(6));
    assert_eq!(scheduler_a.tick().await.unwrap().fired.len(), 1);
    assert!(scheduler_b.tick().await.unwrap().refused);

    // A stops renewing; B claims the lease once it has expired
    node_a.clock.advance(Duration::from_secs(11));
    assert!(leader_b.try_acquire().await.unwrap());
    assert_eq!(leader_b.fencing_token(), Some(2));

    let on_a = scheduler_a.tick().await.unwrap();
    assert!(on_a.refused);
    assert!(on_a.fired.is_empty());
    let refused = assert_err!(scheduler_a.fire("nightly").await);
    assert!(matches!(refused, SagaflowError::NotLeader(_)));

    let on_b = scheduler_b.tick().await.unwrap();
    assert!(!on_b.refused);
    assert_eq!(on_b.fired.len(), 1);

    assert_eq!(node_a.sink.count(events::TRIGGER_FIRED), 1);
    assert_eq!(node_b.sink.count(events::TRIGGER_FIRED), 1);

    // A only fires again after winning a fresh lease
    leader_b.resign().await.unwrap();
    assert!(leader_a.try_acquire().await.unwrap());
    assert_eq!(leader_a.fencing_token(), Some(3));
    assert_ok!(scheduler_a.fire("nightly").await);
}

#[tokio::test]
async fn test_cron_trigger_fires_on_schedule() {
    let h = Harness::new(vec![nightly()]);
    let leader = elector(&h, "node-a");
    let scheduler = Scheduler::new(h.engine.clone(), leader.clone()).with_clock(h.clock.clone());
    assert!(leader.try_acquire().await.unwrap());

    let next = scheduler
        .add_trigger(Trigger::new("quarter", "nightly", Schedule::cron("*/15 * * * *")))
        .unwrap();
    assert!(next > h.clock.now());
    assert!(scheduler.tick().await.unwrap().fired.is_empty());

    h.clock.set(next);
    // Keep the lease alive across the jump
    assert!(leader.try_acquire().await.unwrap());
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.fired.len(), 1);
    assert_eq!(scheduler.triggers()[0].next_fire, next + chrono::Duration::minutes(15));
}

#[tokio::test]
async fn test_stale_execution_is_rescued_and_redriven_by_another_node() {
    let journal = Journal::new();
    let gate = Arc::new(Notify::new());
    let started = Arc::new(Notify::new());
    let runs = Arc::new(AtomicU32::new(0));

    let build = |journal: &Journal| {
        let gate = gate.clone();
        let started = started.clone();
        let runs = runs.clone();
        Workflow::builder("import")
            .step(
                Step::from_fn("fetch", move |_ctx| {
                    let gate = gate.clone();
                    let started = started.clone();
                    let runs = runs.clone();
                    async move {
                        if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                            started.notify_one();
                            gate.notified().await;
                        }
                        StepOutcome::ok(json!({"rows": 3}))
                    }
                })
                .checkpoint("fetched"),
            )
            .step(recording_step("load", journal).after(["fetch"]))
            .build()
            .unwrap()
    };

    let node_a = Harness::new(vec![build(&journal)]);
    let node_b = Harness::on_store(
        vec![build(&journal)],
        SagaflowConfig::default(),
        "node-b",
        node_a.store.clone(),
        node_a.clock.clone(),
    );
    let lifeline = Lifeline::new(node_b.store.clone())
        .with_rescue_after(Duration::from_secs(30))
        .with_clock(node_b.clock.clone())
        .with_sink(node_b.sink.clone());

    let (id, handle) = node_a.engine.submit("import", json!({})).await.unwrap();
    started.notified().await;

    // Node A goes silent while its step is running
    node_a.clock.advance(Duration::from_secs(45));
    assert_eq!(lifeline.scan().await.unwrap(), vec![id]);
    assert_eq!(
        node_b.engine.get_execution(id).await.unwrap().state,
        ExecutionState::Rescued
    );

    // When A wakes up its heartbeat is refused and it abandons the run
    gate.notify_one();
    let abandoned = handle.await.expect("task joins");
    assert!(matches!(abandoned, Err(SagaflowError::LockLost { .. })));
    assert!(!journal.contains("run:load"));

    let reports = settle_all(node_b.engine.resume_rescued().await.unwrap()).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].execution_id, id);
    assert_eq!(reports[0].state, ExecutionState::Completed);
    assert_eq!(reports[0].context.get::<u32>("rows").unwrap(), 3);
    assert_eq!(journal.with_prefix("run:"), vec!["load"]);
    assert_eq!(node_b.sink.count(events::LIFELINE_RESCUED), 1);
}

#[tokio::test]
async fn test_leader_tick_runs_lifeline_and_redrives() {
    let journal = Journal::new();
    let workflow = Workflow::builder("simple")
        .step(recording_step("only", &journal))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);
    let leader = elector(&h, "node-a");
    let lifeline = Arc::new(
        Lifeline::new(h.store.clone())
            .with_rescue_after(Duration::from_secs(30))
            .with_clock(h.clock.clone()),
    );
    let scheduler = Scheduler::new(h.engine.clone(), leader.clone())
        .with_clock(h.clock.clone())
        .with_lifeline(lifeline);

    // An execution abandoned by a node that crashed before running anything
    let mut orphan = sagaflow::Execution::new("simple", json!({}), sagaflow::Context::new());
    orphan.state = ExecutionState::Running;
    orphan.locked_by = Some("crashed-node".to_string());
    orphan.heartbeat_at = Some(h.clock.now());
    orphan.started_at = Some(h.clock.now());
    h.store.save_execution(&orphan).await.unwrap();

    h.clock.advance(Duration::from_secs(31));
    assert!(leader.try_acquire().await.unwrap());
    let report = scheduler.tick().await.unwrap();

    assert_eq!(report.rescued, vec![orphan.id]);
    assert_eq!(report.redriven, vec![orphan.id]);
    assert_eq!(
        wait_until_settled(&h.engine, orphan.id).await.state,
        ExecutionState::Completed
    );
    assert!(journal.contains("run:only"));
}
