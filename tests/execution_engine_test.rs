//! End-to-end execution scenarios against the in-memory store.

mod common;

use common::{failing_step, recording_step, settle_all, Harness, Journal};
use sagaflow::constants::events;
use sagaflow::orchestration::CancelOptions;
use sagaflow::workflow::{AwaitOptions, GroupPolicy, Step, StepError, StepOutcome, Workflow};
use sagaflow::{ExecutionState, RetryPolicy, SagaflowError, StepState};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn quick_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

#[tokio::test]
async fn test_diamond_failure_rolls_back_in_reverse_completion_order() {
    let journal = Journal::new();
    let workflow = Workflow::builder("diamond")
        .step(recording_step("a", &journal))
        .step(recording_step("b", &journal).after(["a"]))
        .step(failing_step("c", &journal).after(["a"]))
        .step(recording_step("d", &journal).after(["b", "c"]))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("diamond", json!({"order": 7})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Failed);
    assert_eq!(journal.with_prefix("rollback:"), vec!["b", "a"]);
    assert!(!journal.contains("run:d"));
    assert!(report.rollback_errors.is_empty());
    assert!(report.cleanly_rolled_back());

    let failure = report.error.expect("failure recorded");
    assert_eq!(failure.step, "c");
    assert_eq!(failure.error.message, "c refused");
    // Terminal failures are surfaced, not dead-lettered
    assert!(report.dead_letter_id.is_none());

    let execution = h.engine.get_execution(report.execution_id).await.unwrap();
    assert_eq!(execution.step_state("a"), StepState::RolledBack);
    assert_eq!(execution.step_state("b"), StepState::RolledBack);
    assert_eq!(execution.step_state("c"), StepState::Failed);
    assert_eq!(execution.step_state("d"), StepState::Pending);
    assert!(execution.locked_by.is_none());

    assert_eq!(h.sink.count(events::EXECUTION_START), 1);
    assert_eq!(h.sink.count(events::EXECUTION_EXCEPTION), 1);
    assert_eq!(h.sink.count(events::ROLLBACK_START), 1);
}

#[tokio::test]
async fn test_partition_steps_see_the_same_snapshot_and_merge_in_declaration_order() {
    let journal = Journal::new();
    let workflow = Workflow::builder("merge")
        .step(recording_step("seed", &journal))
        .step(
            Step::from_fn("left", |ctx| async move {
                let seen = ctx.context.contains("right");
                StepOutcome::ok(json!({"winner": "left", "left_saw_right": seen}))
            })
            .after(["seed"]),
        )
        .step(
            Step::from_fn("right", |ctx| async move {
                let seen = ctx.context.contains("left");
                StepOutcome::ok(json!({"winner": "right", "right_saw_left": seen}))
            })
            .after(["seed"]),
        )
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("merge", json!({})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(report.context.get::<String>("winner").unwrap(), "right");
    assert!(!report.context.get::<bool>("left_saw_right").unwrap());
    assert!(!report.context.get::<bool>("right_saw_left").unwrap());
    assert_eq!(report.completed_steps, vec!["seed", "left", "right"]);
}

#[tokio::test]
async fn test_halt_completes_without_rollback() {
    let journal = Journal::new();
    let workflow = Workflow::builder("halting")
        .step(recording_step("a", &journal))
        .step(Step::from_fn("gate", |_ctx| async { StepOutcome::halt("nothing to ship") }).after(["a"]))
        .step(recording_step("ship", &journal).after(["gate"]))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("halting", json!({})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(report.halt_reason.as_deref(), Some("nothing to ship"));
    assert!(!journal.contains("run:ship"));
    assert!(journal.with_prefix("rollback:").is_empty());
}

#[tokio::test]
async fn test_skipped_steps_keep_dependents_eligible() {
    let journal = Journal::new();
    let workflow = Workflow::builder("conditional")
        .step(recording_step("a", &journal))
        .step(
            recording_step("premium", &journal)
                .after(["a"])
                .when(|ctx| ctx.get::<bool>("premium").unwrap_or(false)),
        )
        .step(Step::from_fn("optional", |_ctx| async { StepOutcome::skip("not needed") }).after(["a"]))
        .step(recording_step("finish", &journal).after(["premium", "optional"]))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("conditional", json!({"premium": false})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert!(report.skipped_steps.contains(&"premium".to_string()));
    assert!(report.skipped_steps.contains(&"optional".to_string()));
    assert!(journal.contains("run:finish"));
    assert!(!journal.contains("run:premium"));
}

#[tokio::test]
async fn test_continue_group_keeps_partial_results() {
    let journal = Journal::new();
    let workflow = Workflow::builder("notify")
        .step(recording_step("order", &journal))
        .step(failing_step("email", &journal).after(["order"]).group("notifications"))
        .step(recording_step("sms", &journal).after(["order"]).group("notifications"))
        .step(recording_step("audit", &journal).after(["email"]))
        .group_policy("notifications", GroupPolicy::Continue)
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("notify", json!({})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(report.step_errors.len(), 1);
    assert_eq!(report.step_errors[0].step, "email");
    assert!(journal.contains("run:sms"));
    // Its dependency failed, so audit never becomes eligible
    assert!(report.skipped_steps.contains(&"audit".to_string()));
    assert!(journal.with_prefix("rollback:").is_empty());
}

#[tokio::test]
async fn test_collect_all_reports_every_sibling_failure() {
    let journal = Journal::new();
    let workflow = Workflow::builder("collect")
        .step(recording_step("a", &journal))
        .step(failing_step("x", &journal).after(["a"]))
        .step(failing_step("y", &journal).after(["a"]))
        .step(recording_step("z", &journal).after(["a"]))
        .default_group_policy(GroupPolicy::CollectAll)
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("collect", json!({})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Failed);
    let failed: Vec<&str> = report.step_errors.iter().map(|f| f.step.as_str()).collect();
    assert_eq!(failed, vec!["x", "y"]);
    assert_eq!(report.error.unwrap().step, "x");
    assert_eq!(journal.with_prefix("rollback:"), vec!["z", "a"]);
}

#[tokio::test]
async fn test_fail_fast_cancels_cooperative_siblings() {
    let journal = Journal::new();
    let slow_journal = journal.clone();
    let workflow = Workflow::builder("fast")
        .step(failing_step("broken", &journal))
        .step(Step::from_fn("slow", move |ctx| {
            let journal = slow_journal.clone();
            async move {
                let token = ctx.cancellation_token().clone();
                tokio::select! {
                    _ = token.cancelled() => StepOutcome::error(StepError::cancelled()),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        journal.record("finished:slow");
                        StepOutcome::done()
                    }
                }
            }
        }))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = tokio::time::timeout(Duration::from_secs(5), h.engine.start("fast", json!({})))
        .await
        .expect("fail-fast does not wait for the slow sibling")
        .unwrap();

    assert_eq!(report.state, ExecutionState::Failed);
    assert!(!journal.contains("finished:slow"));
    let failed: Vec<&str> = report.step_errors.iter().map(|f| f.step.as_str()).collect();
    assert_eq!(failed, vec!["broken"]);
}

#[tokio::test]
async fn test_retries_then_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let workflow = Workflow::builder("flaky")
        .step(
            Step::from_fn("call_api", move |ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt < 3 {
                        StepOutcome::error(StepError::retryable("503"))
                    } else {
                        StepOutcome::ok(json!({"attempt": ctx.attempt}))
                    }
                }
            })
            .retry(quick_retries(5)),
        )
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("flaky", json!({})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.context.get::<u32>("attempt").unwrap(), 3);
    assert_eq!(h.sink.count(events::STEP_RETRY), 2);
    let execution = h.engine.get_execution(report.execution_id).await.unwrap();
    assert_eq!(execution.attempts_for("call_api"), 3);
}

#[tokio::test]
async fn test_fallback_recovers_exhausted_step() {
    let workflow = Workflow::builder("fallback")
        .step(
            Step::from_fn("price", |_ctx| async { StepOutcome::error(StepError::terminal("pricing down")) })
                .fallback(|_ctx, error| StepOutcome::ok(json!({"price": 0, "reason": error.message.clone()}))),
        )
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("fallback", json!({})).await.unwrap();

    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(report.context.get::<String>("reason").unwrap(), "pricing down");
}

#[tokio::test]
async fn test_exhausted_retries_are_dead_lettered_and_retryable() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let journal = Journal::new();
    let workflow = Workflow::builder("payout")
        .step(recording_step("reserve", &journal))
        .step(
            Step::from_fn("transfer", move |_ctx| {
                let flag = flag.clone();
                async move {
                    if flag.load(Ordering::SeqCst) {
                        StepOutcome::done()
                    } else {
                        StepOutcome::error(StepError::retryable("bank unavailable"))
                    }
                }
            })
            .after(["reserve"])
            .retry(quick_retries(2)),
        )
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);
    let input = json!({"amount": 120});

    let report = h.engine.start("payout", input.clone()).await.unwrap();
    assert_eq!(report.state, ExecutionState::Failed);
    assert_eq!(journal.with_prefix("rollback:"), vec!["reserve"]);

    let letter_id = report.dead_letter_id.expect("dead-lettered");
    let letter = h.engine.dead_letters().get(letter_id).await.unwrap();
    assert_eq!(letter.execution_id, report.execution_id);
    assert_eq!(letter.input, input);
    assert_eq!(letter.error.step, "transfer");
    assert_eq!(letter.attempts.get("transfer"), Some(&2));
    assert_eq!(h.sink.count(events::EXECUTION_DEAD_LETTERED), 1);

    healthy.store(true, Ordering::SeqCst);
    let retried = h.engine.retry_dead_letter(letter_id).await.unwrap();
    assert_eq!(retried.state, ExecutionState::Completed);
    assert_ne!(retried.execution_id, report.execution_id);
    assert_eq!(retried.context.get::<u32>("amount").unwrap(), 120);
    assert!(h.engine.dead_letters().list().await.unwrap().is_empty());
    assert!(matches!(
        h.engine.retry_dead_letter(letter_id).await,
        Err(SagaflowError::DeadLetterNotFound(_))
    ));
}

#[tokio::test]
async fn test_snooze_resumes_on_tick_with_context_intact() {
    let journal = Journal::new();
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    let workflow = Workflow::builder("drip")
        .step(recording_step("signup", &journal))
        .step(
            Step::from_fn("wait_a_day", move |ctx| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        StepOutcome::snooze(Duration::from_secs(60))
                    } else {
                        let saw_signup = ctx.context.get::<bool>("signup").unwrap_or(false);
                        StepOutcome::ok(json!({"saw_signup": saw_signup}))
                    }
                }
            })
            .after(["signup"]),
        )
        .step(recording_step("email", &journal).after(["wait_a_day"]))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let paused = h.engine.start("drip", json!({})).await.unwrap();
    assert_eq!(paused.state, ExecutionState::Snoozed);
    let pause = paused.pause.expect("pause info");
    assert_eq!(pause.step, "wait_a_day");
    assert!(pause.resume_at.is_some());
    assert!(!journal.contains("run:email"));

    // Not due yet
    assert!(h.engine.tick().await.unwrap().is_empty());

    h.clock.advance(Duration::from_secs(61));
    let reports = settle_all(h.engine.tick().await.unwrap()).await;
    assert_eq!(reports.len(), 1);
    let done = &reports[0];
    assert_eq!(done.execution_id, paused.execution_id);
    assert_eq!(done.state, ExecutionState::Completed);
    assert!(done.context.get::<bool>("saw_signup").unwrap());
    assert!(journal.contains("run:email"));
    // signup ran once; the snoozing step was the only one re-entered
    assert_eq!(journal.with_prefix("run:"), vec!["signup", "email"]);
    assert_eq!(h.sink.count(events::EXECUTION_PAUSED), 1);
    assert_eq!(h.sink.count(events::EXECUTION_RESUMED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tick_resumes_due_executions_on_their_own_tasks() {
    let napped = Arc::new(parking_lot::Mutex::new(HashSet::new()));
    let workflow = Workflow::builder("nap")
        .step(Step::from_fn("doze", move |ctx| {
            let napped = napped.clone();
            async move {
                if napped.lock().insert(ctx.execution_id) {
                    StepOutcome::snooze(Duration::from_secs(60))
                } else {
                    StepOutcome::done()
                }
            }
        }))
        .step(
            Step::from_fn("crunch", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                StepOutcome::ok(json!({"crunched": true}))
            })
            .after(["doze"]),
        )
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let first = h.engine.start("nap", json!({})).await.unwrap();
    let second = h.engine.start("nap", json!({})).await.unwrap();
    assert_eq!(first.state, ExecutionState::Snoozed);
    assert_eq!(second.state, ExecutionState::Snoozed);

    h.clock.advance(Duration::from_secs(61));
    let began = tokio::time::Instant::now();
    let redrives = h.engine.tick().await.unwrap();
    assert!(began.elapsed() < Duration::from_secs(1));
    assert_eq!(redrives.len(), 2);

    // Claimed executions are not picked up twice
    assert!(h.engine.tick().await.unwrap().is_empty());

    let reports = settle_all(redrives).await;
    assert!(reports.iter().all(|r| r.state == ExecutionState::Completed));
    assert!(reports.iter().all(|r| r.context.get::<bool>("crunched").unwrap()));
    // Both ten-second steps overlapped
    assert!(began.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn test_snooze_does_not_spend_retry_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let workflow = Workflow::builder("poll")
        .step(
            Step::from_fn("check", move |_ctx| {
                let counter = counter.clone();
                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => StepOutcome::snooze(Duration::from_secs(30)),
                        1 => StepOutcome::error(StepError::retryable("upstream busy")),
                        _ => StepOutcome::ok(json!({"ready": true})),
                    }
                }
            })
            .retry(quick_retries(2)),
        )
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let paused = h.engine.start("poll", json!({})).await.unwrap();
    assert_eq!(paused.state, ExecutionState::Snoozed);

    h.clock.advance(Duration::from_secs(31));
    let reports = settle_all(h.engine.tick().await.unwrap()).await;

    assert_eq!(reports[0].state, ExecutionState::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.sink.count(events::STEP_RETRY), 1);
    let execution = h.engine.get_execution(paused.execution_id).await.unwrap();
    assert_eq!(execution.attempts_for("check"), 2);
}

fn approval_workflow(journal: &Journal, timeout: Option<Duration>) -> Workflow {
    Workflow::builder("approval")
        .step(recording_step("draft", journal))
        .step(
            Step::from_fn("approve", move |ctx| async move {
                match ctx.resume_input {
                    Some(input) => StepOutcome::ok(json!({"approved_by": input["by"].clone()})),
                    None => {
                        let mut options = AwaitOptions::new("manager sign-off").with_metadata(json!({"queue": "finance"}));
                        if let Some(limit) = timeout {
                            options = options.with_timeout(limit);
                        }
                        StepOutcome::await_input(options)
                    }
                }
            })
            .after(["draft"]),
        )
        .step(recording_step("publish", journal).after(["approve"]))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_await_resumes_with_caller_input() {
    let journal = Journal::new();
    let h = Harness::new(vec![approval_workflow(&journal, None)]);

    let paused = h.engine.start("approval", json!({})).await.unwrap();
    assert_eq!(paused.state, ExecutionState::AwaitingApproval);
    let pause = paused.pause.clone().unwrap();
    assert_eq!(pause.reason, "manager sign-off");
    assert_eq!(pause.metadata, json!({"queue": "finance"}));
    assert!(h
        .engine
        .checkpoints()
        .load(paused.execution_id, &pause.checkpoint_label)
        .await
        .is_ok());

    let done = h
        .engine
        .resume(paused.execution_id, Some(json!({"by": "ops"})))
        .await
        .unwrap();
    assert_eq!(done.state, ExecutionState::Completed);
    assert_eq!(done.context.get::<String>("approved_by").unwrap(), "ops");
    assert!(journal.contains("run:publish"));

    assert!(matches!(
        h.engine.resume(paused.execution_id, None).await,
        Err(SagaflowError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_await_deadline_fails_and_rolls_back() {
    let journal = Journal::new();
    let h = Harness::new(vec![approval_workflow(&journal, Some(Duration::from_secs(30)))]);

    let paused = h.engine.start("approval", json!({})).await.unwrap();
    assert!(paused.pause.as_ref().unwrap().deadline.is_some());

    h.clock.advance(Duration::from_secs(31));
    let reports = settle_all(h.engine.tick().await.unwrap()).await;
    assert_eq!(reports.len(), 1);
    let failed = &reports[0];
    assert_eq!(failed.state, ExecutionState::Failed);
    let failure = failed.error.as_ref().unwrap();
    assert_eq!(failure.step, "approve");
    assert_eq!(failure.error.code.as_deref(), Some("await_timeout"));
    assert_eq!(journal.with_prefix("rollback:"), vec!["draft"]);
}

#[tokio::test]
async fn test_cancel_paused_execution_with_rollback() {
    let journal = Journal::new();
    let h = Harness::new(vec![approval_workflow(&journal, None)]);

    let paused = h.engine.start("approval", json!({})).await.unwrap();
    let cancelled = h
        .engine
        .cancel(paused.execution_id, CancelOptions::with_rollback())
        .await
        .unwrap();

    assert_eq!(cancelled.state, ExecutionState::Cancelled);
    assert!(cancelled.pause.is_none());
    assert_eq!(journal.with_prefix("rollback:"), vec!["draft"]);
    assert_eq!(h.sink.count(events::EXECUTION_CANCELLED), 1);

    assert!(matches!(
        h.engine.cancel(paused.execution_id, CancelOptions::default()).await,
        Err(SagaflowError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_cancel_running_execution_stops_after_partition() {
    let journal = Journal::new();
    let started = Arc::new(Notify::new());
    let signal = started.clone();
    let workflow = Workflow::builder("long")
        .step(recording_step("prepare", &journal))
        .step(
            Step::from_fn("crunch", move |ctx| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    let token = ctx.cancellation_token().clone();
                    tokio::select! {
                        _ = token.cancelled() => StepOutcome::error(StepError::cancelled()),
                        _ = tokio::time::sleep(Duration::from_secs(30)) => StepOutcome::done(),
                    }
                }
            })
            .after(["prepare"]),
        )
        .step(recording_step("report", &journal).after(["crunch"]))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let (id, handle) = h.engine.submit("long", json!({})).await.unwrap();
    started.notified().await;
    assert_eq!(h.engine.in_flight(), vec![id]);

    let snapshot = h.engine.cancel(id, CancelOptions::with_rollback()).await.unwrap();
    assert_eq!(snapshot.execution_id, id);

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("drive finishes promptly")
        .expect("task joins")
        .unwrap();
    assert_eq!(report.state, ExecutionState::Cancelled);
    assert_eq!(journal.with_prefix("rollback:"), vec!["prepare"]);
    assert!(!journal.contains("run:report"));
    assert!(h.engine.in_flight().is_empty());
}

#[tokio::test]
async fn test_total_timeout_fails_execution() {
    let journal = Journal::new();
    let workflow = Workflow::builder("bounded")
        .step(recording_step("a", &journal))
        .step(
            Step::from_fn("stuck", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StepOutcome::done()
            })
            .after(["a"]),
        )
        .total_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = tokio::time::timeout(Duration::from_secs(5), h.engine.start("bounded", json!({})))
        .await
        .expect("total timeout bounds the run")
        .unwrap();

    assert_eq!(report.state, ExecutionState::Failed);
    let failure = report.error.unwrap();
    assert_eq!(failure.error.code.as_deref(), Some("workflow_timeout"));
    assert_eq!(journal.with_prefix("rollback:"), vec!["a"]);
}

#[tokio::test]
async fn test_checkpoint_label_snapshots_progress() {
    let journal = Journal::new();
    let workflow = Workflow::builder("ledger")
        .step(recording_step("debit", &journal).checkpoint("after_debit"))
        .step(recording_step("credit", &journal).after(["debit"]))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    let report = h.engine.start("ledger", json!({})).await.unwrap();
    let checkpoint = h
        .engine
        .checkpoints()
        .load(report.execution_id, "after_debit")
        .await
        .unwrap();

    assert!(checkpoint.context.contains("debit"));
    assert!(!checkpoint.context.contains("credit"));
    assert_eq!(checkpoint.completed_steps.len(), 1);
    assert!(matches!(
        h.engine.checkpoints().load(report.execution_id, "missing").await,
        Err(SagaflowError::CheckpointNotFound { .. })
    ));
}

#[tokio::test]
async fn test_ensure_hooks_run_on_every_terminal_state() {
    let journal = Journal::new();
    let hook_journal = journal.clone();
    let workflow = Workflow::builder("ensured")
        .step(failing_step("only", &journal))
        .ensure(move |_ctx, state| hook_journal.record(format!("ensure:{state}")))
        .build()
        .unwrap();
    let h = Harness::new(vec![workflow]);

    h.engine.start("ensured", json!({})).await.unwrap();

    assert_eq!(journal.with_prefix("ensure:"), vec!["failed"]);
}

#[tokio::test]
async fn test_unknown_workflow_and_execution() {
    let h = Harness::new(Vec::new());
    assert!(matches!(
        h.engine.start("nope", json!({})).await,
        Err(SagaflowError::WorkflowNotFound(_))
    ));
    assert!(matches!(
        h.engine.report(uuid::Uuid::new_v4()).await,
        Err(SagaflowError::ExecutionNotFound(_))
    ));
}
