//! # Execution Engine
//!
//! Walks a workflow's partitions in order, running the steps of each
//! partition concurrently on their own tasks and joining them before the
//! next partition starts. Every step of a partition sees the same
//! pre-partition context snapshot; patches merge in declaration order once
//! the partition has settled.
//!
//! After each partition the engine decides, in this order of precedence:
//! cancellation, failure (saga rollback, dead letter), halt, pause
//! (`Await`/`Snooze` checkpoint), or advance.
//!
//! The execution record is heartbeat-stamped through the persistence store
//! before every partition and periodically while one runs. Losing the lock
//! to the lifeline stops the run without rollback; the rescuing leader
//! re-drives it.

use super::dead_letter::DeadLetterQueue;
use super::saga::SagaCoordinator;
use super::step_runner::{StepInvocation, StepRun, StepRunner};
use super::types::{CancelOptions, CompletedStep, Execution, ExecutionReport, PauseInfo, PauseKind, Redrive, StepFailure};
use crate::checkpoint::CheckpointStore;
use crate::config::SagaflowConfig;
use crate::constants::{events, system};
use crate::context::Context;
use crate::dag::Partition;
use crate::error::{Result, SagaflowError};
use crate::events::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::persistence::PersistenceStore;
use crate::resilience::{CircuitBreakerManager, RateLimiter};
use crate::scheduler::clock::{after, Clock, SystemClock};
use crate::state_machine::{transition, ExecutionEvent, ExecutionState, StepState};
use crate::workflow::{GroupPolicy, StepError, StepOutcome, Workflow, WorkflowRegistry};
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// The step a resumed execution re-enters, with the caller's payload
#[derive(Debug, Clone)]
struct ResumeTarget {
    step: String,
    input: Option<Value>,
}

#[derive(Debug, Clone)]
struct InFlight {
    token: CancellationToken,
    cancel: CancelOptions,
}

/// Removes the in-flight entry however the drive ends
struct InFlightGuard<'a> {
    map: &'a DashMap<Uuid, InFlight>,
    id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

/// Raw results of one partition
#[derive(Debug)]
struct PartitionRun {
    /// Declaration order
    runs: Vec<StepRun>,
    timed_out: bool,
    lock_lost: bool,
}

#[derive(Debug)]
enum Verdict {
    Advance,
    Cancelled,
    Failed(StepFailure),
    Halted(String),
    Paused { step: String, outcome: StepOutcome },
    LockLost,
}

/// Drives executions of registered workflows
pub struct ExecutionEngine {
    registry: Arc<WorkflowRegistry>,
    store: Arc<dyn PersistenceStore>,
    checkpoints: CheckpointStore,
    runner: Arc<StepRunner>,
    saga: SagaCoordinator,
    dead_letters: DeadLetterQueue,
    sink: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    node_id: String,
    max_parallel_steps: usize,
    heartbeat_interval: Duration,
    in_flight: DashMap<Uuid, InFlight>,
}

impl ExecutionEngine {
    pub fn builder(registry: Arc<WorkflowRegistry>, store: Arc<dyn PersistenceStore>) -> ExecutionEngineBuilder {
        ExecutionEngineBuilder::new(registry, store)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        self.runner.circuits()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.runner.rate_limiter()
    }

    /// Executions currently driven by this engine
    pub fn in_flight(&self) -> Vec<Uuid> {
        self.in_flight.iter().map(|entry| *entry.key()).collect()
    }

    /// Run a new execution to a settled state (completed, failed, cancelled or paused)
    #[instrument(skip(self, input), fields(node_id = %self.node_id))]
    pub async fn start(&self, workflow_name: &str, input: Value) -> Result<ExecutionReport> {
        let (workflow, execution) = self.create(workflow_name, input).await?;
        let token = self.register(execution.id);
        self.drive(workflow, execution, token, None).await
    }

    /// Create the execution now and drive it on its own task
    pub async fn submit(self: &Arc<Self>, workflow_name: &str, input: Value) -> Result<(Uuid, JoinHandle<Result<ExecutionReport>>)> {
        let (workflow, execution) = self.create(workflow_name, input).await?;
        let id = execution.id;
        let token = self.register(id);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.drive(workflow, execution, token, None).await });
        Ok((id, handle))
    }

    /// Continue a paused execution from its pause checkpoint.
    ///
    /// The pausing step runs again; `input` reaches it as `resume_input`.
    #[instrument(skip(self, input), fields(node_id = %self.node_id))]
    pub async fn resume(&self, execution_id: Uuid, input: Option<Value>) -> Result<ExecutionReport> {
        let (workflow, execution, token, target) = self.prepare_resume(execution_id, input).await?;
        self.drive(workflow, execution, token, Some(target)).await
    }

    /// Fire due snooze timers and expire overdue awaits.
    ///
    /// Every due execution continues on its own task; the caller gets the
    /// handles back as soon as each one has been claimed.
    pub async fn tick(self: &Arc<Self>) -> Result<Vec<Redrive>> {
        let now = self.clock.now();
        let paused = self
            .store
            .list_executions(&[ExecutionState::Snoozed, ExecutionState::AwaitingApproval])
            .await?;

        let mut redrives = Vec::new();
        for execution in paused {
            let id = execution.id;
            if self.in_flight.contains_key(&id) {
                continue;
            }
            let Some(pause) = execution.pause.clone() else {
                continue;
            };
            let claimed = match pause.kind {
                PauseKind::Snooze if pause.resume_at.is_some_and(|at| at <= now) => self
                    .prepare_resume(id, None)
                    .await
                    .map(|(workflow, execution, token, target)| self.spawn_drive(workflow, execution, token, Some(target))),
                PauseKind::Await if pause.deadline.is_some_and(|at| at <= now) => Ok(self.spawn_expiry(execution, pause)),
                _ => continue,
            };
            match claimed {
                Ok(redrive) => redrives.push(redrive),
                Err(e) => warn!(execution_id = %id, error = %e, "⚠️ Tick could not claim execution"),
            }
        }
        Ok(redrives)
    }

    /// Request cancellation.
    ///
    /// An execution driven by this engine stops after its running partition
    /// and the returned report is the last persisted snapshot; the final
    /// report comes from the drive itself. Paused or rescued executions are
    /// cancelled immediately.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn cancel(&self, execution_id: Uuid, options: CancelOptions) -> Result<ExecutionReport> {
        let signalled = match self.in_flight.get_mut(&execution_id) {
            Some(mut entry) => {
                entry.cancel = options;
                entry.token.cancel();
                true
            }
            None => false,
        };
        if signalled {
            info!(execution_id = %execution_id, "🛑 Cancellation requested for running execution");
            return self.report(execution_id).await;
        }

        let execution = self.load(execution_id).await?;
        if execution.state.is_terminal() {
            return Err(SagaflowError::InvalidState(format!(
                "execution {execution_id} is already {}",
                execution.state
            )));
        }
        let workflow = self.registry.get(&execution.workflow_name)?;
        self.finish_cancelled(&workflow, execution, options, false).await
    }

    /// Re-drive executions the lifeline marked as rescued, each on its own task
    pub async fn resume_rescued(self: &Arc<Self>) -> Result<Vec<Redrive>> {
        let rescued = self.store.list_executions(&[ExecutionState::Rescued]).await?;
        let mut redrives = Vec::new();

        for mut execution in rescued {
            let id = execution.id;
            if self.in_flight.contains_key(&id) {
                // Our own abandoned drive has not noticed the lost lock yet
                continue;
            }
            let workflow = match self.registry.get(&execution.workflow_name) {
                Ok(workflow) => workflow,
                Err(e) => {
                    warn!(execution_id = %id, error = %e, "⚠️ Cannot re-drive rescued execution");
                    continue;
                }
            };

            match self.checkpoints.load(id, system::RESCUE_CHECKPOINT_LABEL).await {
                Ok(checkpoint) => checkpoint.restore_into(&mut execution),
                Err(SagaflowError::CheckpointNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            transition(&mut execution.state, &ExecutionEvent::Resume)?;

            let now = self.clock.now();
            execution.locked_by = Some(self.node_id.clone());
            execution.heartbeat_at = Some(now);
            execution.updated_at = now;
            self.store.save_execution(&execution).await?;

            info!(execution_id = %id, workflow = %execution.workflow_name, "🛟 Re-driving rescued execution");
            self.sink.emit(
                TelemetryEvent::new(events::EXECUTION_RESUMED)
                    .meta("execution_id", id.to_string())
                    .meta("workflow", execution.workflow_name.clone())
                    .meta("reason", "rescued"),
            );

            let token = self.register(id);
            redrives.push(self.spawn_drive(workflow, execution, token, None));
        }
        Ok(redrives)
    }

    /// Start a fresh execution from a dead letter's original input and drop the letter
    pub async fn retry_dead_letter(&self, dead_letter_id: Uuid) -> Result<ExecutionReport> {
        let letter = self.dead_letters.get(dead_letter_id).await?;
        info!(
            dead_letter_id = %dead_letter_id,
            workflow = %letter.workflow_name,
            "📬 Retrying dead letter"
        );
        let report = self.start(&letter.workflow_name, letter.input.clone()).await?;
        self.dead_letters.remove(dead_letter_id).await?;
        Ok(report)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        self.load(execution_id).await
    }

    pub async fn report(&self, execution_id: Uuid) -> Result<ExecutionReport> {
        Ok(ExecutionReport::from_execution(&self.load(execution_id).await?))
    }

    pub async fn list_executions(&self, states: &[ExecutionState]) -> Result<Vec<Execution>> {
        self.store.list_executions(states).await
    }

    async fn load(&self, execution_id: Uuid) -> Result<Execution> {
        self.store
            .load_execution(execution_id)
            .await?
            .ok_or(SagaflowError::ExecutionNotFound(execution_id))
    }

    async fn create(&self, workflow_name: &str, input: Value) -> Result<(Arc<Workflow>, Execution)> {
        let workflow = self.registry.get(workflow_name)?;
        let context = if input.is_null() {
            Context::new()
        } else {
            Context::from_value(input.clone())?
        };

        let now = self.clock.now();
        let mut execution = Execution::new(workflow.name(), input, context);
        transition(&mut execution.state, &ExecutionEvent::Start)?;
        execution.created_at = now;
        execution.started_at = Some(now);
        execution.updated_at = now;
        execution.locked_by = Some(self.node_id.clone());
        execution.heartbeat_at = Some(now);
        self.store.save_execution(&execution).await?;

        info!(
            execution_id = %execution.id,
            workflow = workflow.name(),
            steps = workflow.steps().len(),
            partitions = workflow.execution_order().len(),
            "🚀 Execution started"
        );
        self.sink.emit(
            TelemetryEvent::new(events::EXECUTION_START)
                .meta("execution_id", execution.id.to_string())
                .meta("workflow", workflow.name())
                .meta("node_id", self.node_id.clone()),
        );
        Ok((workflow, execution))
    }

    fn register(&self, execution_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.in_flight.insert(
            execution_id,
            InFlight {
                token: token.clone(),
                cancel: CancelOptions::default(),
            },
        );
        token
    }

    /// Restore a paused execution and claim it for this node
    async fn prepare_resume(
        &self,
        execution_id: Uuid,
        input: Option<Value>,
    ) -> Result<(Arc<Workflow>, Execution, CancellationToken, ResumeTarget)> {
        let mut execution = self.load(execution_id).await?;
        if !execution.state.is_paused() {
            return Err(SagaflowError::InvalidState(format!(
                "execution {execution_id} is {}, not paused",
                execution.state
            )));
        }
        let pause = execution.pause.clone().ok_or_else(|| {
            SagaflowError::InvalidState(format!("execution {execution_id} has no pause record"))
        })?;
        let workflow = self.registry.get(&execution.workflow_name)?;

        self.checkpoints.restore(&mut execution, &pause.checkpoint_label).await?;
        transition(&mut execution.state, &ExecutionEvent::Resume)?;
        execution.pause = None;
        execution.step_states.insert(pause.step.clone(), StepState::Pending);
        if !self.persist(&mut execution).await? {
            return Err(self.lock_lost(&execution));
        }

        info!(
            execution_id = %execution_id,
            workflow = %execution.workflow_name,
            step = %pause.step,
            "▶️ Resuming execution"
        );
        self.sink.emit(
            TelemetryEvent::new(events::EXECUTION_RESUMED)
                .meta("execution_id", execution_id.to_string())
                .meta("workflow", execution.workflow_name.clone())
                .meta("step", pause.step.clone()),
        );

        let token = self.register(execution_id);
        let target = ResumeTarget {
            step: pause.step,
            input,
        };
        Ok((workflow, execution, token, target))
    }

    fn spawn_drive(
        self: &Arc<Self>,
        workflow: Arc<Workflow>,
        execution: Execution,
        token: CancellationToken,
        resume: Option<ResumeTarget>,
    ) -> Redrive {
        let execution_id = execution.id;
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = engine.drive(workflow, execution, token, resume).await;
            if let Err(e) = &result {
                warn!(execution_id = %execution_id, error = %e, "⚠️ Re-driven execution did not settle");
            }
            result
        });
        Redrive { execution_id, handle }
    }

    fn spawn_expiry(self: &Arc<Self>, execution: Execution, pause: PauseInfo) -> Redrive {
        let execution_id = execution.id;
        self.register(execution_id);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = InFlightGuard {
                map: &engine.in_flight,
                id: execution_id,
            };
            let result = engine.expire_await(execution, pause).await;
            if let Err(e) = &result {
                warn!(execution_id = %execution_id, error = %e, "⚠️ Expired await did not settle");
            }
            result
        });
        Redrive { execution_id, handle }
    }

    async fn drive(
        &self,
        workflow: Arc<Workflow>,
        mut execution: Execution,
        token: CancellationToken,
        mut resume: Option<ResumeTarget>,
    ) -> Result<ExecutionReport> {
        let _guard = InFlightGuard {
            map: &self.in_flight,
            id: execution.id,
        };
        let deadline = workflow
            .options()
            .total_timeout
            .and_then(|limit| Instant::now().checked_add(limit));
        let order = workflow.execution_order();

        while execution.checkpoint_cursor < order.len() {
            if token.is_cancelled() {
                let options = self.cancel_options(execution.id);
                return self.finish_cancelled(&workflow, execution, options, true).await;
            }
            if !self.persist(&mut execution).await? {
                return Err(self.lock_lost(&execution));
            }

            let index = execution.checkpoint_cursor;
            let runnable = self.prepare_partition(&workflow, &mut execution, &order[index]);
            debug!(
                execution_id = %execution.id,
                partition = index,
                steps = ?runnable,
                "📋 Running partition"
            );

            execution.current_steps = runnable.clone();
            let partition = self
                .run_partition(&workflow, &execution, &runnable, &token, deadline, resume.take())
                .await?;
            execution.current_steps.clear();

            match self.apply_partition(&workflow, &mut execution, index, partition, &token).await? {
                Verdict::Advance => execution.checkpoint_cursor += 1,
                Verdict::Cancelled => {
                    let options = self.cancel_options(execution.id);
                    return self.finish_cancelled(&workflow, execution, options, true).await;
                }
                Verdict::Failed(failure) => return self.finish_failed(&workflow, execution, failure).await,
                Verdict::Halted(reason) => return self.finish_completed(&workflow, execution, Some(reason)).await,
                Verdict::Paused { step, outcome } => return self.pause(execution, step, outcome).await,
                Verdict::LockLost => return Err(self.lock_lost(&execution)),
            }
        }

        if token.is_cancelled() {
            let options = self.cancel_options(execution.id);
            return self.finish_cancelled(&workflow, execution, options, true).await;
        }
        self.finish_completed(&workflow, execution, None).await
    }

    /// Mark ineligible and predicate-false steps skipped; return the rest in declaration order
    fn prepare_partition(&self, workflow: &Workflow, execution: &mut Execution, partition: &Partition) -> Vec<String> {
        let mut names: Vec<&String> = partition.steps.iter().collect();
        names.sort_by_key(|name| workflow.dag().position(name));

        let mut runnable = Vec::with_capacity(names.len());
        for name in names {
            let Some(step) = workflow.step(name) else {
                continue;
            };
            match execution.step_state(name) {
                StepState::Pending | StepState::Running | StepState::Awaiting | StepState::Snoozed => {}
                _ => continue,
            }

            let satisfied = |dep: &String| execution.step_state(dep).satisfies_dependents();
            let eligible = step.dependencies().iter().all(satisfied)
                && (step.any_dependencies().is_empty() || step.any_dependencies().iter().any(satisfied));

            let skip_reason = if !eligible {
                Some("dependencies not satisfied")
            } else if !step.should_run(&execution.context) {
                Some("condition not met")
            } else {
                None
            };

            match skip_reason {
                Some(reason) => {
                    debug!(execution_id = %execution.id, step = %name, reason = reason, "⏭️ Skipping step");
                    execution.step_states.insert(name.clone(), StepState::Skipped);
                    execution.skipped_steps.push(name.clone());
                    self.sink.emit(
                        TelemetryEvent::new(events::STEP_SKIPPED)
                            .meta("execution_id", execution.id.to_string())
                            .meta("workflow", workflow.name())
                            .meta("step", name.clone())
                            .meta("reason", reason),
                    );
                }
                None => {
                    execution.step_states.insert(name.clone(), StepState::Running);
                    runnable.push(name.clone());
                }
            }
        }
        runnable
    }

    async fn run_partition(
        &self,
        workflow: &Arc<Workflow>,
        execution: &Execution,
        steps: &[String],
        token: &CancellationToken,
        deadline: Option<Instant>,
        resume: Option<ResumeTarget>,
    ) -> Result<PartitionRun> {
        let partition_token = token.child_token();
        let snapshot = Arc::new(execution.context.clone());
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_steps.max(1)));
        let mut tasks: JoinSet<(usize, StepRun)> = JoinSet::new();

        for (slot, name) in steps.iter().enumerate() {
            let runner = Arc::clone(&self.runner);
            let workflow = Arc::clone(workflow);
            let semaphore = Arc::clone(&semaphore);
            let name = name.clone();
            let resume_input = resume
                .as_ref()
                .filter(|target| target.step == name)
                .and_then(|target| target.input.clone());
            let invocation = StepInvocation {
                execution_id: execution.id,
                context: Arc::clone(&snapshot),
                prior_attempts: execution.attempts_for(&name),
                resume_input,
                cancellation: partition_token.clone(),
            };

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let run = match workflow.step(&name) {
                    Some(step) => runner.run(&workflow, step, invocation).await,
                    None => StepRun {
                        outcome: StepOutcome::Error(StepError::terminal(format!("unknown step '{name}'"))),
                        step: name,
                        attempts: 0,
                        duration: Duration::ZERO,
                    },
                };
                (slot, run)
            });
        }

        let mut slots: Vec<Option<StepRun>> = vec![None; steps.len()];
        let mut timed_out = false;
        let mut lock_lost = false;
        let period = self.heartbeat_interval.max(Duration::from_millis(1));
        let first_beat = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut heartbeat = tokio::time::interval_at(first_beat, period);

        while !tasks.is_empty() {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = sleep_until_deadline(deadline) => {
                    timed_out = true;
                    break;
                }
                _ = heartbeat.tick() => {
                    let now = self.clock.now();
                    if !self.store.heartbeat_execution(execution.id, &self.node_id, now).await? {
                        lock_lost = true;
                        break;
                    }
                    continue;
                }
            };

            match joined {
                Some(Ok((slot, run))) => {
                    if self.fails_fast(workflow, &run) {
                        debug!(execution_id = %execution.id, step = %run.step, "⛔ Fail-fast: cancelling siblings");
                        partition_token.cancel();
                    }
                    if let Some(entry) = slots.get_mut(slot) {
                        *entry = Some(run);
                    }
                }
                Some(Err(join_error)) => {
                    error!(execution_id = %execution.id, error = %join_error, "💥 Step task failed to join");
                }
                None => break,
            }
        }

        if timed_out || lock_lost {
            partition_token.cancel();
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                if let Ok((slot, run)) = joined {
                    if let Some(entry) = slots.get_mut(slot) {
                        *entry = Some(run);
                    }
                }
            }
        }

        let total_timeout = workflow.options().total_timeout.unwrap_or_default();
        let runs = slots
            .into_iter()
            .zip(steps)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    let error = if timed_out {
                        StepError::timeout(total_timeout).with_code("workflow_timeout")
                    } else if lock_lost {
                        StepError::cancelled()
                    } else {
                        StepError::retryable("step task aborted").with_code("aborted")
                    };
                    StepRun {
                        step: name.clone(),
                        outcome: StepOutcome::Error(error),
                        attempts: execution.attempts_for(name),
                        duration: Duration::ZERO,
                    }
                })
            })
            .collect();

        Ok(PartitionRun {
            runs,
            timed_out,
            lock_lost,
        })
    }

    fn fails_fast(&self, workflow: &Workflow, run: &StepRun) -> bool {
        let StepOutcome::Error(error) = &run.outcome else {
            return false;
        };
        if error.code.as_deref() == Some("cancelled") {
            return false;
        }
        let group = workflow.step(&run.step).and_then(|s| s.group_name());
        workflow.group_policy(group) == GroupPolicy::FailFast
    }

    async fn apply_partition(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        index: usize,
        partition: PartitionRun,
        token: &CancellationToken,
    ) -> Result<Verdict> {
        if partition.lock_lost {
            return Ok(Verdict::LockLost);
        }

        let now = self.clock.now();
        let mut fatal: Option<StepFailure> = None;
        let mut halt: Option<String> = None;
        let mut pause: Option<(String, StepOutcome)> = None;
        let mut labels: Vec<String> = Vec::new();

        for run in partition.runs {
            let name = run.step.clone();
            execution.attempts.insert(name.clone(), run.attempts);
            let step = workflow.step(&name);

            match run.outcome {
                StepOutcome::Ok(patch) => {
                    execution.context.merge(&patch);
                    execution.completed_steps.push(CompletedStep {
                        name: name.clone(),
                        partition: index,
                        completed_at: now,
                    });
                    execution.step_states.insert(name.clone(), StepState::Completed);
                    if let Some(label) = step.and_then(|s| s.checkpoint_label()) {
                        labels.push(label.to_string());
                    }
                }
                StepOutcome::Skip(reason) => {
                    debug!(execution_id = %execution.id, step = %name, reason = %reason, "⏭️ Step skipped itself");
                    execution.step_states.insert(name.clone(), StepState::Skipped);
                    execution.skipped_steps.push(name.clone());
                    self.sink.emit(
                        TelemetryEvent::new(events::STEP_SKIPPED)
                            .meta("execution_id", execution.id.to_string())
                            .meta("workflow", workflow.name())
                            .meta("step", name.clone())
                            .meta("reason", reason),
                    );
                }
                StepOutcome::Halt(reason) => {
                    execution.step_states.insert(name.clone(), StepState::Halted);
                    halt.get_or_insert(reason);
                }
                outcome @ StepOutcome::Await(_) => {
                    execution.step_states.insert(name.clone(), StepState::Awaiting);
                    pause.get_or_insert((name, outcome));
                }
                outcome @ StepOutcome::Snooze(_) => {
                    execution.step_states.insert(name.clone(), StepState::Snoozed);
                    pause.get_or_insert((name, outcome));
                }
                StepOutcome::Error(error) if error.code.as_deref() == Some("cancelled") => {
                    execution.step_states.insert(name, StepState::Pending);
                }
                StepOutcome::Error(error) => {
                    self.record_failure(workflow, execution, name, error, &mut fatal);
                }
                StepOutcome::Retry(reason) => {
                    let error = StepError::retryable(reason).with_code("retry_requested");
                    self.record_failure(workflow, execution, name, error, &mut fatal);
                }
            }
        }

        for label in labels {
            self.checkpoints.save(execution, &label, now).await?;
        }

        if token.is_cancelled() {
            return Ok(Verdict::Cancelled);
        }
        if partition.timed_out && fatal.is_none() {
            let limit = workflow.options().total_timeout.unwrap_or_default();
            fatal = Some(StepFailure {
                step: workflow.name().to_string(),
                error: StepError::timeout(limit).with_code("workflow_timeout"),
            });
        }
        if let Some(failure) = fatal {
            return Ok(Verdict::Failed(failure));
        }
        if let Some(reason) = halt {
            return Ok(Verdict::Halted(reason));
        }
        if let Some((step, outcome)) = pause {
            return Ok(Verdict::Paused { step, outcome });
        }
        Ok(Verdict::Advance)
    }

    fn record_failure(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        step: String,
        error: StepError,
        fatal: &mut Option<StepFailure>,
    ) {
        execution.step_states.insert(step.clone(), StepState::Failed);
        let failure = StepFailure { step, error };
        execution.step_errors.push(failure.clone());

        let group = workflow.step(&failure.step).and_then(|s| s.group_name());
        if workflow.group_policy(group) == GroupPolicy::Continue {
            warn!(
                execution_id = %execution.id,
                step = %failure.step,
                error = %failure.error,
                "⚠️ Step failed; continuing with partial results"
            );
        } else if fatal.is_none() {
            *fatal = Some(failure);
        }
    }

    async fn pause(&self, mut execution: Execution, step: String, outcome: StepOutcome) -> Result<ExecutionReport> {
        let now = self.clock.now();
        let label = format!("{}{}", system::PAUSE_CHECKPOINT_PREFIX, step);
        self.checkpoints.save(&execution, &label, now).await?;

        let info = match outcome {
            StepOutcome::Snooze(duration) => {
                transition(&mut execution.state, &ExecutionEvent::Snooze)?;
                PauseInfo {
                    step: step.clone(),
                    kind: PauseKind::Snooze,
                    reason: format!("snoozed for {}ms", duration.as_millis()),
                    resume_at: Some(after(now, duration)),
                    deadline: None,
                    checkpoint_label: label,
                    metadata: Value::Null,
                }
            }
            StepOutcome::Await(options) => {
                transition(&mut execution.state, &ExecutionEvent::Await(options.reason.clone()))?;
                PauseInfo {
                    step: step.clone(),
                    kind: PauseKind::Await,
                    reason: options.reason,
                    resume_at: None,
                    deadline: options.timeout.map(|limit| after(now, limit)),
                    checkpoint_label: label,
                    metadata: options.metadata,
                }
            }
            other => {
                return Err(SagaflowError::Internal(format!(
                    "cannot pause on a {} outcome",
                    other.kind()
                )))
            }
        };

        info!(
            execution_id = %execution.id,
            workflow = %execution.workflow_name,
            step = %step,
            state = %execution.state,
            "⏸️ Execution paused"
        );
        self.sink.emit(
            TelemetryEvent::new(events::EXECUTION_PAUSED)
                .meta("execution_id", execution.id.to_string())
                .meta("workflow", execution.workflow_name.clone())
                .meta("step", step)
                .meta("state", execution.state.as_str())
                .meta("reason", info.reason.clone()),
        );

        execution.pause = Some(info);
        self.settle(&mut execution, true).await?;
        Ok(ExecutionReport::from_execution(&execution))
    }

    async fn finish_completed(&self, workflow: &Workflow, mut execution: Execution, halt: Option<String>) -> Result<ExecutionReport> {
        match &halt {
            Some(reason) => transition(&mut execution.state, &ExecutionEvent::Halt(reason.clone()))?,
            None => transition(&mut execution.state, &ExecutionEvent::Complete)?,
        };
        execution.halt_reason = halt;
        execution.finished_at = Some(self.clock.now());

        self.run_ensure_hooks(workflow, &execution);
        self.settle(&mut execution, true).await?;

        info!(
            execution_id = %execution.id,
            workflow = %execution.workflow_name,
            completed = execution.completed_steps.len(),
            skipped = execution.skipped_steps.len(),
            halted = execution.halt_reason.is_some(),
            "✅ Execution completed"
        );
        self.emit_stop(&execution);
        Ok(ExecutionReport::from_execution(&execution))
    }

    async fn finish_failed(&self, workflow: &Workflow, mut execution: Execution, failure: StepFailure) -> Result<ExecutionReport> {
        error!(
            execution_id = %execution.id,
            workflow = %execution.workflow_name,
            step = %failure.step,
            error = %failure.error,
            "❌ Execution failed; rolling back"
        );
        if !execution.step_errors.contains(&failure) {
            execution.step_errors.push(failure.clone());
        }

        self.rollback(workflow, &mut execution, &failure.error).await;
        transition(&mut execution.state, &ExecutionEvent::Fail(failure.error.message.clone()))?;
        execution.failure = Some(failure.clone());
        execution.finished_at = Some(self.clock.now());
        self.run_ensure_hooks(workflow, &execution);

        let dead_letter_id = self.dead_letters.record(&execution, &failure).await?;
        self.settle(&mut execution, true).await?;

        self.sink.emit(
            TelemetryEvent::new(events::EXECUTION_EXCEPTION)
                .meta("execution_id", execution.id.to_string())
                .meta("workflow", execution.workflow_name.clone())
                .meta("step", failure.step.clone())
                .meta("error", failure.error.message.clone())
                .meta("kind", failure.error.kind.as_str())
                .measure("rollback_errors", execution.rollback_errors.len() as f64),
        );
        self.emit_stop(&execution);

        let mut report = ExecutionReport::from_execution(&execution);
        report.dead_letter_id = dead_letter_id;
        Ok(report)
    }

    async fn finish_cancelled(
        &self,
        workflow: &Workflow,
        mut execution: Execution,
        options: CancelOptions,
        owned: bool,
    ) -> Result<ExecutionReport> {
        if options.rollback {
            self.rollback(workflow, &mut execution, &StepError::cancelled()).await;
        }
        transition(&mut execution.state, &ExecutionEvent::Cancel)?;
        execution.pause = None;
        execution.finished_at = Some(self.clock.now());
        self.run_ensure_hooks(workflow, &execution);
        self.settle(&mut execution, owned).await?;

        info!(
            execution_id = %execution.id,
            workflow = %execution.workflow_name,
            rolled_back = options.rollback,
            "🛑 Execution cancelled"
        );
        self.sink.emit(
            TelemetryEvent::new(events::EXECUTION_CANCELLED)
                .meta("execution_id", execution.id.to_string())
                .meta("workflow", execution.workflow_name.clone())
                .meta("rollback", options.rollback),
        );
        self.emit_stop(&execution);
        Ok(ExecutionReport::from_execution(&execution))
    }

    async fn expire_await(&self, execution: Execution, pause: PauseInfo) -> Result<ExecutionReport> {
        let workflow = self.registry.get(&execution.workflow_name)?;
        let waited = pause
            .deadline
            .map(|deadline| (deadline - execution.updated_at).to_std().unwrap_or_default())
            .unwrap_or_default();
        warn!(execution_id = %execution.id, step = %pause.step, "⌛ Await deadline passed");
        let failure = StepFailure {
            step: pause.step,
            error: StepError::timeout(waited).with_code("await_timeout"),
        };
        self.finish_failed(&workflow, execution, failure).await
    }

    async fn rollback(&self, workflow: &Workflow, execution: &mut Execution, error: &StepError) {
        let pending: Vec<CompletedStep> = execution
            .completed_steps
            .iter()
            .filter(|c| execution.step_state(&c.name) == StepState::Completed)
            .cloned()
            .collect();
        let summary = self
            .saga
            .rollback(
                execution.id,
                workflow,
                &pending,
                Arc::new(execution.context.clone()),
                error,
            )
            .await;

        for step in &summary.rolled_back {
            execution.step_states.insert(step.clone(), StepState::RolledBack);
        }
        for failure in &summary.errors {
            execution.step_states.insert(failure.step.clone(), StepState::RollbackFailed);
        }
        execution.rollback_errors.extend(summary.errors);
    }

    fn run_ensure_hooks(&self, workflow: &Workflow, execution: &Execution) {
        for hook in workflow.ensure_hooks() {
            if catch_unwind(AssertUnwindSafe(|| hook(&execution.context, execution.state))).is_err() {
                error!(execution_id = %execution.id, "💥 Ensure hook panicked");
            }
        }
    }

    /// Heartbeat then save; `false` once the lock has been lost
    async fn persist(&self, execution: &mut Execution) -> Result<bool> {
        let now = self.clock.now();
        if !self.store.heartbeat_execution(execution.id, &self.node_id, now).await? {
            return Ok(false);
        }
        execution.locked_by = Some(self.node_id.clone());
        execution.heartbeat_at = Some(now);
        execution.updated_at = now;
        self.store.save_execution(execution).await?;
        Ok(true)
    }

    /// Save a settled execution and release its lock
    async fn settle(&self, execution: &mut Execution, owned: bool) -> Result<()> {
        let now = self.clock.now();
        if owned && !self.store.heartbeat_execution(execution.id, &self.node_id, now).await? {
            return Err(self.lock_lost(execution));
        }
        execution.locked_by = None;
        execution.updated_at = now;
        self.store.save_execution(execution).await
    }

    fn lock_lost(&self, execution: &Execution) -> SagaflowError {
        warn!(
            execution_id = %execution.id,
            node_id = %self.node_id,
            "🔒 Execution lock lost; abandoning run"
        );
        SagaflowError::LockLost {
            execution_id: execution.id,
            node_id: self.node_id.clone(),
        }
    }

    fn cancel_options(&self, execution_id: Uuid) -> CancelOptions {
        self.in_flight
            .get(&execution_id)
            .map(|entry| entry.cancel)
            .unwrap_or_default()
    }

    fn emit_stop(&self, execution: &Execution) {
        let duration_ms = match (execution.started_at, execution.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64,
            _ => 0.0,
        };
        self.sink.emit(
            TelemetryEvent::new(events::EXECUTION_STOP)
                .meta("execution_id", execution.id.to_string())
                .meta("workflow", execution.workflow_name.clone())
                .meta("state", execution.state.as_str())
                .measure("duration_ms", duration_ms)
                .measure("completed_steps", execution.completed_steps.len() as f64),
        );
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("node_id", &self.node_id)
            .field("max_parallel_steps", &self.max_parallel_steps)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Assembles an [`ExecutionEngine`]; anything not set explicitly comes from
/// the configuration (defaults unless [`config`](Self::config) is called)
pub struct ExecutionEngineBuilder {
    registry: Arc<WorkflowRegistry>,
    store: Arc<dyn PersistenceStore>,
    config: SagaflowConfig,
    node_id: Option<String>,
    sink: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    circuits: Option<Arc<CircuitBreakerManager>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl ExecutionEngineBuilder {
    pub fn new(registry: Arc<WorkflowRegistry>, store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            registry,
            store,
            config: SagaflowConfig::default(),
            node_id: None,
            sink: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
            circuits: None,
            rate_limiter: None,
        }
    }

    pub fn config(mut self, config: SagaflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share circuit state with other components
    pub fn circuit_breakers(mut self, circuits: Arc<CircuitBreakerManager>) -> Self {
        self.circuits = Some(circuits);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn build(self) -> ExecutionEngine {
        let config = self.config;
        let sink = self.sink;
        let node_id = self
            .node_id
            .or_else(|| config.engine.node_id.clone())
            .unwrap_or_else(|| format!("node-{}", Uuid::new_v4()));

        let circuits = self
            .circuits
            .unwrap_or_else(|| Arc::new(config.circuit_breakers.build_manager().with_sink(Arc::clone(&sink))));
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(config.rate_limits.build_limiter().with_sink(Arc::clone(&sink))));

        let runner = StepRunner::new(circuits, rate_limiter)
            .with_profiles(config.backoff.profiles())
            .with_rate_limit_max_wait(config.engine.rate_limit_max_wait())
            .with_sink(Arc::clone(&sink));
        let dead_letters = DeadLetterQueue::new(Arc::clone(&self.store))
            .with_clock(Arc::clone(&self.clock))
            .with_sink(Arc::clone(&sink))
            .enabled(config.dead_letter.enabled);

        ExecutionEngine {
            checkpoints: CheckpointStore::new(Arc::clone(&self.store)),
            saga: SagaCoordinator::new().with_sink(Arc::clone(&sink)),
            runner: Arc::new(runner),
            dead_letters,
            registry: self.registry,
            store: self.store,
            sink,
            clock: self.clock,
            node_id,
            max_parallel_steps: config.engine.max_parallel_steps,
            heartbeat_interval: config.engine.heartbeat_interval(),
            in_flight: DashMap::new(),
        }
    }
}

impl std::fmt::Debug for ExecutionEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngineBuilder")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}
