//! Runtime records: executions, reports and dead letters.

use crate::context::Context;
use crate::error::{Result, SagaflowError};
use crate::state_machine::{ExecutionState, StepState};
use crate::workflow::StepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A step that reached `Ok`, in completion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub name: String,
    /// Partition the step ran in; rollback batches by this
    pub partition: usize,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseKind {
    Await,
    Snooze,
}

/// Why and where an execution is paused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseInfo {
    pub step: String,
    pub kind: PauseKind,
    pub reason: String,
    /// Snooze: when the timer fires
    pub resume_at: Option<DateTime<Utc>>,
    /// Await: when the execution fails if still waiting
    pub deadline: Option<DateTime<Utc>>,
    pub checkpoint_label: String,
    #[serde(default)]
    pub metadata: Value,
}

/// A failed step and its final error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: String,
    pub error: StepError,
}

/// Rollback failures are collected, never thrown
pub type RollbackError = StepFailure;

/// One runtime instance of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_name: String,
    pub state: ExecutionState,
    /// Original input, kept for dead-letter retries
    pub input: Value,
    pub context: Context,
    pub completed_steps: Vec<CompletedStep>,
    pub skipped_steps: Vec<String>,
    pub step_states: BTreeMap<String, StepState>,
    pub attempts: BTreeMap<String, u32>,
    pub current_steps: Vec<String>,
    /// Index of the next partition to run
    pub checkpoint_cursor: usize,
    pub pause: Option<PauseInfo>,
    pub halt_reason: Option<String>,
    /// The triggering error of a failed execution
    pub failure: Option<StepFailure>,
    /// Every step failure, including ones tolerated by `continue` groups
    pub step_errors: Vec<StepFailure>,
    pub rollback_errors: Vec<RollbackError>,
    pub locked_by: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    pub fn new(workflow_name: impl Into<String>, input: Value, context: Context) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow_name.into(),
            state: ExecutionState::Pending,
            input,
            context,
            completed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            step_states: BTreeMap::new(),
            attempts: BTreeMap::new(),
            current_steps: Vec::new(),
            checkpoint_cursor: 0,
            pause: None,
            halt_reason: None,
            failure: None,
            step_errors: Vec::new(),
            rollback_errors: Vec::new(),
            locked_by: None,
            heartbeat_at: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    pub fn step_state(&self, step: &str) -> StepState {
        self.step_states.get(step).copied().unwrap_or_default()
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|c| c.name == step)
    }

    /// Completed step names in completion order
    pub fn completed_names(&self) -> Vec<String> {
        self.completed_steps.iter().map(|c| c.name.clone()).collect()
    }

    pub fn attempts_for(&self, step: &str) -> u32 {
        self.attempts.get(step).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.values().sum()
    }

    /// Last sign of life from the driving node
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.heartbeat_at.or(self.started_at).unwrap_or(self.updated_at)
    }
}

/// An execution continued on its own task by a timer tick or a rescue
#[derive(Debug)]
pub struct Redrive {
    pub execution_id: Uuid,
    pub handle: JoinHandle<Result<ExecutionReport>>,
}

impl Redrive {
    /// Wait for the execution to settle again
    pub async fn join(self) -> Result<ExecutionReport> {
        let execution_id = self.execution_id;
        self.handle
            .await
            .map_err(|e| SagaflowError::Internal(format!("execution {execution_id} task failed: {e}")))?
    }
}

/// Outcome handed back to callers of start/resume/cancel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub workflow_name: String,
    pub state: ExecutionState,
    pub context: Context,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub halt_reason: Option<String>,
    pub error: Option<StepFailure>,
    pub step_errors: Vec<StepFailure>,
    pub rollback_errors: Vec<RollbackError>,
    pub pause: Option<PauseInfo>,
    pub dead_letter_id: Option<Uuid>,
}

impl ExecutionReport {
    pub fn from_execution(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            workflow_name: execution.workflow_name.clone(),
            state: execution.state,
            context: execution.context.clone(),
            completed_steps: execution.completed_names(),
            skipped_steps: execution.skipped_steps.clone(),
            halt_reason: execution.halt_reason.clone(),
            error: execution.failure.clone(),
            step_errors: execution.step_errors.clone(),
            rollback_errors: execution.rollback_errors.clone(),
            pause: execution.pause.clone(),
            dead_letter_id: None,
        }
    }

    /// Failed with every rollback succeeding
    pub fn cleanly_rolled_back(&self) -> bool {
        self.state == ExecutionState::Failed && self.rollback_errors.is_empty()
    }
}

/// Durable record of a permanently failed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub workflow_name: String,
    pub input: Value,
    pub error: StepFailure,
    pub attempts: BTreeMap<String, u32>,
    pub rollback_errors: Vec<RollbackError>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_execution(execution: &Execution, error: StepFailure, failed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id: execution.id,
            workflow_name: execution.workflow_name.clone(),
            input: execution.input.clone(),
            error,
            attempts: execution.attempts.clone(),
            rollback_errors: execution.rollback_errors.clone(),
            failed_at,
        }
    }
}

/// Options for `ExecutionEngine::cancel`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOptions {
    /// Compensate completed steps as if the execution had failed
    pub rollback: bool,
}

impl CancelOptions {
    pub fn with_rollback() -> Self {
        Self { rollback: true }
    }
}
