//! # Checkpoints
//!
//! Durable snapshots that let an execution pause and later resume exactly
//! where it left off. [`CheckpointStore`] is a thin adapter over the
//! persistence store that captures and restores execution state.

use crate::context::Context;
use crate::error::{Result, SagaflowError};
use crate::orchestration::types::{CompletedStep, Execution};
use crate::persistence::PersistenceStore;
use crate::state_machine::StepState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Snapshot of an execution at a labelled point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub execution_id: Uuid,
    pub label: String,
    pub context: Context,
    pub completed_steps: Vec<CompletedStep>,
    pub skipped_steps: Vec<String>,
    pub step_states: BTreeMap<String, StepState>,
    pub attempts: BTreeMap<String, u32>,
    /// Next partition to run on resume
    pub cursor: usize,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn capture(execution: &Execution, label: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            execution_id: execution.id,
            label: label.into(),
            context: execution.context.clone(),
            completed_steps: execution.completed_steps.clone(),
            skipped_steps: execution.skipped_steps.clone(),
            step_states: execution.step_states.clone(),
            attempts: execution.attempts.clone(),
            cursor: execution.checkpoint_cursor,
            created_at: at,
        }
    }

    /// Overwrite the execution's progress with this snapshot
    pub fn restore_into(&self, execution: &mut Execution) {
        execution.context = self.context.clone();
        execution.completed_steps = self.completed_steps.clone();
        execution.skipped_steps = self.skipped_steps.clone();
        execution.step_states = self.step_states.clone();
        execution.attempts = self.attempts.clone();
        execution.checkpoint_cursor = self.cursor;
        execution.current_steps.clear();
    }
}

/// Checkpoint persistence adapter
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn PersistenceStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    /// Capture and persist a checkpoint
    pub async fn save(&self, execution: &Execution, label: &str, at: DateTime<Utc>) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::capture(execution, label, at);
        self.store.save_checkpoint(&checkpoint).await?;
        debug!(
            execution_id = %execution.id,
            label = label,
            cursor = checkpoint.cursor,
            completed = checkpoint.completed_steps.len(),
            "💾 Checkpoint saved"
        );
        Ok(checkpoint)
    }

    pub async fn load(&self, execution_id: Uuid, label: &str) -> Result<Checkpoint> {
        self.store
            .load_checkpoint(execution_id, label)
            .await?
            .ok_or_else(|| SagaflowError::CheckpointNotFound {
                execution_id,
                label: label.to_string(),
            })
    }

    /// Most recent checkpoint of any label
    pub async fn latest(&self, execution_id: Uuid) -> Result<Option<Checkpoint>> {
        let checkpoints = self.store.list_checkpoints(execution_id).await?;
        Ok(checkpoints.into_iter().max_by_key(|c| c.created_at))
    }

    /// Restore an execution from a labelled checkpoint
    pub async fn restore(&self, execution: &mut Execution, label: &str) -> Result<()> {
        let checkpoint = self.load(execution.id, label).await?;
        checkpoint.restore_into(execution);
        debug!(execution_id = %execution.id, label = label, "♻️ Restored from checkpoint");
        Ok(())
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore").finish_non_exhaustive()
    }
}
