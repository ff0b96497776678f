//! Error types for the Sagaflow orchestration core.
//!

use crate::config::ConfigurationError;
use crate::context::ContextError;
use crate::dag::DagError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SagaflowError {
    #[error("Workflow definition error: {0}")]
    Dag(#[from] DagError),
    #[error("Context error: {0}")]
    Context(#[from] ContextError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Workflow already registered: {0}")]
    WorkflowAlreadyRegistered(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),
    #[error("Checkpoint '{label}' not found for execution {execution_id}")]
    CheckpointNotFound { execution_id: Uuid, label: String },
    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(Uuid),
    #[error("State transition error: {0}")]
    StateTransition(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Execution lock lost for {execution_id} (node {node_id})")]
    LockLost { execution_id: Uuid, node_id: String },
    #[error("Node {0} does not hold leadership")]
    NotLeader(String),
    #[error("Cron error: {0}")]
    Cron(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SagaflowError {
    fn from(error: serde_json::Error) -> Self {
        SagaflowError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SagaflowError>;
