//! # Orchestration
//!
//! Execution of registered workflows.
//!
//! ## Components
//!
//! - [`ExecutionEngine`]: drives an execution partition by partition, owns
//!   pause/resume, cancellation and the lifecycle events
//! - [`StepRunner`]: one step invocation end to end (rate limit, circuit,
//!   timeout, retry with backoff, fallback)
//! - [`SagaCoordinator`]: reverse-order compensation on failure
//! - [`DeadLetterQueue`]: executions that failed after exhausting retries
//!
//! ```rust,no_run
//! use sagaflow::orchestration::ExecutionEngine;
//! use sagaflow::persistence::InMemoryStore;
//! use sagaflow::workflow::{Step, StepOutcome, Workflow, WorkflowRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> sagaflow::error::Result<()> {
//! let registry = Arc::new(WorkflowRegistry::new());
//! registry.register(
//!     Workflow::builder("greet")
//!         .step(Step::from_fn("hello", |_ctx| async { StepOutcome::ok(json!({"greeted": true})) }))
//!         .build()?,
//! )?;
//!
//! let engine = ExecutionEngine::builder(registry, Arc::new(InMemoryStore::new())).build();
//! let report = engine.start("greet", json!({})).await?;
//! assert_eq!(report.completed_steps, vec!["hello".to_string()]);
//! # Ok(())
//! # }
//! ```

pub mod dead_letter;
pub mod engine;
pub mod saga;
pub mod step_runner;
pub mod types;

pub use dead_letter::DeadLetterQueue;
pub use engine::{ExecutionEngine, ExecutionEngineBuilder};
pub use saga::{rollback_batches, RollbackSummary, SagaCoordinator};
pub use step_runner::{StepInvocation, StepRun, StepRunner};
pub use types::{
    CancelOptions, CompletedStep, DeadLetter, Execution, ExecutionReport, PauseInfo, PauseKind, Redrive,
    RollbackError, StepFailure,
};
