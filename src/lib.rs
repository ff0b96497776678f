#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Sagaflow Core
//!
//! DAG workflow orchestration: interdependent steps run with per-partition
//! parallelism, timeouts, retries with backoff, saga rollback, circuit
//! breaking, rate limiting, checkpoint/resume and lease-based leader election.
//!
//! ## Architecture
//!
//! A [`Workflow`](workflow::Workflow) is validated once into an immutable DAG
//! and partitioned into topological levels. The
//! [`ExecutionEngine`](orchestration::ExecutionEngine) drives an
//! [`Execution`](orchestration::Execution) through those partitions, passing
//! each step through the [`StepRunner`](orchestration::StepRunner)
//! (rate limit, circuit breaker, timeout, retry) and handing failures to the
//! [`SagaCoordinator`](orchestration::SagaCoordinator) for reverse-order
//! compensation. Every transition is persisted through a
//! [`PersistenceStore`](persistence::PersistenceStore) and reported as a
//! [`TelemetryEvent`](events::TelemetryEvent).
//!
//! Cluster concerns sit beside the engine: the
//! [`LeaderElector`](coordination::LeaderElector) holds the lease that lets
//! one node's [`Scheduler`](scheduler::Scheduler) fire cron and interval
//! triggers, and the [`Lifeline`](coordination::Lifeline) rescues executions
//! whose driver went silent.
//!
//! ## Module Organization
//!
//! - [`workflow`] - Step and workflow definitions, outcomes, registry
//! - [`dag`] - Dependency graph validation and partitioning
//! - [`context`] - Shared key/value data passed between steps
//! - [`backoff`] - Backoff strategies, retry policies, error taxonomy
//! - [`resilience`] - Circuit breakers and token-bucket rate limiting
//! - [`state_machine`] - Execution and step states and legal transitions
//! - [`orchestration`] - Execution engine, step runner, saga rollback, dead letters
//! - [`checkpoint`] - Named execution snapshots
//! - [`persistence`] - Storage contract and the in-memory store
//! - [`coordination`] - Leader election and the lifeline
//! - [`scheduler`] - Clocks, cron evaluation and the trigger front-end
//! - [`events`] - Telemetry events and sinks
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sagaflow::orchestration::ExecutionEngine;
//! use sagaflow::persistence::InMemoryStore;
//! use sagaflow::workflow::{Step, StepOutcome, Workflow, WorkflowRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> sagaflow::Result<()> {
//! let registry = Arc::new(WorkflowRegistry::new());
//! registry.register(
//!     Workflow::builder("greet")
//!         .step(Step::from_fn("hello", |_ctx| async { StepOutcome::ok(json!({"greeting": "hello"})) }))
//!         .build()?,
//! )?;
//!
//! let engine = ExecutionEngine::builder(registry, Arc::new(InMemoryStore::new())).build();
//! let report = engine.start("greet", json!({})).await?;
//! println!("{} finished as {}", report.execution_id, report.state);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod context;
pub mod coordination;
pub mod dag;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestration;
pub mod persistence;
pub mod resilience;
pub mod scheduler;
pub mod state_machine;
pub mod workflow;

pub use backoff::{BackoffStrategy, ErrorKind, RetryPolicy};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{ConfigManager, SagaflowConfig};
pub use context::{Context, Patch};
pub use coordination::{LeaderElector, Lifeline};
pub use dag::{Dag, DagError, Partition};
pub use error::{Result, SagaflowError};
pub use events::{TelemetryEvent, TelemetrySink};
pub use orchestration::{CancelOptions, Execution, ExecutionEngine, ExecutionReport, Redrive};
pub use persistence::{InMemoryStore, LeaderRecord, PersistenceStore};
pub use resilience::{CircuitBreakerManager, CircuitState, RateLimitScope, RateLimiter};
pub use scheduler::{Clock, ManualClock, Schedule, Scheduler, SystemClock, Trigger};
pub use state_machine::{ExecutionEvent, ExecutionState, StepState};
pub use workflow::{GroupPolicy, Step, StepError, StepOutcome, Workflow, WorkflowRegistry};
