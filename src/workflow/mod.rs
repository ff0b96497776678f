//! # Workflows
//!
//! Step and workflow definitions. A workflow is assembled with
//! [`WorkflowBuilder`], validated once by `build`, and is immutable from then
//! on. Steps implement [`StepHandler`] (or wrap an async closure) and return a
//! [`StepOutcome`].
//!
//! ```rust,no_run
//! use sagaflow::workflow::{Step, StepOutcome, Workflow};
//! use serde_json::json;
//!
//! let workflow = Workflow::builder("checkout")
//!     .step(Step::from_fn("reserve", |_ctx| async { StepOutcome::ok(json!({"reserved": true})) }))
//!     .step(Step::from_fn("charge", |_ctx| async { StepOutcome::done() }).after(["reserve"]))
//!     .build()
//!     .expect("valid workflow");
//! assert_eq!(workflow.execution_order().len(), 2);
//! ```

pub mod definition;
pub mod outcome;
pub mod registry;
pub mod step;

pub use definition::{EnsureHook, GroupPolicy, Workflow, WorkflowBuilder, WorkflowOptions};
pub use outcome::{AwaitOptions, StepError, StepOutcome};
pub use registry::WorkflowRegistry;
pub use step::{handler_fn, Compensator, FallbackFn, Step, StepContext, StepHandler, WhenPredicate};
