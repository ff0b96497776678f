//! # Workflow DAG
//!
//! Dependency graph validation and layered execution ordering.
//!
//! Steps declare `after` (all must finish) and `after_any` (first to finish
//! wins) dependencies and may carry a parallel-group tag. [`Dag::build`]
//! rejects duplicate names, unknown references, cycles and dependencies
//! between members of the same group, then precomputes partitions: ordered
//! layers whose steps can run concurrently.

mod graph;
mod partition;

pub use graph::{Dag, DagNode};
pub use partition::Partition;

use thiserror::Error;

/// Definition-time graph errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("duplicate step '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("step '{step}' in group '{group}' depends on group member '{dependency}'")]
    GroupDependency {
        group: String,
        step: String,
        dependency: String,
    },
}
