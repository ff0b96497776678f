//! # Cluster Coordination
//!
//! [`LeaderElector`] designates the single node that fires scheduled work;
//! [`Lifeline`] frees executions whose driver has stopped heartbeating. Both
//! work only through the persistence store, so any number of nodes can share
//! one store.

pub mod leader;
pub mod lifeline;

pub use leader::LeaderElector;
pub use lifeline::Lifeline;
