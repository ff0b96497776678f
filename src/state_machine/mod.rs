//! Execution and step state machines.
//!
//! The execution lifecycle is a pure transition table: the engine asks
//! `determine_target_state` before every state change so illegal moves surface
//! as errors instead of silently corrupting a persisted record.

pub mod events;
pub mod states;
pub mod transitions;

pub use events::ExecutionEvent;
pub use states::{ExecutionState, StepState};
pub use transitions::{determine_target_state, transition, InvalidTransition};
