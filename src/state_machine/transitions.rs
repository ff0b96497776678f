//! The execution transition table.

use super::events::ExecutionEvent;
use super::states::ExecutionState;
use crate::error::SagaflowError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} on '{event}'")]
pub struct InvalidTransition {
    pub from: ExecutionState,
    pub event: String,
}

impl From<InvalidTransition> for SagaflowError {
    fn from(error: InvalidTransition) -> Self {
        SagaflowError::StateTransition(error.to_string())
    }
}

/// Resolve the state an event moves an execution into
pub fn determine_target_state(
    current_state: ExecutionState,
    event: &ExecutionEvent,
) -> Result<ExecutionState, InvalidTransition> {
    use ExecutionEvent as E;
    use ExecutionState as S;

    let target = match (current_state, event) {
        (S::Pending, E::Start) => S::Running,

        (S::Running, E::Complete) => S::Completed,
        (S::Running, E::Halt(_)) => S::Completed,

        (S::Pending | S::Running | S::AwaitingApproval | S::Snoozed, E::Fail(_)) => S::Failed,

        (S::Running | S::AwaitingApproval | S::Snoozed | S::Rescued, E::Cancel) => S::Cancelled,

        (S::Running, E::Await(_)) => S::AwaitingApproval,
        (S::Running, E::Snooze) => S::Snoozed,
        (S::AwaitingApproval | S::Snoozed | S::Rescued, E::Resume) => S::Running,

        (S::Running, E::Rescue) => S::Rescued,

        (from, _) => {
            return Err(InvalidTransition {
                from,
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}

/// Apply an event in place, leaving the state untouched on error
pub fn transition(state: &mut ExecutionState, event: &ExecutionEvent) -> Result<ExecutionState, InvalidTransition> {
    let target = determine_target_state(*state, event)?;
    *state = target;
    Ok(target)
}
