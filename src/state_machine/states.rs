use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, not yet driven
    #[default]
    Pending,
    /// Partitions are being executed
    Running,
    /// All steps finished, or a step halted gracefully
    Completed,
    /// A step exhausted its retries; rollback has run
    Failed,
    /// Stopped on request
    Cancelled,
    /// Paused until resumed externally
    AwaitingApproval,
    /// Paused until a timer fires
    Snoozed,
    /// Heartbeat went stale; lock released for another node to pick up
    Rescued,
}

impl ExecutionState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Paused states hold no task and resume through a checkpoint
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::Snoozed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Snoozed => "snoozed",
            Self::Rescued => "rescued",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "snoozed" => Ok(Self::Snoozed),
            "rescued" => Ok(Self::Rescued),
            _ => Err(format!("Invalid execution state: {s}")),
        }
    }
}

/// Per-step status within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    /// Paused the execution with `Await`
    Awaiting,
    /// Paused the execution with `Snooze`
    Snoozed,
    /// Halted the execution gracefully
    Halted,
    RolledBack,
    RollbackFailed,
}

impl StepState {
    /// Settled for dependency purposes: dependents may run
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Awaiting => "awaiting",
            Self::Snoozed => "snoozed",
            Self::Halted => "halted",
            Self::RolledBack => "rolled_back",
            Self::RollbackFailed => "rollback_failed",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_through_strings() {
        for state in [
            ExecutionState::Pending,
            ExecutionState::Running,
            ExecutionState::Completed,
            ExecutionState::Failed,
            ExecutionState::Cancelled,
            ExecutionState::AwaitingApproval,
            ExecutionState::Snoozed,
            ExecutionState::Rescued,
        ] {
            assert_eq!(state.to_string().parse::<ExecutionState>(), Ok(state));
        }
        assert!("bogus".parse::<ExecutionState>().is_err());
    }

    #[test]
    fn test_state_classification() {
        assert!(ExecutionState::Failed.is_terminal());
        assert!(!ExecutionState::Snoozed.is_terminal());
        assert!(ExecutionState::AwaitingApproval.is_paused());
        assert!(!ExecutionState::Rescued.is_paused());
        assert!(StepState::Skipped.satisfies_dependents());
        assert!(!StepState::Failed.satisfies_dependents());
    }
}
