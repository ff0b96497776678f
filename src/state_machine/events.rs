use serde::{Deserialize, Serialize};

/// Events that can trigger execution state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Begin driving partitions
    Start,
    /// Every partition finished
    Complete,
    /// A step asked for a graceful stop
    Halt(String),
    /// Retries exhausted or a deadline passed
    Fail(String),
    Cancel,
    /// A step returned `Await`
    Await(String),
    /// A step returned `Snooze`
    Snooze,
    /// External resume or timer fire
    Resume,
    /// Lifeline found a stale heartbeat
    Rescue,
}

impl ExecutionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Halt(_) => "halt",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
            Self::Await(_) => "await",
            Self::Snooze => "snooze",
            Self::Resume => "resume",
            Self::Rescue => "rescue",
        }
    }

    /// Reason carried by halt, fail and await events
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Halt(reason) | Self::Fail(reason) | Self::Await(reason) => Some(reason),
            _ => None,
        }
    }
}
