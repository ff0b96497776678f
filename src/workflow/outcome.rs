//! Step outcomes and step-level errors.

use crate::backoff::{classify_io_error, ErrorKind, Recoverable};
use crate::context::{patch_from, Patch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure value produced by a step, its timeout, or the resilience gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Degraded, message)
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Terminal, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::retryable(format!("step timed out after {}ms", after.as_millis())).with_code("timeout")
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::retryable(message).with_code("panic")
    }

    pub fn circuit_open(circuit: &str) -> Self {
        Self::transient(format!("circuit '{circuit}' is open")).with_code("circuit_open")
    }

    pub fn rate_limited(scope: &str, retry_after: Duration) -> Self {
        Self::transient(format!(
            "rate limit '{scope}' exhausted, retry after {}ms",
            retry_after.as_millis()
        ))
        .with_code("rate_limited")
    }

    pub fn cancelled() -> Self {
        Self::terminal("execution cancelled").with_code("cancelled")
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == ErrorKind::Terminal
    }

    /// Classify an arbitrary error raised by step code
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        if let Some(step) = error.downcast_ref::<StepError>() {
            return step.clone();
        }
        if let Some(io) = error.downcast_ref::<std::io::Error>() {
            return Self::new(classify_io_error(io), format!("{error:#}")).with_code("io");
        }
        if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Self::retryable(format!("{error:#}")).with_code("timeout");
        }
        Self::retryable(format!("{error:#}"))
    }
}

impl Recoverable for StepError {
    fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl From<anyhow::Error> for StepError {
    fn from(error: anyhow::Error) -> Self {
        Self::from_anyhow(&error)
    }
}

/// Options attached to an `Await` outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwaitOptions {
    pub reason: String,
    /// Fail the execution if no resume arrives within this window
    #[serde(default, with = "duration_ms_opt")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub metadata: Value,
}

impl AwaitOptions {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timeout: None,
            metadata: Value::Null,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of one step invocation
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Success; the patch is merged into the context
    Ok(Patch),
    /// Failure offered to the retry policy
    Error(StepError),
    /// Graceful stop without rollback
    Halt(String),
    /// Explicit retry request, counted against the retry budget
    Retry(String),
    /// Recorded as skipped; dependents stay eligible
    Skip(String),
    /// Pause until resumed externally
    Await(AwaitOptions),
    /// Pause and resume automatically after the duration
    Snooze(Duration),
}

impl StepOutcome {
    /// Success with a patch built from a JSON object
    pub fn ok(value: Value) -> Self {
        StepOutcome::Ok(patch_from(value))
    }

    /// Success without context changes
    pub fn done() -> Self {
        StepOutcome::Ok(Patch::new())
    }

    pub fn error(error: StepError) -> Self {
        StepOutcome::Error(error)
    }

    pub fn halt(reason: impl Into<String>) -> Self {
        StepOutcome::Halt(reason.into())
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        StepOutcome::Retry(reason.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        StepOutcome::Skip(reason.into())
    }

    pub fn await_input(options: AwaitOptions) -> Self {
        StepOutcome::Await(options)
    }

    pub fn snooze(duration: Duration) -> Self {
        StepOutcome::Snooze(duration)
    }

    /// Lift an `anyhow` result from step code
    pub fn from_result(result: anyhow::Result<Patch>) -> Self {
        match result {
            Ok(patch) => StepOutcome::Ok(patch),
            Err(error) => StepOutcome::Error(StepError::from_anyhow(&error)),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepOutcome::Ok(_) => "ok",
            StepOutcome::Error(_) => "error",
            StepOutcome::Halt(_) => "halt",
            StepOutcome::Retry(_) => "retry",
            StepOutcome::Skip(_) => "skip",
            StepOutcome::Await(_) => "await",
            StepOutcome::Snooze(_) => "snooze",
        }
    }
}

impl From<Result<Patch, StepError>> for StepOutcome {
    fn from(result: Result<Patch, StepError>) -> Self {
        match result {
            Ok(patch) => StepOutcome::Ok(patch),
            Err(error) => StepOutcome::Error(error),
        }
    }
}

pub(crate) mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
