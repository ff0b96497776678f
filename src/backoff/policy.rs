//! # Retry Policy and Error Taxonomy
//!
//! Classifies step failures into four kinds and maps each kind to a default
//! retry profile:
//!
//! | Kind        | Strategy    | Attempts | Base  | Max   |
//! |-------------|-------------|----------|-------|-------|
//! | `retryable` | exponential | 5        | 1s    | 60s   |
//! | `transient` | fixed       | 3        | 100ms | 100ms |
//! | `degraded`  | exponential | 2        | 5s    | 120s  |
//! | `terminal`  | none        | 1        | -     | -     |

use super::strategy::{BackoffCalculator, BackoffStrategy};
use crate::workflow::StepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Failure taxonomy driving retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, connection errors
    #[default]
    Retryable,
    /// Busy or overloaded dependency
    Transient,
    /// Upstream partially down
    Degraded,
    /// Validation, not-found, unauthorized
    Terminal,
}

impl ErrorKind {
    /// Default retry profile for this kind
    pub fn default_policy(self) -> RetryPolicy {
        match self {
            ErrorKind::Retryable => RetryPolicy::new(5)
                .with_strategy(BackoffStrategy::Exponential)
                .with_base_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(60)),
            ErrorKind::Transient => RetryPolicy::new(3)
                .with_strategy(BackoffStrategy::Fixed)
                .with_base_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(100)),
            ErrorKind::Degraded => RetryPolicy::new(2)
                .with_strategy(BackoffStrategy::Exponential)
                .with_base_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(120)),
            ErrorKind::Terminal => RetryPolicy::none(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::Transient => "transient",
            ErrorKind::Degraded => "degraded",
            ErrorKind::Terminal => "terminal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an error may succeed if the operation is attempted again
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for ErrorKind {
    fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::Terminal)
    }
}

impl Recoverable for std::io::Error {
    fn is_recoverable(&self) -> bool {
        classify_io_error(self).is_recoverable()
    }
}

impl Recoverable for tokio::time::error::Elapsed {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Map an I/O error onto the taxonomy
pub fn classify_io_error(error: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;
    match error.kind() {
        Io::TimedOut
        | Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::BrokenPipe
        | Io::UnexpectedEof => ErrorKind::Retryable,
        Io::WouldBlock | Io::Interrupted | Io::AddrInUse => ErrorKind::Transient,
        Io::NotFound | Io::PermissionDenied | Io::InvalidInput | Io::InvalidData
        | Io::Unsupported | Io::AlreadyExists => ErrorKind::Terminal,
        _ => ErrorKind::Retryable,
    }
}

type RecoverablePredicate = Arc<dyn Fn(&StepError) -> bool + Send + Sync>;

/// Per-step retry configuration
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retry)
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 - 1.0
    pub jitter: f64,
    recoverable: Option<RecoverablePredicate>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            recoverable: None,
        }
    }

    /// Single attempt, never retried
    pub fn none() -> Self {
        Self::new(1).with_strategy(BackoffStrategy::Fixed)
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Override the default recoverability check
    pub fn recoverable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&StepError) -> bool + Send + Sync + 'static,
    {
        self.recoverable = Some(Arc::new(predicate));
        self
    }

    pub fn is_recoverable(&self, error: &StepError) -> bool {
        match &self.recoverable {
            Some(predicate) => predicate(error),
            None => error.is_recoverable(),
        }
    }

    /// Whether another attempt should follow the failed `attempt` (1-based)
    pub fn should_retry(&self, error: &StepError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.is_recoverable(error)
    }

    pub fn calculator(&self) -> BackoffCalculator {
        BackoffCalculator::new(self.strategy, self.base_delay, self.max_delay, self.jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ErrorKind::Retryable.default_policy()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("strategy", &self.strategy)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("custom_recoverable", &self.recoverable.is_some())
            .finish()
    }
}

/// Retry policy per error kind, used for steps without an explicit policy
#[derive(Debug, Clone)]
pub struct RetryProfiles {
    pub retryable: RetryPolicy,
    pub transient: RetryPolicy,
    pub degraded: RetryPolicy,
    pub terminal: RetryPolicy,
}

impl RetryProfiles {
    pub fn for_kind(&self, kind: ErrorKind) -> &RetryPolicy {
        match kind {
            ErrorKind::Retryable => &self.retryable,
            ErrorKind::Transient => &self.transient,
            ErrorKind::Degraded => &self.degraded,
            ErrorKind::Terminal => &self.terminal,
        }
    }

    /// Every kind gets a single attempt
    pub fn no_retries() -> Self {
        Self {
            retryable: RetryPolicy::none(),
            transient: RetryPolicy::none(),
            degraded: RetryPolicy::none(),
            terminal: RetryPolicy::none(),
        }
    }
}

impl Default for RetryProfiles {
    fn default() -> Self {
        Self {
            retryable: ErrorKind::Retryable.default_policy(),
            transient: ErrorKind::Transient.default_policy(),
            degraded: ErrorKind::Degraded.default_policy(),
            terminal: ErrorKind::Terminal.default_policy(),
        }
    }
}
