//! # Circuit Breaker Implementation
//!
//! Fault isolation for named dependencies. Three states: Closed (normal
//! operation), Open (failing fast) and Half-Open (a bounded number of trial
//! calls test recovery).
//!
//! The state byte is atomic so `state()` is lock-free; transitions and
//! counters are serialized by a per-circuit mutex. Callers either wrap an
//! operation with [`CircuitBreaker::call`] or take a [`CircuitPermit`] and
//! settle it once the outcome is known.

use crate::constants::events;
use crate::events::{TelemetryEvent, TelemetrySink};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Rejection returned while the circuit refuses calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Circuit breaker is open for {component}")]
pub struct CircuitOpenError {
    pub component: String,
    /// Time until the next trial call is admitted, when known
    pub retry_after: Option<Duration>,
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug)]
struct Inner {
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    /// Bumped on every transition so stale permits do not touch new windows
    generation: u64,
    metrics: CircuitBreakerMetrics,
}

/// Proof of admission; settle with `success` or `failure`.
///
/// Dropping an unsettled permit frees its half-open slot without counting
/// an outcome.
#[must_use = "a permit must be settled with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    generation: u64,
    started: Instant,
    settled: bool,
}

impl CircuitPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker
            .record_success(self.half_open, self.generation, self.started.elapsed());
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker
            .record_failure(self.half_open, self.generation, self.started.elapsed());
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.half_open {
            self.breaker.release_probe(self.generation);
        }
    }
}

/// Core circuit breaker implementation with atomic state reads
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(Inner {
                opened_at: None,
                half_open_in_flight: 0,
                generation: 0,
                metrics: CircuitBreakerMetrics::new(),
            }),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Ask for admission without invoking anything.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// admits this caller as a trial call.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, CircuitOpenError> {
        let mut inner = self.inner.lock();
        let mut transition = None;

        let admitted = match self.state() {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < self.config.reset_timeout => None,
                    _ => {
                        transition = Some(self.transition(&mut inner, CircuitState::HalfOpen));
                        inner.half_open_in_flight += 1;
                        Some(true)
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Some(true)
                } else {
                    None
                }
            }
        };

        let result = match admitted {
            Some(half_open) => Ok(CircuitPermit {
                breaker: self,
                half_open,
                generation: inner.generation,
                started: Instant::now(),
                settled: false,
            }),
            None => {
                inner.metrics.rejected_count += 1;
                let retry_after = inner
                    .opened_at
                    .map(|at| self.config.reset_timeout.saturating_sub(at.elapsed()));
                Err(CircuitOpenError {
                    component: self.name.clone(),
                    retry_after,
                })
            }
        };
        drop(inner);

        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
        if let Err(rejection) = &result {
            debug!(component = %self.name, "⛔ Circuit breaker rejected call");
            self.emit(
                TelemetryEvent::new(events::CIRCUIT_REJECT)
                    .meta("circuit", self.name.clone())
                    .meta("state", self.state().as_str())
                    .measure(
                        "retry_after_ms",
                        rejection.retry_after.map_or(0.0, |d| d.as_millis() as f64),
                    ),
            );
        }
        result
    }

    fn record_success(&self, half_open: bool, generation: u64, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🟢 Operation succeeded"
        );

        let mut transition = None;
        match self.state() {
            CircuitState::HalfOpen if half_open && generation == inner.generation => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.metrics.half_open_successes += 1;
                if inner.metrics.half_open_successes >= u64::from(self.config.success_threshold) {
                    transition = Some(self.transition(&mut inner, CircuitState::Closed));
                }
            }
            CircuitState::Closed => {
                inner.metrics.consecutive_failures = 0;
            }
            _ => {}
        }
        drop(inner);

        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
    }

    fn record_failure(&self, half_open: bool, generation: u64, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;

        error!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🔴 Operation failed"
        );

        let mut transition = None;
        match self.state() {
            CircuitState::Closed => {
                inner.metrics.consecutive_failures += 1;
                if inner.metrics.consecutive_failures >= u64::from(self.config.failure_threshold) {
                    transition = Some(self.transition(&mut inner, CircuitState::Open));
                }
            }
            CircuitState::HalfOpen if half_open && generation == inner.generation => {
                // any trial failure reopens and restarts the timer
                transition = Some(self.transition(&mut inner, CircuitState::Open));
            }
            _ => {}
        }
        let failures = inner.metrics.consecutive_failures;
        drop(inner);

        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
            self.emit(
                TelemetryEvent::new(events::CIRCUIT_TRIP)
                    .meta("circuit", self.name.clone())
                    .measure("consecutive_failures", failures as f64),
            );
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if generation == inner.generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Apply a transition under the lock; returns `(from, to)` for telemetry
    fn transition(&self, inner: &mut Inner, to: CircuitState) -> (CircuitState, CircuitState) {
        let from = self.state();
        self.state.store(to as u8, Ordering::Release);
        inner.generation += 1;
        inner.half_open_in_flight = 0;
        inner.metrics.half_open_successes = 0;

        match to {
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.metrics.consecutive_failures = 0;
                info!(
                    component = %self.name,
                    total_calls = inner.metrics.total_calls,
                    "🟢 Circuit breaker closed (recovered)"
                );
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.metrics.trips += 1;
                error!(
                    component = %self.name,
                    consecutive_failures = inner.metrics.consecutive_failures,
                    failure_threshold = self.config.failure_threshold,
                    reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                    "🔴 Circuit breaker opened (failing fast)"
                );
            }
            CircuitState::HalfOpen => {
                info!(
                    component = %self.name,
                    success_threshold = self.config.success_threshold,
                    "🟡 Circuit breaker half-open (testing recovery)"
                );
            }
        }
        (from, to)
    }

    fn emit_transition(&self, from: CircuitState, to: CircuitState) {
        self.emit(
            TelemetryEvent::new(events::CIRCUIT_STATE_CHANGE)
                .meta("circuit", self.name.clone())
                .meta("from", from.as_str())
                .meta("to", to.as_str()),
        );
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let transition = self.transition(&mut self.inner.lock(), CircuitState::Open);
        self.emit_transition(transition.0, transition.1);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let transition = self.transition(&mut self.inner.lock(), CircuitState::Closed);
        self.emit_transition(transition.0, transition.1);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        inner.metrics.clone().with_derived(self.state())
    }

    /// Closed with a failure rate under 10% (or too few calls to tell)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }
        let metrics = self.metrics();
        metrics.total_calls < 10 || metrics.failure_rate < 0.1
    }
}
