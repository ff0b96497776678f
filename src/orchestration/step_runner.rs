//! # Step Runner
//!
//! Drives a single step to a final outcome. Each attempt passes through the
//! same gates in a fixed order:
//!
//! 1. rate-limit admission (every bucket the step names must admit)
//! 2. circuit-breaker gating
//! 3. timeout-bounded invocation of the handler, with panics caught
//!
//! `Error` and `Retry` outcomes are offered to the retry policy (the step's
//! own, the workflow default, or the profile for the error's kind). Once
//! retries are exhausted the step's fallback, if any, gets the last word.

use crate::backoff::{BackoffCalculator, RetryPolicy, RetryProfiles};
use crate::constants::events;
use crate::context::Context;
use crate::events::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::resilience::{CircuitBreakerManager, RateLimiter};
use crate::workflow::{Step, StepContext, StepError, StepOutcome, Workflow};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Inputs for one step run
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub execution_id: Uuid,
    /// Pre-partition context snapshot
    pub context: Arc<Context>,
    /// Attempts already spent by earlier runs of this step
    pub prior_attempts: u32,
    pub resume_input: Option<Value>,
    pub cancellation: CancellationToken,
}

/// Final outcome of a step run
#[derive(Debug, Clone, PartialEq)]
pub struct StepRun {
    pub step: String,
    /// Never `Retry`
    pub outcome: StepOutcome,
    /// Total attempts including `prior_attempts`
    pub attempts: u32,
    pub duration: Duration,
}

/// Executes steps with rate limiting, circuit breaking, timeouts and retries
pub struct StepRunner {
    circuits: Arc<CircuitBreakerManager>,
    rate_limiter: Arc<RateLimiter>,
    profiles: RetryProfiles,
    rate_limit_max_wait: Duration,
    sink: Arc<dyn TelemetrySink>,
}

impl StepRunner {
    pub fn new(circuits: Arc<CircuitBreakerManager>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            circuits,
            rate_limiter,
            profiles: RetryProfiles::default(),
            rate_limit_max_wait: Duration::from_secs(1),
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_profiles(mut self, profiles: RetryProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    /// Longest a step waits for rate-limit tokens before the attempt fails
    pub fn with_rate_limit_max_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_max_wait = wait;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn circuits(&self) -> &Arc<CircuitBreakerManager> {
        &self.circuits
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Run `step` until it produces a final outcome
    pub async fn run(&self, workflow: &Workflow, step: &Step, invocation: StepInvocation) -> StepRun {
        let started = Instant::now();
        let explicit = workflow.step_retry(step).cloned();
        let mut calculator: Option<BackoffCalculator> = None;
        let mut attempt = invocation.prior_attempts;

        loop {
            attempt += 1;
            self.emit(
                TelemetryEvent::new(events::STEP_START)
                    .meta("execution_id", invocation.execution_id.to_string())
                    .meta("workflow", workflow.name())
                    .meta("step", step.name())
                    .measure("attempt", f64::from(attempt)),
            );

            let attempt_started = Instant::now();
            let outcome = self.attempt(workflow, step, &invocation, attempt).await;

            let error = match outcome {
                StepOutcome::Error(error) => error,
                StepOutcome::Retry(reason) => StepError::retryable(reason).with_code("retry_requested"),
                settled => {
                    self.emit_stop(workflow, step, &invocation, &settled, attempt_started.elapsed());
                    // A pause is not a failed attempt; the resumed run re-enters with the same number
                    let spent = match settled {
                        StepOutcome::Snooze(_) | StepOutcome::Await(_) => attempt - 1,
                        _ => attempt,
                    };
                    return self.finish(step, settled, spent, started);
                }
            };

            if invocation.cancellation.is_cancelled() {
                return self.finish(step, StepOutcome::Error(StepError::cancelled()), attempt, started);
            }

            let policy: &RetryPolicy = explicit
                .as_ref()
                .unwrap_or_else(|| self.profiles.for_kind(error.kind));

            if policy.should_retry(&error, attempt) {
                let calculator = calculator.get_or_insert_with(|| policy.calculator());
                let delay = calculator.next_delay(attempt);
                debug!(
                    execution_id = %invocation.execution_id,
                    step = step.name(),
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "🔁 Retrying step"
                );
                self.emit(
                    TelemetryEvent::new(events::STEP_RETRY)
                        .meta("execution_id", invocation.execution_id.to_string())
                        .meta("workflow", workflow.name())
                        .meta("step", step.name())
                        .meta("error", error.message.clone())
                        .meta("kind", error.kind.as_str())
                        .measure("attempt", f64::from(attempt))
                        .measure("delay_ms", delay.as_millis() as f64),
                );

                tokio::select! {
                    _ = invocation.cancellation.cancelled() => {
                        return self.finish(step, StepOutcome::Error(StepError::cancelled()), attempt, started);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            warn!(
                execution_id = %invocation.execution_id,
                step = step.name(),
                attempts = attempt,
                error = %error,
                "❌ Step failed"
            );
            self.emit(
                TelemetryEvent::new(events::STEP_EXCEPTION)
                    .meta("execution_id", invocation.execution_id.to_string())
                    .meta("workflow", workflow.name())
                    .meta("step", step.name())
                    .meta("error", error.message.clone())
                    .meta("kind", error.kind.as_str())
                    .measure("attempts", f64::from(attempt))
                    .measure("duration_ms", started.elapsed().as_secs_f64() * 1000.0),
            );

            let outcome = match step.fallback_fn() {
                Some(fallback) => match fallback(&invocation.context, &error) {
                    StepOutcome::Retry(_) => StepOutcome::Error(error),
                    recovered => {
                        debug!(step = step.name(), outcome = recovered.kind(), "🪂 Fallback applied");
                        recovered
                    }
                },
                None => StepOutcome::Error(error),
            };
            return self.finish(step, outcome, attempt, started);
        }
    }

    async fn attempt(&self, workflow: &Workflow, step: &Step, invocation: &StepInvocation, attempt: u32) -> StepOutcome {
        if let Err(error) = self.admit(step, &invocation.cancellation).await {
            return StepOutcome::Error(error);
        }

        let breaker = step
            .circuit_name()
            .filter(|_| self.circuits.is_enabled())
            .map(|name| self.circuits.get_circuit_breaker(name));
        let permit = match breaker.as_deref().map(|b| b.try_acquire()).transpose() {
            Ok(permit) => permit,
            Err(open) => return StepOutcome::Error(StepError::circuit_open(&open.component)),
        };

        let ctx = StepContext::new(
            invocation.execution_id,
            workflow.name(),
            step.name(),
            attempt,
            Arc::clone(&invocation.context),
            invocation.cancellation.clone(),
        )
        .with_resume_input(invocation.resume_input.clone());

        let outcome = invoke(step, ctx, workflow.step_timeout(step)).await;

        if let Some(permit) = permit {
            match &outcome {
                StepOutcome::Error(error) if error.code.as_deref() == Some("cancelled") => drop(permit),
                StepOutcome::Error(_) | StepOutcome::Retry(_) => permit.failure(),
                _ => permit.success(),
            }
        }
        outcome
    }

    /// Wait for tokens from every bucket the step names, up to the max wait
    async fn admit(&self, step: &Step, cancellation: &CancellationToken) -> Result<(), StepError> {
        if step.rate_limits().is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let deadline = now.checked_add(self.rate_limit_max_wait).unwrap_or(now);

        loop {
            let limited = match self.rate_limiter.acquire_all(step.rate_limits()) {
                Ok(()) => return Ok(()),
                Err(limited) => limited,
            };
            let fits = Instant::now()
                .checked_add(limited.retry_after)
                .is_some_and(|ready| ready <= deadline);
            if !fits {
                return Err(StepError::rate_limited(&limited.scope, limited.retry_after));
            }
            tokio::select! {
                _ = cancellation.cancelled() => return Err(StepError::cancelled()),
                _ = tokio::time::sleep(limited.retry_after) => {}
            }
        }
    }

    fn finish(&self, step: &Step, outcome: StepOutcome, attempts: u32, started: Instant) -> StepRun {
        StepRun {
            step: step.name().to_string(),
            outcome,
            attempts,
            duration: started.elapsed(),
        }
    }

    fn emit_stop(&self, workflow: &Workflow, step: &Step, invocation: &StepInvocation, outcome: &StepOutcome, elapsed: Duration) {
        self.emit(
            TelemetryEvent::new(events::STEP_STOP)
                .meta("execution_id", invocation.execution_id.to_string())
                .meta("workflow", workflow.name())
                .meta("step", step.name())
                .meta("outcome", outcome.kind())
                .measure("duration_ms", elapsed.as_secs_f64() * 1000.0),
        );
    }

    fn emit(&self, event: TelemetryEvent) {
        self.sink.emit(event);
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("profiles", &self.profiles)
            .field("rate_limit_max_wait", &self.rate_limit_max_wait)
            .finish_non_exhaustive()
    }
}

/// Invoke the handler once, converting panics and timeouts into errors
async fn invoke(step: &Step, ctx: StepContext, timeout: Option<Duration>) -> StepOutcome {
    let handler = Arc::clone(step.handler());
    let guarded = AssertUnwindSafe(handler.run(ctx)).catch_unwind().map(|result| match result {
        Ok(outcome) => outcome,
        Err(panic) => StepOutcome::Error(StepError::panicked(panic_message(panic.as_ref()))),
    });

    match timeout {
        Some(limit) => tokio::time::timeout(limit, guarded)
            .await
            .unwrap_or_else(|_| StepOutcome::Error(StepError::timeout(limit))),
        None => guarded.await,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("step panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("step panicked: {message}")
    } else {
        "step panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffStrategy;
    use crate::events::MemorySink;
    use crate::resilience::{CircuitBreakerConfig, CircuitState, RateLimitConfig, RateLimitScope};
    use crate::workflow::Step;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runner() -> StepRunner {
        StepRunner::new(
            Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(30),
                success_threshold: 1,
                half_open_max_calls: 1,
            })),
            Arc::new(RateLimiter::default()),
        )
    }

    fn invocation() -> StepInvocation {
        StepInvocation {
            execution_id: Uuid::new_v4(),
            context: Arc::new(Context::new()),
            prior_attempts: 0,
            resume_input: None,
            cancellation: CancellationToken::new(),
        }
    }

    fn single(step: Step) -> Workflow {
        Workflow::builder("wf").step(step).build().unwrap()
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts)
            .with_strategy(BackoffStrategy::Fixed)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let workflow = single(
            Step::from_fn("flaky", move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        StepOutcome::error(StepError::retryable("not yet"))
                    } else {
                        StepOutcome::ok(json!({"done": true}))
                    }
                }
            })
            .retry(fast_retry(5)),
        );

        let sink = Arc::new(MemorySink::new());
        let runner = runner().with_sink(sink.clone());
        let step = workflow.step("flaky").unwrap();
        let run = runner.run(&workflow, step, invocation()).await;

        assert!(run.outcome.is_ok());
        assert_eq!(run.attempts, 3);
        assert_eq!(sink.count(events::STEP_RETRY), 2);
        assert_eq!(sink.count(events::STEP_STOP), 1);
    }

    #[tokio::test]
    async fn test_pause_does_not_spend_an_attempt() {
        let workflow = single(
            Step::from_fn("nap", |_ctx| async { StepOutcome::snooze(Duration::from_secs(5)) }).retry(fast_retry(2)),
        );
        let mut resumed = invocation();
        resumed.prior_attempts = 1;

        let first = runner().run(&workflow, workflow.step("nap").unwrap(), invocation()).await;
        let again = runner().run(&workflow, workflow.step("nap").unwrap(), resumed).await;

        assert!(matches!(first.outcome, StepOutcome::Snooze(_)));
        assert_eq!(first.attempts, 0);
        assert_eq!(again.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_skips_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let workflow = single(
            Step::from_fn("validate", move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { StepOutcome::error(StepError::terminal("bad input")) }
            })
            .retry(fast_retry(5)),
        );

        let run = runner().run(&workflow, workflow.step("validate").unwrap(), invocation()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(run.outcome, StepOutcome::Error(ref e) if e.is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_fallback() {
        let workflow = single(
            Step::from_fn("slow", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                StepOutcome::done()
            })
            .timeout(Duration::from_millis(50))
            .retry(RetryPolicy::none())
            .fallback(|_ctx, error| {
                assert_eq!(error.code.as_deref(), Some("timeout"));
                StepOutcome::ok(json!({"cached": true}))
            }),
        );

        let run = runner().run(&workflow, workflow.step("slow").unwrap(), invocation()).await;
        assert_eq!(run.outcome, StepOutcome::ok(json!({"cached": true})));
    }

    #[tokio::test]
    async fn test_panics_become_errors() {
        let workflow = single(
            Step::from_fn("boom", |ctx: StepContext| async move {
                if ctx.attempt > 0 {
                    panic!("kaboom");
                }
                StepOutcome::done()
            })
            .retry(RetryPolicy::none()),
        );

        let run = runner().run(&workflow, workflow.step("boom").unwrap(), invocation()).await;
        match run.outcome {
            StepOutcome::Error(error) => {
                assert_eq!(error.code.as_deref(), Some("panic"));
                assert!(error.message.contains("kaboom"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_invoking() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let workflow = single(
            Step::from_fn("call_api", move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { StepOutcome::error(StepError::retryable("503")) }
            })
            .circuit("payments")
            .retry(RetryPolicy::none()),
        );
        let runner = runner();
        let step = workflow.step("call_api").unwrap();

        runner.run(&workflow, step, invocation()).await;
        runner.run(&workflow, step, invocation()).await;
        assert_eq!(runner.circuits().get_state("payments"), Some(CircuitState::Open));

        let run = runner.run(&workflow, step, invocation()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(run.outcome, StepOutcome::Error(ref e) if e.code.as_deref() == Some("circuit_open")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejects_beyond_max_wait() {
        let limiter = RateLimiter::default()
            .with_limit(RateLimitScope::queue("emails"), RateLimitConfig::new(1, 0.1));
        let runner = StepRunner::new(Arc::new(CircuitBreakerManager::disabled()), Arc::new(limiter))
            .with_rate_limit_max_wait(Duration::from_millis(100));
        let workflow = single(
            Step::from_fn("send", |_ctx| async { StepOutcome::done() })
                .rate_limit(RateLimitScope::queue("emails"))
                .retry(RetryPolicy::none()),
        );
        let step = workflow.step("send").unwrap();

        assert!(runner.run(&workflow, step, invocation()).await.outcome.is_ok());
        let second = runner.run(&workflow, step, invocation()).await;
        assert!(matches!(second.outcome, StepOutcome::Error(ref e) if e.code.as_deref() == Some("rate_limited")));
    }

    #[tokio::test]
    async fn test_explicit_retry_request_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let workflow = single(
            Step::from_fn("poll", move |_ctx| {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        StepOutcome::retry("not ready")
                    } else {
                        StepOutcome::done()
                    }
                }
            })
            .retry(fast_retry(2).with_base_delay(Duration::ZERO).with_max_delay(Duration::ZERO)),
        );

        let run = runner().run(&workflow, workflow.step("poll").unwrap(), invocation()).await;
        assert!(run.outcome.is_ok());
        assert_eq!(run.attempts, 2);
    }
}
