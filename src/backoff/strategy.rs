//! # Backoff Strategies
//!
//! Pure delay computation for retry scheduling. Every strategy is clamped to
//! `max`, and the optional `jitter` factor perturbs the result by up to
//! `±jitter * delay` before the final clamp.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry delay strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always `base`
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt-1)`
    #[default]
    Exponential,
    /// `random(base, previous * 3)`
    DecorrelatedJitter,
    /// `random(0, exponential(attempt))`
    FullJitter,
    /// `exponential(attempt)/2 + random(0, exponential(attempt)/2)`
    EqualJitter,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
            BackoffStrategy::DecorrelatedJitter => write!(f, "decorrelated_jitter"),
            BackoffStrategy::FullJitter => write!(f, "full_jitter"),
            BackoffStrategy::EqualJitter => write!(f, "equal_jitter"),
        }
    }
}

/// Exponential component shared by the jittered strategies, clamped to `max`
pub fn exponential(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.max(1).saturating_sub(1).min(63);
    scale(base, 1u128 << exponent, max)
}

/// Deterministic delay for `fixed`, `linear` and `exponential`.
///
/// Jittered strategies return their upper bound here.
pub fn base_delay(strategy: BackoffStrategy, attempt: u32, base: Duration, max: Duration) -> Duration {
    let attempt = attempt.max(1);
    match strategy {
        BackoffStrategy::Fixed => base.min(max),
        BackoffStrategy::Linear => scale(base, u128::from(attempt), max),
        BackoffStrategy::Exponential
        | BackoffStrategy::FullJitter
        | BackoffStrategy::EqualJitter => exponential(attempt, base, max),
        BackoffStrategy::DecorrelatedJitter => base.min(max),
    }
}

/// Compute a retry delay.
///
/// `previous` seeds the decorrelated strategy (defaults to `base` on the first
/// retry) and is ignored by the others.
pub fn delay<R: Rng + ?Sized>(
    strategy: BackoffStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter: f64,
    previous: Option<Duration>,
    rng: &mut R,
) -> Duration {
    let raw = match strategy {
        BackoffStrategy::Fixed | BackoffStrategy::Linear | BackoffStrategy::Exponential => {
            base_delay(strategy, attempt, base, max)
        }
        BackoffStrategy::DecorrelatedJitter => {
            let low = base.min(max).as_secs_f64();
            let prev = previous.unwrap_or(base).as_secs_f64();
            let high = (prev * 3.0).min(max.as_secs_f64()).max(low);
            clamp_secs(uniform(rng, low, high), max)
        }
        BackoffStrategy::FullJitter => {
            let cap = exponential(attempt, base, max).as_secs_f64();
            clamp_secs(uniform(rng, 0.0, cap), max)
        }
        BackoffStrategy::EqualJitter => {
            let half = exponential(attempt, base, max).as_secs_f64() / 2.0;
            clamp_secs(half + uniform(rng, 0.0, half), max)
        }
    };

    apply_jitter(raw, jitter, max, rng)
}

/// Perturb a delay by `±jitter * delay`, clamped to `[0, max]`
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, jitter: f64, max: Duration, rng: &mut R) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || delay.is_zero() {
        return delay.min(max);
    }
    let factor = 1.0 + uniform(rng, -jitter, jitter);
    clamp_secs(delay.as_secs_f64() * factor, max)
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high <= low {
        low
    } else {
        rng.gen_range(low..=high)
    }
}

fn scale(base: Duration, factor: u128, max: Duration) -> Duration {
    let nanos = base.as_nanos().saturating_mul(factor).min(max.as_nanos());
    from_nanos(nanos)
}

fn from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else if secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Stateful calculator that remembers the previous delay for the
/// decorrelated strategy
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    strategy: BackoffStrategy,
    base: Duration,
    max: Duration,
    jitter: f64,
    previous: Option<Duration>,
}

impl BackoffCalculator {
    pub fn new(strategy: BackoffStrategy, base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            strategy,
            base,
            max,
            jitter,
            previous: None,
        }
    }

    /// Delay before the retry that follows `attempt` (1-based)
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.next_delay_with(attempt, &mut rng)
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, attempt: u32, rng: &mut R) -> Duration {
        let next = delay(
            self.strategy,
            attempt,
            self.base,
            self.max,
            self.jitter,
            self.previous,
            rng,
        );
        self.previous = Some(next);
        next
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
