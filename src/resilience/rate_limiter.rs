//! # Token Bucket Rate Limiter
//!
//! Admission control keyed by scope. Queue, worker-type and global buckets
//! share one mechanism; a step names any subset of them and all must admit
//! before it proceeds. Buckets refill continuously and are process-wide.

use crate::constants::events;
use crate::events::{TelemetryEvent, TelemetrySink};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Which bucket a step draws from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "name")]
pub enum RateLimitScope {
    Queue(String),
    Worker(String),
    Global,
}

impl RateLimitScope {
    pub fn queue(name: impl Into<String>) -> Self {
        RateLimitScope::Queue(name.into())
    }

    pub fn worker(name: impl Into<String>) -> Self {
        RateLimitScope::Worker(name.into())
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitScope::Queue(name) => write!(f, "queue:{name}"),
            RateLimitScope::Worker(name) => write!(f, "worker:{name}"),
            RateLimitScope::Global => f.write_str("global"),
        }
    }
}

/// Bucket parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum burst
    pub capacity: u32,
    /// Tokens restored per second
    pub refill_per_second: f64,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }

    /// `tokens` restored every `interval`
    pub fn per(capacity: u32, tokens: u32, interval: Duration) -> Self {
        let secs = interval.as_secs_f64();
        let rate = if secs > 0.0 { f64::from(tokens) / secs } else { 0.0 };
        Self::new(capacity, rate)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err("refill_per_second must be a positive number".to_string());
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, 100.0)
    }
}

/// Rejection with the wait before a token is available
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit '{scope}' exhausted, retry after {}ms", .retry_after.as_millis())]
pub struct RateLimited {
    pub scope: String,
    pub retry_after: Duration,
}

/// Continuous-refill token bucket
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Starts full
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            tokens: f64::from(config.capacity),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_second)
            .min(f64::from(self.config.capacity));
        self.last_refill = now;
    }

    fn wait_for_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.config.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.config.refill_per_second)
            .unwrap_or(Duration::MAX)
    }

    /// Take one token or report how long until one is available
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.wait_for_token())
        }
    }

    pub fn available(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.config.capacity
    }
}

/// Process-wide limiter holding one bucket per scope
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<RateLimitScope, Arc<Mutex<TokenBucket>>>,
    default_config: RateLimitConfig,
    overrides: HashMap<RateLimitScope, RateLimitConfig>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl RateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            default_config,
            overrides: HashMap::new(),
            sink: None,
        }
    }

    /// Explicit parameters for one scope
    pub fn with_limit(mut self, scope: RateLimitScope, config: RateLimitConfig) -> Self {
        self.overrides.insert(scope, config);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn bucket(&self, scope: &RateLimitScope) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(scope) {
            return Arc::clone(bucket.value());
        }
        let config = self
            .overrides
            .get(scope)
            .copied()
            .unwrap_or(self.default_config);
        let bucket = self
            .buckets
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(config))));
        Arc::clone(bucket.value())
    }

    /// Take a token from a single bucket
    pub fn acquire(&self, scope: &RateLimitScope) -> Result<(), RateLimited> {
        self.acquire_all(std::slice::from_ref(scope))
    }

    /// Take one token from every listed bucket, or from none of them.
    ///
    /// Buckets are locked in scope order so concurrent callers cannot
    /// deadlock. The rejection names the bucket with the longest wait.
    pub fn acquire_all(&self, scopes: &[RateLimitScope]) -> Result<(), RateLimited> {
        if scopes.is_empty() {
            return Ok(());
        }

        let mut ordered: Vec<&RateLimitScope> = scopes.iter().collect();
        ordered.sort();
        ordered.dedup();

        let buckets: Vec<Arc<Mutex<TokenBucket>>> = ordered.iter().map(|s| self.bucket(s)).collect();
        let mut guards: Vec<_> = buckets.iter().map(|b| b.lock()).collect();

        let now = Instant::now();
        let mut worst: Option<(usize, Duration)> = None;
        for (i, guard) in guards.iter_mut().enumerate() {
            guard.refill(now);
            let wait = guard.wait_for_token();
            if !wait.is_zero() && worst.map_or(true, |(_, w)| wait > w) {
                worst = Some((i, wait));
            }
        }

        if let Some((i, retry_after)) = worst {
            drop(guards);
            let scope = ordered[i].to_string();
            debug!(scope = %scope, retry_after_ms = retry_after.as_millis() as u64, "🚦 Rate limit rejected");
            if let Some(sink) = &self.sink {
                sink.emit(
                    TelemetryEvent::new(events::RATE_LIMIT_REJECT)
                        .meta("scope", scope.clone())
                        .measure("retry_after_ms", retry_after.as_millis() as f64),
                );
            }
            return Err(RateLimited { scope, retry_after });
        }

        for guard in guards.iter_mut() {
            guard.tokens -= 1.0;
        }
        Ok(())
    }

    /// Tokens currently available in a bucket
    pub fn available(&self, scope: &RateLimitScope) -> f64 {
        self.bucket(scope).lock().available()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;

    #[tokio::test(start_paused = true)]
    async fn test_exactly_capacity_admitted() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3, 1.0));
        let scope = RateLimitScope::queue("emails");

        for _ in 0..3 {
            assert!(limiter.acquire(&scope).is_ok());
        }
        let rejected = limiter.acquire(&scope).unwrap_err();
        assert_eq!(rejected.scope, "queue:emails");
        assert_eq!(rejected.retry_after, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.acquire(&scope).is_ok());
        assert!(limiter.acquire(&scope).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2, 10.0));
        let scope = RateLimitScope::Global;
        limiter.acquire(&scope).unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((limiter.available(&scope) - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_scopes_must_admit() {
        let limiter = RateLimiter::default()
            .with_limit(RateLimitScope::Global, RateLimitConfig::new(1, 0.5));
        let scopes = [RateLimitScope::worker("mailer"), RateLimitScope::Global];

        assert!(limiter.acquire_all(&scopes).is_ok());
        let before = limiter.available(&RateLimitScope::worker("mailer"));

        let rejected = limiter.acquire_all(&scopes).unwrap_err();
        assert_eq!(rejected.scope, "global");
        assert_eq!(rejected.retry_after, Duration::from_secs(2));

        // a rejected multi-scope acquire consumes nothing
        let after = limiter.available(&RateLimitScope::worker("mailer"));
        assert!((before - after).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rejections_are_reported() {
        let sink = Arc::new(MemorySink::new());
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 0.001)).with_sink(sink.clone());
        let scope = RateLimitScope::queue("q");

        limiter.acquire(&scope).unwrap();
        assert!(limiter.acquire(&scope).is_err());
        assert_eq!(sink.count(events::RATE_LIMIT_REJECT), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::default().validate().is_ok());
        assert!(RateLimitConfig::new(0, 1.0).validate().is_err());
        assert!(RateLimitConfig::new(1, 0.0).validate().is_err());
        assert_eq!(
            RateLimitConfig::per(10, 5, Duration::from_millis(500)).refill_per_second,
            10.0
        );
    }
}
