//! # Sagaflow Configuration
//!
//! Every tunable of the orchestration core in one serde structure. All
//! sections carry defaults, so an empty (or missing) file yields
//! [`SagaflowConfig::default()`]. Durations are stored as `*_ms` integers and
//! exposed as [`Duration`] through accessor methods.
//!
//! ```rust,no_run
//! use sagaflow::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_directory("config", "production")?;
//! let lease_ttl = manager.config().leader.lease_ttl();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::backoff::{BackoffStrategy, RetryPolicy, RetryProfiles};
use crate::constants::system;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerManager, RateLimitConfig, RateLimitScope, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaflowConfig {
    pub engine: EngineSettings,
    pub backoff: BackoffSettings,
    pub circuit_breakers: CircuitBreakerSettings,
    pub rate_limits: RateLimitSettings,
    pub leader: LeaderSettings,
    pub lifeline: LifelineSettings,
    pub dead_letter: DeadLetterSettings,
    pub telemetry: TelemetrySettings,
    pub scheduler: SchedulerSettings,
    pub logging: LoggingSettings,
}

impl SagaflowConfig {
    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.backoff.validate()?;
        self.circuit_breakers.validate()?;
        self.rate_limits.validate()?;
        self.leader.validate()?;
        self.lifeline.validate()?;

        if self.telemetry.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "telemetry.channel_capacity",
                "0",
                "must be greater than 0",
            ));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.tick_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Generated per process when unset
    pub node_id: Option<String>,
    /// Concurrent steps within one partition
    pub max_parallel_steps: usize,
    /// Execution heartbeat cadence while a partition runs
    pub heartbeat_interval_ms: u64,
    /// Longest a step waits for a rate-limit token before failing transiently
    pub rate_limit_max_wait_ms: u64,
}

impl EngineSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rate_limit_max_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_max_wait_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_parallel_steps == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.max_parallel_steps",
                "0",
                "must be greater than 0",
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.heartbeat_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }
        if matches!(&self.node_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigurationError::invalid_value("engine.node_id", "", "must not be blank"));
        }
        Ok(())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            node_id: None,
            max_parallel_steps: 16,
            heartbeat_interval_ms: 5_000,
            rate_limit_max_wait_ms: 1_000,
        }
    }
}

/// One retry profile as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryProfileSettings {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: f64,
}

impl RetryProfileSettings {
    fn new(max_attempts: u32, strategy: BackoffStrategy, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            strategy,
            base_delay_ms,
            max_delay_ms,
            jitter: 0.0,
        }
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_strategy(self.strategy)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }

    fn validate(&self, section: &str) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("backoff.{section}.max_attempts"),
                "0",
                "must be at least 1",
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                format!("backoff.{section}.base_delay_ms"),
                self.base_delay_ms.to_string(),
                format!("must not exceed max_delay_ms ({})", self.max_delay_ms),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigurationError::invalid_value(
                format!("backoff.{section}.jitter"),
                self.jitter.to_string(),
                "must be within [0.0, 1.0]",
            ));
        }
        Ok(())
    }
}

/// Retry profiles per error kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub retryable: RetryProfileSettings,
    pub transient: RetryProfileSettings,
    pub degraded: RetryProfileSettings,
    pub terminal: RetryProfileSettings,
}

impl BackoffSettings {
    pub fn profiles(&self) -> RetryProfiles {
        RetryProfiles {
            retryable: self.retryable.to_policy(),
            transient: self.transient.to_policy(),
            degraded: self.degraded.to_policy(),
            terminal: self.terminal.to_policy(),
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        self.retryable.validate("retryable")?;
        self.transient.validate("transient")?;
        self.degraded.validate("degraded")?;
        self.terminal.validate("terminal")
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            retryable: RetryProfileSettings::new(5, BackoffStrategy::Exponential, 1_000, 60_000),
            transient: RetryProfileSettings::new(3, BackoffStrategy::Fixed, 100, 100),
            degraded: RetryProfileSettings::new(2, BackoffStrategy::Exponential, 5_000, 120_000),
            terminal: RetryProfileSettings::new(1, BackoffStrategy::Fixed, 1_000, 60_000),
        }
    }
}

/// Parameters for one circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerComponentSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl CircuitBreakerComponentSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            success_threshold: self.success_threshold,
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

impl Default for CircuitBreakerComponentSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            reset_timeout_ms: defaults.reset_timeout.as_millis() as u64,
            success_threshold: defaults.success_threshold,
            half_open_max_calls: defaults.half_open_max_calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub default: CircuitBreakerComponentSettings,
    /// Per-circuit overrides keyed by circuit name
    pub components: HashMap<String, CircuitBreakerComponentSettings>,
}

impl CircuitBreakerSettings {
    pub fn build_manager(&self) -> CircuitBreakerManager {
        if !self.enabled {
            return CircuitBreakerManager::disabled();
        }
        self.components.iter().fold(
            CircuitBreakerManager::new(self.default.to_config()),
            |manager, (name, settings)| manager.with_component(name.clone(), settings.to_config()),
        )
    }

    fn validate(&self) -> ConfigResult<()> {
        let named = std::iter::once(("default", &self.default))
            .chain(self.components.iter().map(|(name, s)| (name.as_str(), s)));
        for (name, settings) in named {
            settings.to_config().validate().map_err(|reason| {
                ConfigurationError::invalid_value(format!("circuit_breakers.{name}"), format!("{settings:?}"), reason)
            })?;
        }
        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default: CircuitBreakerComponentSettings::default(),
            components: HashMap::new(),
        }
    }
}

/// Token bucket parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketSettings {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl BucketSettings {
    pub fn to_config(self) -> RateLimitConfig {
        RateLimitConfig::new(self.capacity, self.refill_per_second)
    }
}

impl Default for BucketSettings {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            capacity: defaults.capacity,
            refill_per_second: defaults.refill_per_second,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Used for any scope without its own entry
    pub default: BucketSettings,
    pub queues: HashMap<String, BucketSettings>,
    pub workers: HashMap<String, BucketSettings>,
    pub global: Option<BucketSettings>,
}

impl RateLimitSettings {
    pub fn build_limiter(&self) -> RateLimiter {
        let scoped = self
            .queues
            .iter()
            .map(|(name, b)| (RateLimitScope::queue(name.clone()), *b))
            .chain(self.workers.iter().map(|(name, b)| (RateLimitScope::worker(name.clone()), *b)))
            .chain(self.global.map(|b| (RateLimitScope::Global, b)));

        scoped.fold(RateLimiter::new(self.default.to_config()), |limiter, (scope, bucket)| {
            limiter.with_limit(scope, bucket.to_config())
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        let check = |field: String, bucket: &BucketSettings| {
            bucket
                .to_config()
                .validate()
                .map_err(|reason| ConfigurationError::invalid_value(field, format!("{bucket:?}"), reason))
        };
        check("rate_limits.default".to_string(), &self.default)?;
        for (name, bucket) in &self.queues {
            check(format!("rate_limits.queues.{name}"), bucket)?;
        }
        for (name, bucket) in &self.workers {
            check(format!("rate_limits.workers.{name}"), bucket)?;
        }
        if let Some(bucket) = &self.global {
            check("rate_limits.global".to_string(), bucket)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderSettings {
    pub cluster_key: String,
    pub lease_ttl_ms: u64,
    /// Must be shorter than the lease TTL
    pub renew_interval_ms: u64,
}

impl LeaderSettings {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.cluster_key.trim().is_empty() {
            return Err(ConfigurationError::invalid_value("leader.cluster_key", "", "must not be blank"));
        }
        if self.renew_interval_ms == 0 || self.renew_interval_ms >= self.lease_ttl_ms {
            return Err(ConfigurationError::invalid_value(
                "leader.renew_interval_ms",
                self.renew_interval_ms.to_string(),
                format!("must be positive and below lease_ttl_ms ({})", self.lease_ttl_ms),
            ));
        }
        Ok(())
    }
}

impl Default for LeaderSettings {
    fn default() -> Self {
        Self {
            cluster_key: system::DEFAULT_CLUSTER_KEY.to_string(),
            lease_ttl_ms: 15_000,
            renew_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifelineSettings {
    pub enabled: bool,
    /// Heartbeat age after which a running execution is rescued
    pub rescue_after_ms: u64,
    pub scan_interval_ms: u64,
}

impl LifelineSettings {
    pub fn rescue_after(&self) -> Duration {
        Duration::from_millis(self.rescue_after_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.rescue_after_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "lifeline.rescue_after_ms",
                "0",
                "must be greater than 0",
            ));
        }
        if self.scan_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "lifeline.scan_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for LifelineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rescue_after_ms: 60_000,
            scan_interval_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    pub enabled: bool,
    /// Letters older than this are pruned by the scheduler
    pub retention_ms: u64,
}

impl DeadLetterSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_ms: 7 * 24 * 60 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    /// Broadcast buffer of the event publisher
    pub channel_capacity: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_interval_ms: u64,
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tick_interval_ms: 1_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ErrorKind;
    use crate::resilience::CircuitState;

    #[test]
    fn test_defaults_are_valid() {
        let config = SagaflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.leader.cluster_key, system::DEFAULT_CLUSTER_KEY);
        assert_eq!(config.engine.heartbeat_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_profiles_match_error_kinds() {
        let profiles = SagaflowConfig::default().backoff.profiles();
        for kind in [ErrorKind::Retryable, ErrorKind::Transient, ErrorKind::Degraded, ErrorKind::Terminal] {
            let expected = kind.default_policy();
            let actual = profiles.for_kind(kind);
            assert_eq!(actual.max_attempts, expected.max_attempts, "{kind}");
            assert_eq!(actual.strategy, expected.strategy, "{kind}");
            assert_eq!(actual.max_delay, expected.max_delay, "{kind}");
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SagaflowConfig::default();
        config.leader.renew_interval_ms = config.leader.lease_ttl_ms;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { field, .. }) if field == "leader.renew_interval_ms"
        ));

        let mut config = SagaflowConfig::default();
        config.backoff.retryable.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = SagaflowConfig::default();
        config.rate_limits.queues.insert("emails".into(), BucketSettings { capacity: 0, refill_per_second: 1.0 });
        assert!(config.validate().is_err());

        let mut config = SagaflowConfig::default();
        config.circuit_breakers.default.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builds_runtime_components() {
        let mut config = SagaflowConfig::default();
        config.circuit_breakers.components.insert(
            "payments".into(),
            CircuitBreakerComponentSettings {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        config.rate_limits.global = Some(BucketSettings {
            capacity: 2,
            refill_per_second: 1.0,
        });

        let manager = config.circuit_breakers.build_manager();
        assert_eq!(manager.config_for_component("payments").failure_threshold, 1);
        assert_eq!(manager.config_for_component("other").failure_threshold, 5);
        assert_eq!(manager.get_circuit_breaker("payments").state(), CircuitState::Closed);

        let limiter = config.rate_limits.build_limiter();
        assert!(limiter.acquire(&RateLimitScope::Global).is_ok());
        assert!(limiter.acquire(&RateLimitScope::Global).is_ok());
        assert!(limiter.acquire(&RateLimitScope::Global).is_err());

        config.circuit_breakers.enabled = false;
        assert!(!config.circuit_breakers.build_manager().is_enabled());
    }
}
