//! # Resilience Module
//!
//! Process-wide fault isolation and admission control shared by every
//! execution:
//!
//! - **Circuit Breakers**: per-name closed/open/half-open gates that stop
//!   calling a failing dependency for a cooldown period
//! - **Rate Limiter**: token buckets per queue, worker type and a global scope
//! - **Metrics**: per-circuit and system-wide snapshots
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sagaflow::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let circuit_breaker = CircuitBreaker::new("payments_api", CircuitBreakerConfig::for_external_api());
//!
//! let receipt = circuit_breaker
//!     .call(|| async { Ok::<&str, std::io::Error>("charged") })
//!     .await?;
//! assert_eq!(receipt, "charged");
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod rate_limiter;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitOpenError, CircuitPermit, CircuitState,
};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use rate_limiter::{RateLimitConfig, RateLimitScope, RateLimited, RateLimiter, TokenBucket};
