//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of circuit behavior plus a system-wide aggregate.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls that reached the protected operation
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Calls refused without invocation
    pub rejected_count: u64,

    /// Current consecutive failure count (closed state)
    pub consecutive_failures: u64,

    /// Consecutive successes recorded in the current half-open window
    pub half_open_successes: u64,

    /// Number of times the circuit tripped open
    pub trips: u64,

    /// Total duration of all recorded operations
    pub total_duration: Duration,

    pub current_state: CircuitState,

    /// 0.0 to 1.0
    pub failure_rate: f64,

    /// 0.0 to 1.0
    pub success_rate: f64,

    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            half_open_successes: 0,
            trips: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Fill in rates and averages from the raw counters
    pub(crate) fn with_derived(mut self, state: CircuitState) -> Self {
        self.current_state = state;
        if self.total_calls > 0 {
            self.failure_rate = self.failure_count as f64 / self.total_calls as f64;
            self.success_rate = self.success_count as f64 / self.total_calls as f64;
            let divisor = u32::try_from(self.total_calls).unwrap_or(u32::MAX);
            self.average_duration = self.total_duration / divisor;
        }
        self
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
    }

    pub fn count_in_state(&self, state: CircuitState) -> usize {
        self.circuit_breakers
            .values()
            .filter(|m| m.current_state == state)
            .count()
    }

    /// Share of healthy circuits, 1.0 when none exist
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }
        let healthy = self.circuit_breakers.values().filter(|m| m.is_healthy()).count();
        healthy as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.total_calls).sum()
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_rates() {
        let metrics = CircuitBreakerMetrics {
            total_calls: 4,
            success_count: 3,
            failure_count: 1,
            total_duration: Duration::from_millis(400),
            ..CircuitBreakerMetrics::new()
        }
        .with_derived(CircuitState::Closed);

        assert!((metrics.failure_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(metrics.average_duration, Duration::from_millis(100));
        assert!(!metrics.is_healthy());
        assert!(metrics.format_summary().contains("Calls: 4"));
    }

    #[test]
    fn test_system_health_score() {
        let mut system = SystemCircuitBreakerMetrics::new();
        assert!((system.health_score() - 1.0).abs() < f64::EPSILON);

        system.add_circuit_breaker("a".into(), CircuitBreakerMetrics::new());
        system.add_circuit_breaker(
            "b".into(),
            CircuitBreakerMetrics::new().with_derived(CircuitState::Open),
        );

        assert!((system.health_score() - 0.5).abs() < f64::EPSILON);
        assert_eq!(system.count_in_state(CircuitState::Open), 1);
    }
}
