//! # Circuit Breaker Manager
//!
//! Process-wide registry of named circuits. Circuits are created lazily on
//! first use with the component's configured parameters (or the default) and
//! are shared by every execution.

use crate::events::TelemetrySink;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    SystemCircuitBreakerMetrics,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Manager for every named circuit in the process
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: DashMap<String, Arc<CircuitBreaker>>,
    enabled: bool,
    default_config: CircuitBreakerConfig,
    component_configs: HashMap<String, CircuitBreakerConfig>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breakers: DashMap::new(),
            enabled: true,
            default_config,
            component_configs: HashMap::new(),
            sink: None,
        }
    }

    /// Manager whose gates always admit
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(CircuitBreakerConfig::default())
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.component_configs.insert(name.into(), config);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configuration a circuit with this name is (or would be) created with
    pub fn config_for_component(&self, name: &str) -> &CircuitBreakerConfig {
        self.component_configs.get(name).unwrap_or(&self.default_config)
    }

    /// Get or create circuit breaker for a component
    pub fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(component_name) {
            return Arc::clone(breaker.value());
        }

        let entry = self
            .circuit_breakers
            .entry(component_name.to_string())
            .or_insert_with(|| {
                let mut breaker = CircuitBreaker::new(
                    component_name,
                    self.config_for_component(component_name).clone(),
                );
                if let Some(sink) = &self.sink {
                    breaker = breaker.with_sink(Arc::clone(sink));
                }
                Arc::new(breaker)
            });
        let breaker = Arc::clone(entry.value());
        drop(entry);

        info!(
            component = component_name,
            total_circuit_breakers = self.circuit_breakers.len(),
            "Created new circuit breaker"
        );
        breaker
    }

    /// Current state, `None` if the circuit has never been used
    pub fn get_state(&self, component_name: &str) -> Option<CircuitState> {
        self.circuit_breakers
            .get(component_name)
            .map(|breaker| breaker.state())
    }

    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn get_component_metrics(&self, component_name: &str) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers
            .get(component_name)
            .map(|breaker| breaker.metrics())
    }

    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();
        for entry in self.circuit_breakers.iter() {
            system_metrics.add_circuit_breaker(entry.key().clone(), entry.value().metrics());
        }
        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("🚨 Forcing all circuit breakers open (emergency stop)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed (emergency recovery)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_closed();
        }
    }

    pub fn remove_circuit_breaker(&self, component_name: &str) -> bool {
        if self.circuit_breakers.remove(component_name).is_some() {
            info!(
                component = component_name,
                remaining_count = self.circuit_breakers.len(),
                "🗑️ Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
