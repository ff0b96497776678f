//! Layered configuration loading and its effect on a built engine.

use sagaflow::backoff::BackoffStrategy;
use sagaflow::config::{ConfigManager, ConfigurationError};
use sagaflow::orchestration::ExecutionEngine;
use sagaflow::persistence::InMemoryStore;
use sagaflow::resilience::CircuitState;
use sagaflow::workflow::WorkflowRegistry;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_err;

#[test]
fn test_environment_variables_override_files() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sagaflow.toml"),
        r#"
[engine]
max_parallel_steps = 8

[leader]
cluster_key = "payments"
"#,
    )
    .unwrap();

    std::env::set_var("SAGAFLOW__ENGINE__MAX_PARALLEL_STEPS", "2");
    let manager = ConfigManager::load_from_directory(dir.path(), "staging");
    std::env::remove_var("SAGAFLOW__ENGINE__MAX_PARALLEL_STEPS");

    let manager = manager.unwrap();
    assert_eq!(manager.environment(), "staging");
    assert_eq!(manager.config().engine.max_parallel_steps, 2);
    assert_eq!(manager.config().leader.cluster_key, "payments");
}

#[test]
fn test_environment_file_overlays_base_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sagaflow.toml"),
        r#"
[backoff.retryable]
max_attempts = 4
strategy = "exponential"
base_delay_ms = 200
max_delay_ms = 10000
jitter = 0.1

[lifeline]
rescue_after_ms = 90000
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("sagaflow.production.toml"),
        r#"
[lifeline]
rescue_after_ms = 20000

[dead_letter]
enabled = false
"#,
    )
    .unwrap();

    let config = ConfigManager::load_from_directory(dir.path(), "production")
        .unwrap()
        .config()
        .clone();

    assert_eq!(config.lifeline.rescue_after(), Duration::from_secs(20));
    assert!(!config.dead_letter.enabled);
    let retryable = config.backoff.retryable.to_policy();
    assert_eq!(retryable.max_attempts, 4);
    assert_eq!(retryable.strategy, BackoffStrategy::Exponential);
    assert_eq!(retryable.base_delay, Duration::from_millis(200));
    // Untouched sections keep their defaults
    assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sagaflow.toml"),
        r#"
[leader]
lease_ttl_ms = 1000
renew_interval_ms = 5000
"#,
    )
    .unwrap();

    let error = assert_err!(ConfigManager::load_from_directory(dir.path(), "test"));
    assert!(matches!(
        error,
        ConfigurationError::InvalidValue { ref field, .. } if field == "leader.renew_interval_ms"
    ));
}

#[tokio::test]
async fn test_engine_built_from_configuration() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sagaflow.toml"),
        r#"
[engine]
node_id = "worker-7"

[circuit_breakers]
enabled = true

[circuit_breakers.components.ledger]
failure_threshold = 2
reset_timeout_ms = 500
success_threshold = 1
"#,
    )
    .unwrap();

    let config = ConfigManager::load_from_directory(dir.path(), "test")
        .unwrap()
        .config()
        .clone();
    let engine = ExecutionEngine::builder(Arc::new(WorkflowRegistry::new()), Arc::new(InMemoryStore::new()))
        .config(config)
        .build();

    assert_eq!(engine.node_id(), "worker-7");
    let circuits = engine.circuit_breakers();
    assert!(circuits.is_enabled());
    assert_eq!(circuits.config_for_component("ledger").failure_threshold, 2);
    assert_eq!(
        circuits.config_for_component("ledger").reset_timeout,
        Duration::from_millis(500)
    );
    assert!(circuits.get_state("ledger").is_none());
    circuits.get_circuit_breaker("ledger");
    assert_eq!(circuits.get_state("ledger"), Some(CircuitState::Closed));
}
