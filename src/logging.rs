//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestration core. Console
//! output by default, JSON lines when the logging configuration asks for it.
//! `RUST_LOG` always wins over the configured level.

use crate::config::{ConfigManager, LoggingSettings};
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging() {
    init_with_settings(&LoggingSettings {
        level: default_level(&ConfigManager::detect_environment()).to_string(),
        json: false,
    });
}

/// Initialize structured logging from configuration; later calls are no-ops
pub fn init_with_settings(settings: &LoggingSettings) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

        let console = (!settings.json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
        });
        let json = settings.json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .with_filter(filter())
        });

        // An existing global subscriber (host application, test harness) is kept
        if tracing_subscriber::registry().with(console).with(json).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = settings.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Default filter directive per environment
fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for execution operations
pub fn log_execution_operation(
    operation: &str,
    execution_id: Option<Uuid>,
    workflow: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = ?execution_id,
        workflow = workflow,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 EXECUTION_OPERATION"
    );
}

/// Log structured data for step operations
pub fn log_step_operation(
    operation: &str,
    execution_id: Option<Uuid>,
    step_name: Option<&str>,
    attempt: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = ?execution_id,
        step_name = step_name,
        attempt = attempt,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log structured data for leader election and lifeline operations
pub fn log_coordination_operation(
    operation: &str,
    cluster_key: &str,
    node_id: &str,
    term: Option<u64>,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        cluster_key = %cluster_key,
        node_id = %node_id,
        term = term,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "👑 COORDINATION_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
