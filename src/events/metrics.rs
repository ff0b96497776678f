//! # OpenTelemetry Metrics
//!
//! Maps telemetry events onto OpenTelemetry instruments obtained from the
//! global meter provider. The crate configures no exporter; without one the
//! instruments are no-ops.
//!
//! Instruments:
//! - `sagaflow.events.total` counter, labelled by `event`
//! - `sagaflow.step.duration` histogram (ms), labelled by `workflow`, `step`
//! - `sagaflow.execution.duration` histogram (ms), labelled by `workflow`, `state`

use super::types::{TelemetryEvent, TelemetrySink};
use crate::constants::events;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static SAGAFLOW_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    SAGAFLOW_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("sagaflow"))
}

/// Total telemetry events by name
pub fn events_total() -> Counter<u64> {
    meter()
        .u64_counter("sagaflow.events.total")
        .with_description("Total number of orchestration events emitted")
        .build()
}

/// Step invocation duration in milliseconds
pub fn step_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("sagaflow.step.duration")
        .with_description("Step invocation duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Execution run duration in milliseconds
pub fn execution_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("sagaflow.execution.duration")
        .with_description("Execution run duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Sink that records events as OpenTelemetry metrics
#[derive(Clone)]
pub struct MetricsSink {
    events: Counter<u64>,
    step_duration: Histogram<f64>,
    execution_duration: Histogram<f64>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            events: events_total(),
            step_duration: step_duration(),
            execution_duration: execution_duration(),
        }
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink").finish_non_exhaustive()
    }
}

impl TelemetrySink for MetricsSink {
    fn emit(&self, event: TelemetryEvent) {
        self.events
            .add(1, &[KeyValue::new("event", event.name.clone())]);

        let Some(duration) = event.measurement("duration_ms") else {
            return;
        };
        let workflow = event.metadata_str("workflow").unwrap_or("unknown").to_string();

        if event.name == events::STEP_STOP {
            let step = event.metadata_str("step").unwrap_or("unknown").to_string();
            self.step_duration.record(
                duration,
                &[KeyValue::new("workflow", workflow), KeyValue::new("step", step)],
            );
        } else if event.name == events::EXECUTION_STOP {
            let state = event.metadata_str("state").unwrap_or("unknown").to_string();
            self.execution_duration.record(
                duration,
                &[KeyValue::new("workflow", workflow), KeyValue::new("state", state)],
            );
        }
    }
}
