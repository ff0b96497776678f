//! # Telemetry Events
//!
//! Every lifecycle transition in the engine, the resilience primitives and
//! the coordination layer is reported as a [`TelemetryEvent`] to a
//! [`TelemetrySink`]. Emission is synchronous, infallible and must never
//! block the orchestration path. Event names live in
//! [`crate::constants::events`].

pub mod metrics;
pub mod publisher;
pub mod sinks;
pub mod types;

pub use metrics::MetricsSink;
pub use publisher::EventPublisher;
pub use sinks::{FanoutSink, MemorySink, NoopSink, TracingSink};
pub use types::{TelemetryEvent, TelemetrySink};
