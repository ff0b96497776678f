//! Basic sink implementations.

use super::types::{TelemetryEvent, TelemetrySink};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Logs events through `tracing`; exceptions and rejections at `warn`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        let measurements = serde_json::to_string(&event.measurements).unwrap_or_default();
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        if event.name.ends_with("exception") || event.name.ends_with("reject") || event.name.ends_with("trip") {
            warn!(event = %event.name, %measurements, %metadata, "📡 Telemetry");
        } else {
            debug!(event = %event.name, %measurements, %metadata, "📡 Telemetry");
        }
    }
}

/// Forwards each event to every inner sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for FanoutSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Keeps every event in memory; handy for assertions and debugging
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }

    /// Events with the given name, in emission order
    pub fn named(&self, name: &str) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(Arc::new(NoopSink))
            .with(b.clone());

        fanout.emit(TelemetryEvent::new("step.start"));
        fanout.emit(TelemetryEvent::new("step.stop"));

        assert_eq!(a.names(), vec!["step.start", "step.stop"]);
        assert_eq!(b.count("step.stop"), 1);
        assert_eq!(fanout.len(), 3);
    }

    #[test]
    fn test_tracing_sink_never_panics() {
        TracingSink.emit(TelemetryEvent::new("circuit.trip").meta("circuit", "payments"));
        TracingSink.emit(TelemetryEvent::new("step.stop").measure("duration_ms", f64::NAN));
    }
}
