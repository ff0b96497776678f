use super::types::{TelemetryEvent, TelemetrySink};
use tokio::sync::broadcast;

/// Broadcast fan-out of telemetry events to in-process subscribers
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<TelemetryEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: TelemetryEvent) {
        // Err only means no receivers are attached
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl TelemetrySink for EventPublisher {
    fn emit(&self, event: TelemetryEvent) {
        self.publish(event);
    }
}
