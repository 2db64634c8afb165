//! Destinations for events received by an [`ObservationClient`](crate::ObservationClient).

use std::sync::Arc;

use beacon_store::EventStore;
use beacon_types::Event;
use tokio::sync::mpsc;

/// Receives every event an observation session delivers, in arrival order.
pub trait EventSink: Send + Sync + 'static {
    fn deliver(&self, event: Event);
}

impl EventSink for EventStore {
    fn deliver(&self, event: Event) {
        self.append(event);
    }
}

impl EventSink for mpsc::UnboundedSender<Event> {
    fn deliver(&self, event: Event) {
        if self.send(event).is_err() {
            tracing::debug!("event sink receiver dropped; discarding event");
        }
    }
}

/// Logs each event at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, event: Event) {
        tracing::info!(
            kind = %event.kind,
            entity_id = %event.entity_id,
            source_id = %event.source_id,
            signal_strength = ?event.signal_strength,
            occurred_at = %event.occurred_at,
            "presence event"
        );
    }
}

/// Hands each event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn deliver(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.deliver(event.clone());
            }
            last.deliver(event);
        }
    }
}
