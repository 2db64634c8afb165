//! Single entry point for new presence events.
//!
//! [`Ingress::accept`] validates a raw event, stamps it, appends it to the
//! store and then forwards it to the publisher and the observable resource,
//! always in that order. Only validation can fail the call; forwarding
//! failures are logged and never reach the producer.
//!
//! The publisher is invoked in line but its delivery runs on a separate
//! task, so observers are notified without waiting on the broker and even
//! if the caller goes away.

use std::sync::{Arc, Mutex, PoisonError};

use beacon_observe::ObservableResource;
use beacon_store::EventStore;
use beacon_types::{Event, InvalidEvent, RawEvent};
use chrono::{DateTime, Utc};

use crate::publisher::Publisher;

pub struct Ingress {
    store: Arc<EventStore>,
    resource: Arc<ObservableResource>,
    publisher: Option<(Arc<dyn Publisher>, String)>,
    /// Timestamp of the last accepted event. Held while appending so the
    /// log stays ordered by `occurred_at`.
    last_accepted: Mutex<Option<DateTime<Utc>>>,
}

impl Ingress {
    pub fn new(store: Arc<EventStore>, resource: Arc<ObservableResource>) -> Self {
        Self {
            store,
            resource,
            publisher: None,
            last_accepted: Mutex::new(None),
        }
    }

    /// Enables publishing every accepted event to `topic`.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        self.publisher = Some((publisher, topic.into()));
        self
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Accepts one event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEvent` when a required field is missing or a value
    /// is malformed. Nothing is stored or forwarded in that case.
    pub async fn accept(&self, raw: RawEvent) -> Result<Event, InvalidEvent> {
        let event = self.admit(raw)?;

        tracing::info!(
            kind = %event.kind,
            entity_id = %event.entity_id,
            source_id = %event.source_id,
            signal_strength = ?event.signal_strength,
            "accepted presence event"
        );

        self.forward(&event);
        Ok(event)
    }

    fn admit(&self, raw: RawEvent) -> Result<Event, InvalidEvent> {
        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut event = raw.normalize(Utc::now())?;
        if let Some(previous) = *last {
            if event.occurred_at < previous {
                tracing::debug!(
                    supplied = %event.occurred_at,
                    %previous,
                    "clamping out-of-order timestamp"
                );
                event.occurred_at = previous;
            }
        }
        *last = Some(event.occurred_at);

        let evicted = self.store.append(event.clone());
        if evicted > 0 {
            tracing::debug!(evicted, "event log at capacity; evicted oldest");
        }
        Ok(event)
    }

    fn forward(&self, event: &Event) {
        if let Some((publisher, topic)) = &self.publisher {
            let delivery = publisher.publish(topic, event);
            let topic = topic.clone();
            let source_id = event.source_id.clone();
            tokio::spawn(async move {
                if let Err(e) = delivery.await {
                    tracing::warn!(%topic, %source_id, error = %e, "failed to publish event");
                }
            });
        }

        let report = self.resource.notify(event);
        if report.detached > 0 {
            tracing::debug!(
                delivered = report.delivered,
                detached = report.detached,
                "notified observers"
            );
        }
    }
}
