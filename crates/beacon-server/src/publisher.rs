//! Best-effort publishing of accepted events to an MQTT broker.
//!
//! One attempt per event, no queue and no retry. While the broker is not
//! connected, publishing fails immediately; the connection itself is
//! re-established in the background.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_types::Event;
use futures_util::future::BoxFuture;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Port used when the broker address does not name one.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

const REQUEST_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Errors from a single publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker is not connected or the attempt timed out.
    #[error("broker unavailable: {0}")]
    TransportUnavailable(String),

    /// The configured broker address cannot be used.
    #[error("invalid broker address {0:?}")]
    InvalidBroker(String),

    /// The event could not be encoded.
    #[error("failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sends events to a named topic.
///
/// `publish` is called in line with ingestion and must not block; the
/// returned future performs the delivery and is driven on its own task.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, topic: &str, event: &Event) -> BoxFuture<'static, Result<(), PublishError>>;
}

/// Host and port of an MQTT broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parses `mqtt://host[:port]`, `tcp://host[:port]` or a bare
    /// `host[:port]`.
    pub fn parse(url: &str) -> Result<Self, PublishError> {
        let invalid = || PublishError::InvalidBroker(url.to_string());

        let trimmed = url.trim().trim_end_matches('/');
        let authority = match trimmed.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => rest,
            Some(_) => return Err(invalid()),
            None => trimmed,
        };
        if authority.is_empty() || authority.contains('/') {
            return Err(invalid());
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !host.ends_with(':') => {
                (host, port.parse().map_err(|_| invalid())?)
            }
            _ => (authority, DEFAULT_MQTT_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mqtt://{}:{}", self.host, self.port)
    }
}

/// Publishes JSON events at QoS 0 over one MQTT connection.
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    timeout: Duration,
    driver: JoinHandle<()>,
}

impl MqttPublisher {
    /// Creates the client and spawns the task that drives its connection.
    ///
    /// Must be called from within a Tokio runtime. Connecting happens in
    /// the background; until it succeeds every publish fails fast.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::InvalidBroker` if `broker_url` cannot be
    /// parsed.
    pub fn connect(broker_url: &str, client_id: &str, timeout: Duration) -> Result<Self, PublishError> {
        let address = BrokerAddress::parse(broker_url)?;

        let mut options = MqttOptions::new(client_id, address.host.clone(), address.port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let connected = Arc::new(AtomicBool::new(false));
        let driver = tokio::spawn(drive_connection(eventloop, connected.clone(), address));

        Ok(Self {
            client,
            connected,
            timeout,
            driver,
        })
    }

    /// Whether the broker has acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, event: &Event) -> BoxFuture<'static, Result<(), PublishError>> {
        let payload = serde_json::to_vec(event);
        let connected = self.is_connected();
        let client = self.client.clone();
        let topic = topic.to_string();
        let source_id = event.source_id.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = payload?;
            if !connected {
                return Err(PublishError::TransportUnavailable(
                    "not connected to broker".to_string(),
                ));
            }

            let attempt = client.publish(topic.as_str(), QoS::AtMostOnce, false, payload);
            match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(())) => {
                    tracing::debug!(%topic, %source_id, "published event");
                    Ok(())
                }
                Ok(Err(e)) => Err(PublishError::TransportUnavailable(e.to_string())),
                Err(_) => Err(PublishError::TransportUnavailable(format!(
                    "publish timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        })
    }
}

/// Polls the MQTT event loop for the life of the publisher, reconnecting
/// after a fixed delay whenever the connection fails.
async fn drive_connection(mut eventloop: EventLoop, connected: Arc<AtomicBool>, broker: BrokerAddress) {
    let mut reported = false;
    loop {
        match eventloop.poll().await {
            Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                reported = false;
                tracing::info!(%broker, "connected to MQTT broker");
            }
            Ok(_) => {}
            Err(e) => {
                let was_connected = connected.swap(false, Ordering::SeqCst);
                if was_connected || !reported {
                    tracing::warn!(
                        %broker,
                        error = %e,
                        retry_secs = RECONNECT_DELAY.as_secs(),
                        "MQTT broker unavailable"
                    );
                    reported = true;
                } else {
                    tracing::debug!(%broker, error = %e, "MQTT reconnect failed");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_address_accepts_scheme_and_bare_forms() {
        assert_eq!(
            BrokerAddress::parse("mqtt://localhost:1883").unwrap(),
            BrokerAddress {
                host: "localhost".to_string(),
                port: 1883
            }
        );
        assert_eq!(BrokerAddress::parse("tcp://10.0.0.5").unwrap().port, DEFAULT_MQTT_PORT);
        assert_eq!(BrokerAddress::parse("broker.local:1884").unwrap().port, 1884);
        assert_eq!(BrokerAddress::parse("mqtt://[::1]:1885/").unwrap().host, "::1");
    }

    #[test]
    fn broker_address_rejects_other_schemes_and_bad_ports() {
        for bad in ["http://broker:8080", "mqtt://broker:port", "mqtt://", "mqtt://host/topic"] {
            assert!(
                matches!(BrokerAddress::parse(bad), Err(PublishError::InvalidBroker(_))),
                "{bad} should be rejected"
            );
        }
    }
}
