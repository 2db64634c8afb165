use std::time::Duration;

use beacon_server::publisher::{MqttPublisher, PublishError, Publisher};
use beacon_types::{Event, EventKind};
use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PINGREQ: u8 = 12;

/// Reads one MQTT control packet: first header byte and body.
async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Accepts one client, acknowledges its CONNECT and reports every
/// PUBLISH as `(topic, payload)`.
async fn serve_client(
    mut stream: TcpStream,
    published: mpsc::UnboundedSender<(String, Vec<u8>)>,
) -> std::io::Result<()> {
    loop {
        let (header, body) = read_packet(&mut stream).await?;
        match header >> 4 {
            CONNECT => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?,
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
                let payload_start = 2 + topic_len + if qos > 0 { 2 } else { 0 };
                let _ = published.send((topic, body[payload_start..].to_vec()));
            }
            PINGREQ => stream.write_all(&[0xd0, 0x00]).await?,
            _ => {}
        }
    }
}

async fn spawn_broker() -> (String, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_client(stream, tx.clone()));
        }
    });
    (format!("mqtt://{addr}"), rx)
}

async fn wait_connected(publisher: &MqttPublisher) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !publisher.is_connected() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("publisher should connect to the broker");
}

#[tokio::test]
async fn event_is_published_as_json_on_the_topic() {
    let (url, mut published) = spawn_broker().await;
    let publisher = MqttPublisher::connect(&url, "beacon-test", Duration::from_secs(2)).unwrap();
    wait_connected(&publisher).await;

    let event = Event::new(EventKind::Arrival, "phone-1", "beacon-A", Utc::now());
    publisher.publish("beacon/events", &event).await.unwrap();

    let (topic, payload) = tokio::time::timeout(Duration::from_secs(5), published.recv())
        .await
        .expect("broker should receive the publish")
        .unwrap();
    assert_eq!(topic, "beacon/events");
    let body: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(body["kind"], "arrival");
    assert_eq!(body["sourceId"], "beacon-A");
    assert_eq!(body["entityId"], "phone-1");
}

#[tokio::test]
async fn unreachable_broker_fails_fast_without_queuing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let publisher =
        MqttPublisher::connect(&format!("mqtt://{addr}"), "beacon-test", Duration::from_secs(2))
            .unwrap();
    assert!(!publisher.is_connected());

    let event = Event::new(EventKind::Departure, "p", "s", Utc::now());
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        publisher.publish("beacon/events", &event),
    )
    .await
    .expect("publish should not wait for the broker");
    assert!(matches!(outcome, Err(PublishError::TransportUnavailable(_))));
}

#[tokio::test]
async fn non_mqtt_address_is_rejected() {
    let result = MqttPublisher::connect("http://127.0.0.1:1883", "beacon-test", Duration::from_secs(1));
    assert!(matches!(result, Err(PublishError::InvalidBroker(_))));
}
