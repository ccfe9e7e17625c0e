//! Publish and subscribe are gated on the connection state
//!
//! While disconnected both operations are dropped without touching the transport.
//! While connected, publish uses exactly-once delivery and waits for the ack.

use bytes::Bytes;
use mqtt_session::testing::MockTransport;
use mqtt_session::{ConnectionConfig, MqttSession, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

type Received = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

fn session_with(mock: &Arc<MockTransport>) -> MqttSession {
    MqttSession::with_transport_factory(
        ConnectionConfig::new("broker.local", 1883).with_reconnect_delay_secs(1),
        mock.factory(),
    )
}

fn recorder() -> (Received, impl Fn(&str, &[u8]) + Send + Sync + 'static) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler = move |topic: &str, payload: &[u8]| {
        sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
    };
    (received, handler)
}

#[tokio::test]
async fn test_publish_before_connect_is_dropped() {
    let mock = Arc::new(MockTransport::new());
    let session = session_with(&mock);

    session.publish("alerts/fire", "now").await;

    assert_eq!(mock.publish_count(), 0);
    assert_eq!(mock.factory_calls(), 0);
}

#[tokio::test]
async fn test_publish_while_connected_uses_exactly_once() {
    let mock = Arc::new(MockTransport::new());
    let session = session_with(&mock);
    assert!(session.connect().await);

    session.publish("alerts/fire", b"now").await;

    let published = mock.get_published_messages();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "alerts/fire");
    assert_eq!(published[0].payload, Bytes::from_static(b"now"));
    assert_eq!(published[0].qos, QoS::ExactlyOnce);
}

#[tokio::test]
async fn test_publish_blocks_until_acknowledged() {
    let mock = Arc::new(MockTransport::with_manual_ack());
    let session = session_with(&mock);
    assert!(session.connect().await);

    let publishing = tokio::spawn({
        let session = session.clone();
        async move { session.publish("orders/new", vec![1u8, 2, 3]).await }
    });

    // The message reaches the transport but the call stays pending
    while mock.pending_ack_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(!publishing.is_finished());

    assert!(mock.ack_next());
    timeout(Duration::from_secs(5), publishing)
        .await
        .expect("publish did not complete after ack")
        .unwrap();
}

#[tokio::test]
async fn test_publish_after_connection_lost_is_dropped() {
    let mock = Arc::new(MockTransport::new());
    let session = session_with(&mock);
    assert!(session.connect().await);

    mock.simulate_disconnect();
    session.publish("alerts/fire", "lost").await;
    assert_eq!(mock.publish_count(), 0);

    mock.simulate_reconnect();
    session.publish("alerts/fire", "back").await;
    assert_eq!(mock.publish_count(), 1);
}

#[tokio::test]
async fn test_publish_failure_is_not_surfaced() {
    let mock = Arc::new(MockTransport::with_failure());
    let session = session_with(&mock);
    assert!(session.connect().await);

    timeout(Duration::from_secs(5), session.publish("alerts/fire", "x"))
        .await
        .expect("failed publish should return promptly");
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_subscribe_before_connect_registers_nothing() {
    let mock = Arc::new(MockTransport::new());
    let session = session_with(&mock);
    let (received, handler) = recorder();

    session.subscribe("sensors/+/temp", handler);
    assert!(session.connect().await);

    assert_eq!(mock.subscribe_count(), 0);
    assert_eq!(mock.deliver("sensors/kitchen/temp", b"21.5"), 0);
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_subscribed_handler_receives_matching_messages() {
    let mock = Arc::new(MockTransport::new());
    let session = session_with(&mock);
    assert!(session.connect().await);
    let (received, handler) = recorder();

    session.subscribe("sensors/+/temp", handler);

    assert_eq!(
        mock.get_subscriptions(),
        vec![("sensors/+/temp".to_string(), QoS::AtMostOnce)]
    );
    assert_eq!(mock.deliver("sensors/kitchen/temp", b"21.5"), 1);
    assert_eq!(mock.deliver("sensors/kitchen/humidity", b"40"), 0);

    let received = received.lock().unwrap();
    assert_eq!(
        *received,
        vec![("sensors/kitchen/temp".to_string(), b"21.5".to_vec())]
    );
}

#[tokio::test]
async fn test_resubscribe_replaces_handler() {
    let mock = Arc::new(MockTransport::new());
    let session = session_with(&mock);
    assert!(session.connect().await);
    let (first, first_handler) = recorder();
    let (second, second_handler) = recorder();

    session.subscribe("events", first_handler);
    session.subscribe("events", second_handler);
    mock.deliver("events", b"ping");

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(second.lock().unwrap().len(), 1);
    assert_eq!(mock.subscribe_count(), 2);
}

#[tokio::test]
async fn test_clones_share_the_gate() {
    let mock = Arc::new(MockTransport::new());
    let session = session_with(&mock);
    let other = session.clone();

    other.publish("a", "dropped").await;
    assert!(session.connect().await);
    other.publish("a", "sent").await;

    assert!(other.is_connected());
    let published = mock.get_published_messages();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload, Bytes::from_static(b"sent"));
}
