//! Mock implementations for testing
//!
//! Provides a scripted [`MockTransport`] that records every request and lets tests
//! drive connection events, message delivery and publish acknowledgments by hand,
//! without a broker.

use crate::config::ConnectionConfig;
use crate::session::registry::{MessageHandler, TopicRegistry};
use crate::transport::{
    ConnectResult, PublishAck, QoS, Transport, TransportError, TransportEvents, TransportFactory,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How the mock answers one connect request
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    /// Report an accepted connection on the event task
    Accept,
    /// Report a refused handshake on the event task
    Refuse,
    /// Fail the request itself before any event fires
    Fail(String),
    /// Never report an outcome
    Silent,
}

/// A message handed to the mock's publish primitive
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

/// Recorded connect request: host, port, keep-alive
pub type ConnectRequest = (String, u16, Duration);

/// Mock transport for testing
#[derive(Default)]
pub struct MockTransport {
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
    script: Mutex<VecDeque<ConnectBehavior>>,
    connect_requests: Mutex<Vec<ConnectRequest>>,
    connect_times: Mutex<Vec<Instant>>,
    reconnect_delay: Mutex<Option<(Duration, Duration)>>,
    published: Mutex<Vec<PublishedMessage>>,
    pending_acks: Mutex<VecDeque<oneshot::Sender<()>>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    registry: TopicRegistry,
    manual_ack: AtomicBool,
    fail_publish: AtomicBool,
    factory_calls: AtomicUsize,
    handler_registrations: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockTransport {
    /// Mock that accepts every connect request and acknowledges publishes immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock answering connect requests in order from `script`, then accepting
    pub fn with_script(script: Vec<ConnectBehavior>) -> Self {
        let mock = Self::default();
        *lock(&mock.script) = script.into();
        mock
    }

    /// Mock whose publishes stay unacknowledged until [`ack_next`](Self::ack_next)
    pub fn with_manual_ack() -> Self {
        let mock = Self::default();
        mock.manual_ack.store(true, Ordering::SeqCst);
        mock
    }

    /// Mock whose publish primitive always fails
    pub fn with_failure() -> Self {
        let mock = Self::default();
        mock.fail_publish.store(true, Ordering::SeqCst);
        mock
    }

    /// Factory handing out this mock, counting how often the session asks for it
    pub fn factory(self: &Arc<Self>) -> TransportFactory {
        let mock = self.clone();
        Arc::new(
            move |_config: &ConnectionConfig| -> Result<Arc<dyn Transport>, TransportError> {
                mock.factory_calls.fetch_add(1, Ordering::SeqCst);
                let transport: Arc<dyn Transport> = mock.clone();
                Ok(transport)
            },
        )
    }

    pub fn factory_calls(&self) -> usize {
        self.factory_calls.load(Ordering::SeqCst)
    }

    pub fn event_handler_registrations(&self) -> usize {
        self.handler_registrations.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.connect_requests).len()
    }

    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        lock(&self.connect_requests).clone()
    }

    /// When each connect request was issued
    pub fn connect_times(&self) -> Vec<Instant> {
        lock(&self.connect_times).clone()
    }

    pub fn reconnect_delay(&self) -> Option<(Duration, Duration)> {
        *lock(&self.reconnect_delay)
    }

    pub fn publish_count(&self) -> usize {
        lock(&self.published).len()
    }

    pub fn get_published_messages(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn subscribe_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    pub fn get_subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.subscriptions).clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Publishes still waiting for an acknowledgment
    pub fn pending_ack_count(&self) -> usize {
        lock(&self.pending_acks).len()
    }

    /// Acknowledge the oldest unacknowledged publish
    pub fn ack_next(&self) -> bool {
        match lock(&self.pending_acks).pop_front() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Deliver an incoming message to the registered handlers
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        self.registry.dispatch(topic, payload)
    }

    /// Report a dropped session, as the transport does on network loss
    pub fn simulate_disconnect(&self) {
        if let Some(events) = self.event_handler() {
            events.on_disconnect();
        }
    }

    /// Report an accepted connection, as the transport does after an automatic reconnect
    pub fn simulate_reconnect(&self) {
        if let Some(events) = self.event_handler() {
            events.on_connect(ConnectResult::Accepted);
        }
    }

    pub fn clear_history(&self) {
        lock(&self.connect_requests).clear();
        lock(&self.connect_times).clear();
        lock(&self.published).clear();
        lock(&self.subscriptions).clear();
    }

    fn event_handler(&self) -> Option<Arc<dyn TransportEvents>> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn set_event_handler(&self, events: Arc<dyn TransportEvents>) {
        self.handler_registrations.fetch_add(1, Ordering::SeqCst);
        *lock(&self.events) = Some(events);
    }

    fn set_reconnect_delay(&self, min: Duration, max: Duration) {
        *lock(&self.reconnect_delay) = Some((min, max));
    }

    fn connect(&self, host: &str, port: u16, keep_alive: Duration) -> Result<(), TransportError> {
        lock(&self.connect_requests).push((host.to_string(), port, keep_alive));
        lock(&self.connect_times).push(Instant::now());

        let behavior = lock(&self.script)
            .pop_front()
            .unwrap_or(ConnectBehavior::Accept);

        let result = match behavior {
            ConnectBehavior::Accept => ConnectResult::Accepted,
            ConnectBehavior::Refuse => ConnectResult::Refused("NotAuthorized".to_string()),
            ConnectBehavior::Fail(reason) => return Err(TransportError::ConnectFailed(reason)),
            ConnectBehavior::Silent => return Ok(()),
        };

        // Outcome arrives later on a separate task, like a real event loop
        if let Some(events) = self.event_handler() {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                events.on_connect(result);
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<PublishAck, TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(
                "Mock publish failure".to_string().into(),
            ));
        }

        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });

        if self.manual_ack.load(Ordering::SeqCst) {
            let (tx, ack) = PublishAck::pending();
            lock(&self.pending_acks).push_back(tx);
            Ok(ack)
        } else {
            Ok(PublishAck::completed())
        }
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        lock(&self.subscriptions).push((topic.to_string(), qos));
        Ok(())
    }

    fn message_callback_add(&self, topic: &str, handler: MessageHandler) {
        self.registry.insert(topic, handler);
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending_acks).clear();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
