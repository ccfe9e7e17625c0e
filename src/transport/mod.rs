//! Transport layer seam
//!
//! The session core drives the broker connection through the [`Transport`] trait and
//! receives connection events back through [`TransportEvents`]. The production
//! implementation lives in [`mqtt`]; tests use `testing::MockTransport`.

use crate::config::ConnectionConfig;
use crate::session::registry::MessageHandler;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub mod mqtt;

/// Delivery guarantee for a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Outcome of a connect handshake, reported through [`TransportEvents::on_connect`]
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectResult {
    /// Broker accepted the connection
    Accepted,
    /// Broker refused the handshake or the connection could not be established
    Refused(String),
}

impl ConnectResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectResult::Accepted)
    }
}

/// Transport level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect request failed: {0}")]
    ConnectFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Transport has not been started")]
    NotStarted,
    #[error("Publish acknowledgment dropped before completion")]
    AckDropped,
}

/// Handle for an in-flight publish, resolved once the broker acknowledges it
#[derive(Debug)]
pub struct PublishAck {
    rx: oneshot::Receiver<()>,
}

impl PublishAck {
    /// Create an unresolved handle and the sender that completes it
    pub fn pending() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Create a handle that is already acknowledged
    pub fn completed() -> Self {
        let (tx, ack) = Self::pending();
        let _ = tx.send(());
        ack
    }

    /// Wait for the acknowledgment handshake to complete
    pub async fn wait(self) -> Result<(), TransportError> {
        self.rx.await.map_err(|_| TransportError::AckDropped)
    }
}

/// Connection event callbacks, invoked on the transport's event task
pub trait TransportEvents: Send + Sync {
    /// Result of a connect handshake, including automatic reconnects
    fn on_connect(&self, result: ConnectResult);

    /// An established session was lost
    fn on_disconnect(&self);
}

/// Publish/subscribe transport driven by the session
///
/// `connect` only issues the request; its outcome arrives later through
/// [`TransportEvents::on_connect`] on the transport's own event task.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Register the connection event callbacks
    fn set_event_handler(&self, events: Arc<dyn TransportEvents>);

    /// Bounds of the automatic reconnect backoff after an established session drops
    fn set_reconnect_delay(&self, min: Duration, max: Duration);

    /// Issue an asynchronous connect request
    fn connect(&self, host: &str, port: u16, keep_alive: Duration) -> Result<(), TransportError>;

    /// Submit a message, returning a handle that resolves on acknowledgment
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<PublishAck, TransportError>;

    /// Issue a subscribe request without waiting for the broker's answer
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Route messages matching `topic` to `handler`, replacing any previous handler
    fn message_callback_add(&self, topic: &str, handler: MessageHandler);

    /// Close the connection and stop the event task
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Builds the transport handle the first time a session connects
pub type TransportFactory =
    Arc<dyn Fn(&ConnectionConfig) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync>;

/// Type alias for the rumqttc-backed transport
pub type MqttTransport = mqtt::RumqttTransport;
