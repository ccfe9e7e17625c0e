//! Session lifecycle: blocking connect with unbounded retry, gated publish and subscribe
//!
//! [`MqttSession`] owns the transport handle and the shared connection state. The
//! transport reports connection events on its own task through [`SessionEvents`],
//! which updates the state and runs the caller's `on_connected` hook.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::MqttSession;
//!
//! # tokio_test::block_on(async {
//! let session = MqttSession::new("localhost", 1883);
//!
//! session.set_on_connected(|session: &MqttSession| {
//!     session.subscribe("sensors/#", |topic: &str, payload: &[u8]| {
//!         println!("{topic}: {}", String::from_utf8_lossy(payload));
//!     });
//! });
//!
//! session.connect().await;
//! session.publish("sensors/kitchen/temp", "21.5").await;
//! # });
//! ```

use super::state::{ConnectionState, LifecycleState, SharedConnectionState};
use crate::config::ConnectionConfig;
use crate::error::SessionResult;
use crate::session_span;
use crate::transport::mqtt::RumqttTransport;
use crate::transport::{
    ConnectResult, QoS, Transport, TransportError, TransportEvents, TransportFactory,
};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Hook run on the transport's event task after every accepted connection
///
/// Receives the session, so the hook never needs to capture a clone of it.
pub type OnConnected = Arc<dyn Fn(&MqttSession) + Send + Sync>;

/// QoS used for every publish; `publish` waits for the full handshake
pub const PUBLISH_QOS: QoS = QoS::ExactlyOnce;

/// QoS requested for subscriptions
pub const SUBSCRIBE_QOS: QoS = QoS::AtMostOnce;

/// Lower bound of the transport's automatic reconnect backoff
const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);

struct SessionInner {
    config: ConnectionConfig,
    factory: TransportFactory,
    transport: OnceCell<Arc<dyn Transport>>,
    /// Gate for publish/subscribe
    state: SharedConnectionState,
    /// What a pending `connect()` waits on; resolved after the hook has run
    outcome: SharedConnectionState,
    lifecycle: Mutex<LifecycleState>,
    on_connected: RwLock<Option<OnConnected>>,
    connect_attempts: AtomicU64,
}

impl SessionInner {
    fn set_lifecycle(&self, next: LifecycleState) {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *lifecycle != next {
            debug!(from = ?*lifecycle, to = ?next, "Session lifecycle transition");
            *lifecycle = next;
        }
    }

    fn on_connected_hook(&self) -> Option<OnConnected> {
        self.on_connected
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Connection event handler registered with the transport
///
/// Holds the session weakly: the transport is owned by the session, so a strong
/// reference here would keep both alive forever.
struct SessionEvents {
    inner: Weak<SessionInner>,
}

impl TransportEvents for SessionEvents {
    fn on_connect(&self, result: ConnectResult) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        info!(result = ?result, "Received connect status");

        if result.is_success() {
            inner.state.set(ConnectionState::Connected);
            inner.set_lifecycle(LifecycleState::Connected);
            let hook = inner.on_connected_hook();
            let session = MqttSession { inner };
            if let Some(hook) = hook {
                hook(&session);
            }
            session.inner.outcome.set(ConnectionState::Connected);
        } else {
            inner.state.set(ConnectionState::Disconnected);
            inner.outcome.set(ConnectionState::Disconnected);
        }
    }

    fn on_disconnect(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        warn!("Client disconnected from MQTT broker");
        inner.state.set(ConnectionState::Unknown);
        inner.set_lifecycle(LifecycleState::Connecting);
    }
}

/// Resilient MQTT session
///
/// Cheap to clone; clones share the same connection. Dropping the last clone stops
/// the transport.
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

impl MqttSession {
    /// Session for `host:port` with default timings over the rumqttc transport
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(ConnectionConfig::new(host, port))
    }

    /// Session with explicit configuration over the rumqttc transport
    pub fn with_config(config: ConnectionConfig) -> Self {
        let factory: TransportFactory = Arc::new(
            |config: &ConnectionConfig| -> Result<Arc<dyn Transport>, TransportError> {
                let transport: Arc<dyn Transport> =
                    Arc::new(RumqttTransport::new(config.client_id.clone()));
                Ok(transport)
            },
        );
        Self::with_transport_factory(config, factory)
    }

    /// Session over a caller-supplied transport, built lazily on the first `connect`
    pub fn with_transport_factory(config: ConnectionConfig, factory: TransportFactory) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                factory,
                transport: OnceCell::new(),
                state: SharedConnectionState::new(),
                outcome: SharedConnectionState::new(),
                lifecycle: Mutex::new(LifecycleState::Idle),
                on_connected: RwLock::new(None),
                connect_attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Install the hook run after each accepted connection, replacing any previous one
    ///
    /// The hook runs on the transport's event task, after the state has become
    /// `Connected` and before the pending `connect()` returns. It may call
    /// [`subscribe`](Self::subscribe) on the session it is handed but must not block.
    /// A hook that captures a clone of the session keeps it alive for good.
    pub fn set_on_connected<F>(&self, hook: F)
    where
        F: Fn(&MqttSession) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_connected
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(hook));
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    /// Connect requests issued so far, across all `connect()` calls
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Connect to the broker, retrying until the broker accepts
    ///
    /// Does not return before the outcome is known. Refused attempts and transport
    /// faults are retried after `reconnect_delay_secs`, without limit. Returns `false`
    /// only when the configuration can never connect (empty host, port 0).
    pub async fn connect(&self) -> bool {
        let config = &self.inner.config;
        if let Err(e) = config.validate() {
            error!("Refusing to connect: {}", e);
            return false;
        }

        let span = session_span!(host = %config.host, port = config.port);
        async {
            info!(
                "Connecting to MQTT broker (host: {} | port: {})",
                config.host, config.port
            );

            loop {
                let attempt = self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                self.inner.set_lifecycle(LifecycleState::Connecting);

                match self.attempt_connect().await {
                    Ok(ConnectionState::Connected) => {
                        info!(attempt, "Connected to MQTT broker");
                        return true;
                    }
                    Ok(state) => warn!(attempt, ?state, "Connect attempt rejected by broker"),
                    Err(e) => warn!(attempt, "Connect attempt failed: {}", e),
                }

                self.inner.set_lifecycle(LifecycleState::Failed);
                info!(
                    delay_secs = config.reconnect_delay_secs,
                    "Retrying to connect with MQTT broker"
                );
                tokio::time::sleep(config.reconnect_delay()).await;
            }
        }
        .instrument(span)
        .await
    }

    /// One connect request: issue it and wait for its outcome
    async fn attempt_connect(&self) -> Result<ConnectionState, TransportError> {
        let config = &self.inner.config;
        self.inner.state.set(ConnectionState::Unknown);
        self.inner.outcome.set(ConnectionState::Unknown);

        let transport = self.transport()?;
        transport.set_reconnect_delay(MIN_RECONNECT_DELAY, config.reconnect_delay());
        transport.connect(&config.host, config.port, config.keep_alive())?;

        Ok(self
            .inner
            .outcome
            .wait_for_outcome(config.poll_interval())
            .await)
    }

    /// Transport handle, built and wired to the event handler on first use
    fn transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self.inner
            .transport
            .get_or_try_init(|| {
                let transport = (self.inner.factory)(&self.inner.config)?;
                transport.set_event_handler(Arc::new(SessionEvents {
                    inner: Arc::downgrade(&self.inner),
                }));
                debug!("Transport created and event handler registered");
                Ok(transport)
            })
            .cloned()
    }

    /// Transport handle if connected; `None` means the operation is dropped
    fn connected_transport(&self, operation: &str, topic: &str) -> Option<Arc<dyn Transport>> {
        if !self.inner.state.is_connected() {
            debug!(topic = %topic, "Not connected, dropping {}", operation);
            return None;
        }
        self.inner.transport.get().cloned()
    }

    /// Subscribe `handler` to `topic`; a silent no-op unless connected
    ///
    /// Re-subscribing a topic replaces its previous handler. The handler runs on the
    /// transport's event task with `(topic, payload)`.
    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let Some(transport) = self.connected_transport("subscribe", topic) else {
            return;
        };

        transport.message_callback_add(topic, Arc::new(handler));
        match transport.subscribe(topic, SUBSCRIBE_QOS) {
            Ok(()) => info!(topic = %topic, "Subscribed to topic"),
            Err(e) => warn!(topic = %topic, "Subscribe request failed: {}", e),
        }
    }

    /// Publish `data` to `topic` with exactly-once delivery; a silent no-op unless connected
    ///
    /// Waits until the broker has completed the acknowledgment handshake.
    pub async fn publish(&self, topic: &str, data: impl AsRef<[u8]>) {
        let Some(transport) = self.connected_transport("publish", topic) else {
            return;
        };

        let payload = Bytes::copy_from_slice(data.as_ref());
        let ack = match transport.publish(topic, payload, PUBLISH_QOS).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(topic = %topic, "Publish failed: {}", e);
                return;
            }
        };

        match ack.wait().await {
            Ok(()) => debug!(topic = %topic, "Publish acknowledged"),
            Err(e) => warn!(topic = %topic, "Publish not acknowledged: {}", e),
        }
    }

    /// Close the connection and stop the transport's event task
    pub async fn disconnect(&self) -> SessionResult<()> {
        if let Some(transport) = self.inner.transport.get().cloned() {
            transport.disconnect().await?;
            info!("MQTT session disconnected");
        }
        self.inner.state.set(ConnectionState::Disconnected);
        self.inner.outcome.set(ConnectionState::Disconnected);
        self.inner.set_lifecycle(LifecycleState::Idle);
        Ok(())
    }
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("config", &self.inner.config)
            .field("state", &self.connection_state())
            .field("lifecycle", &self.lifecycle_state())
            .finish()
    }
}
