//! Impure I/O for the rumqttc-backed transport
//!
//! Owns the rumqttc client and the background event task that polls its event loop.
//! Connection outcomes and drops are reported through [`TransportEvents`]; incoming
//! messages go to the [`TopicRegistry`]; publish acknowledgments resolve through the
//! [`AckTracker`].

use super::backoff::ReconnectBackoff;
use super::message_handler::{AckTracker, EventRoute, EventRouter};
use crate::mqtt_span;
use crate::session::registry::{MessageHandler, TopicRegistry};
use crate::transport::{
    ConnectResult, PublishAck, QoS, Transport, TransportError, TransportEvents,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between the client handle and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect` waits for the event task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shortest keep-alive rumqttc accepts
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Subscribe request waiting to be handed to the client
type SubscribeRequest = (String, QoS);

/// State shared between the transport handle and its event task
struct Shared {
    events: RwLock<Option<Arc<dyn TransportEvents>>>,
    backoff: Mutex<ReconnectBackoff>,
    registry: TopicRegistry,
    subscriptions: Mutex<HashMap<String, QoS>>,
    acks: Mutex<AckTracker>,
    shutting_down: AtomicBool,
}

impl Shared {
    fn emit_connect(&self, result: ConnectResult) {
        let handler = read_lock(&self.events).clone();
        match handler {
            Some(events) => events.on_connect(result),
            None => debug!(?result, "Connect result with no event handler registered"),
        }
    }

    fn emit_disconnect(&self) {
        let handler = read_lock(&self.events).clone();
        if let Some(events) = handler {
            events.on_disconnect();
        }
    }

    fn next_backoff(&self) -> Duration {
        lock(&self.backoff).next_delay()
    }
}

/// Running connection: client handle, the task polling its event loop, and the
/// task forwarding subscribe requests to the client
struct Driver {
    client: AsyncClient,
    outbox: mpsc::UnboundedSender<SubscribeRequest>,
    handle: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl Driver {
    fn abort(&self) {
        self.handle.abort();
        self.forwarder.abort();
    }
}

/// Production transport over rumqttc (MQTT 3.1.1)
pub struct RumqttTransport {
    client_id: String,
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
    // Keeps the ack queue in the same order as packets handed to the client
    publish_order: tokio::sync::Mutex<()>,
}

impl RumqttTransport {
    /// Create a transport; nothing touches the network until `connect`
    pub fn new(client_id: Option<String>) -> Self {
        let client_id =
            client_id.unwrap_or_else(|| format!("mqtt-session-{}", uuid::Uuid::new_v4().simple()));

        Self {
            client_id,
            shared: Arc::new(Shared {
                events: RwLock::new(None),
                backoff: Mutex::new(ReconnectBackoff::default()),
                registry: TopicRegistry::new(),
                subscriptions: Mutex::new(HashMap::new()),
                acks: Mutex::new(AckTracker::new()),
                shutting_down: AtomicBool::new(false),
            }),
            driver: Mutex::new(None),
            publish_order: tokio::sync::Mutex::new(()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether an event task is currently running
    pub fn is_running(&self) -> bool {
        lock(&self.driver)
            .as_ref()
            .is_some_and(|driver| !driver.handle.is_finished())
    }

    fn current_outbox(&self) -> Result<mpsc::UnboundedSender<SubscribeRequest>, TransportError> {
        lock(&self.driver)
            .as_ref()
            .map(|driver| driver.outbox.clone())
            .ok_or(TransportError::NotStarted)
    }

    fn current_client(&self) -> Result<AsyncClient, TransportError> {
        lock(&self.driver)
            .as_ref()
            .map(|driver| driver.client.clone())
            .ok_or(TransportError::NotStarted)
    }

    fn build_options(&self, host: &str, port: u16, keep_alive: Duration) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_keep_alive(keep_alive.max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);
        options
    }

    /// Poll the event loop until shutdown or a failed first connection
    async fn drive(
        mut event_loop: EventLoop,
        outbox: mpsc::UnboundedSender<SubscribeRequest>,
        shared: Arc<Shared>,
    ) {
        let mut ever_connected = false;
        let mut connected = false;

        loop {
            let route = match event_loop.poll().await {
                Ok(event) => EventRouter::route(&event),
                Err(e) => {
                    if shared.shutting_down.load(Ordering::SeqCst) {
                        debug!("Event loop closed during shutdown: {}", e);
                        break;
                    }
                    EventRouter::route_error(&e, ever_connected)
                }
            };

            match route {
                EventRoute::ConnectionAccepted => {
                    lock(&shared.backoff).reset();
                    if ever_connected {
                        info!("Reconnected to MQTT broker");
                    }
                    Self::resubscribe(&outbox, &shared);
                    ever_connected = true;
                    connected = true;
                    shared.emit_connect(ConnectResult::Accepted);
                }
                EventRoute::ConnectionRefused(reason) => {
                    warn!(reason = %reason, "MQTT connect attempt refused");
                    connected = false;
                    shared.emit_connect(ConnectResult::Refused(reason));
                    if !ever_connected {
                        // The session's retry loop issues the next attempt
                        break;
                    }
                    tokio::time::sleep(shared.next_backoff()).await;
                }
                EventRoute::ConnectionLost(reason) => {
                    // Waiters stay tracked: rumqttc replays unacknowledged publishes
                    // and releases under their original packet ids once reconnected
                    if connected {
                        warn!(reason = %reason, "Client disconnected from MQTT broker");
                        connected = false;
                        shared.emit_disconnect();
                    } else {
                        debug!(reason = %reason, "Automatic reconnect attempt failed");
                    }
                    let delay = shared.next_backoff();
                    debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                    tokio::time::sleep(delay).await;
                }
                EventRoute::MessageReceived { topic, payload } => {
                    debug!(topic = %topic, bytes = payload.len(), "Received MQTT message");
                    shared.registry.dispatch(&topic, &payload);
                }
                EventRoute::PublishSent { pkid } => {
                    lock(&shared.acks).on_publish_sent(pkid);
                }
                EventRoute::PublishAcknowledged { pkid } => {
                    lock(&shared.acks).on_puback(pkid);
                }
                EventRoute::PublishCompleted { pkid } => {
                    lock(&shared.acks).on_pubcomp(pkid);
                }
                EventRoute::SubscriptionConfirmed { pkid, granted } => {
                    debug!(pkid, granted, "Subscription confirmed");
                }
                EventRoute::InfrastructureEvent(event) => {
                    tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                }
                EventRoute::OutgoingEvent => {
                    if shared.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }

        lock(&shared.acks).clear();
        debug!("MQTT event task stopped");
    }

    /// Re-issue every known subscription after a ConnAck
    fn resubscribe(outbox: &mpsc::UnboundedSender<SubscribeRequest>, shared: &Shared) {
        let subscriptions: Vec<SubscribeRequest> = lock(&shared.subscriptions)
            .iter()
            .map(|(topic, qos)| (topic.clone(), *qos))
            .collect();

        for (topic, qos) in subscriptions {
            debug!(target: "mqtt_transport", "Re-subscribing to: {}", topic);
            if outbox.send((topic, qos)).is_err() {
                error!("Subscribe forwarder stopped, cannot re-subscribe");
                return;
            }
        }
    }

    /// Hand queued subscribe requests to the client, waiting for room in its channel
    ///
    /// Runs apart from the event task: the channel only drains while the event loop
    /// is polled, and subscribe requests are often issued from that task.
    async fn forward_subscriptions(
        client: AsyncClient,
        mut requests: mpsc::UnboundedReceiver<SubscribeRequest>,
    ) {
        while let Some((topic, qos)) = requests.recv().await {
            if let Err(e) = client.subscribe(topic.as_str(), qos.into()).await {
                warn!(topic = %topic, "Event loop gone, dropping subscribe request: {}", e);
                break;
            }
        }
    }

    fn stop_driver(&self) -> Option<Driver> {
        let previous = lock(&self.driver).take();
        if let Some(driver) = &previous {
            driver.abort();
        }
        lock(&self.shared.acks).clear();
        previous
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    fn set_event_handler(&self, events: Arc<dyn TransportEvents>) {
        *write_lock(&self.shared.events) = Some(events);
    }

    fn set_reconnect_delay(&self, min: Duration, max: Duration) {
        *lock(&self.shared.backoff) = ReconnectBackoff::new(min, max);
    }

    fn connect(&self, host: &str, port: u16, keep_alive: Duration) -> Result<(), TransportError> {
        if host.is_empty() || port == 0 {
            return Err(TransportError::ConnectFailed(format!(
                "invalid broker address {host}:{port}"
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        // A new request replaces any previous attempt and its event task
        self.stop_driver();
        self.shared.shutting_down.store(false, Ordering::SeqCst);

        let options = self.build_options(host, port, keep_alive);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (outbox, requests) = mpsc::unbounded_channel();
        let span = mqtt_span!(client_id = %self.client_id, host = %host, port);

        // Held while spawning so the event task never sees a missing driver
        let mut driver = lock(&self.driver);
        let forwarder = runtime.spawn(
            Self::forward_subscriptions(client.clone(), requests).instrument(span.clone()),
        );
        let handle = runtime.spawn(
            Self::drive(event_loop, outbox.clone(), self.shared.clone()).instrument(span),
        );
        *driver = Some(Driver {
            client,
            outbox,
            handle,
            forwarder,
        });

        debug!(client_id = %self.client_id, host = %host, port, "Issued MQTT connect request");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<PublishAck, TransportError> {
        let client = self.current_client()?;
        let (tx, ack) = PublishAck::pending();

        let _order = self.publish_order.lock().await;
        lock(&self.shared.acks).enqueue(qos, tx);
        if let Err(e) = client.publish_bytes(topic, qos.into(), false, payload).await {
            lock(&self.shared.acks).cancel_last();
            return Err(TransportError::PublishFailed(Box::new(e)));
        }

        Ok(ack)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        // Recorded first so the next ConnAck re-issues it even if this send is lost
        lock(&self.shared.subscriptions).insert(topic.to_string(), qos);
        self.current_outbox()?
            .send((topic.to_string(), qos))
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))
    }

    fn message_callback_add(&self, topic: &str, handler: MessageHandler) {
        self.shared.registry.insert(topic, handler);
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.shutting_down.store(true, Ordering::SeqCst);

        let driver = lock(&self.driver).take();
        let Some(Driver {
            client,
            mut handle,
            forwarder,
            ..
        }) = driver
        else {
            return Ok(());
        };
        forwarder.abort();

        // Fails only when the event loop is already gone
        if let Err(e) = client.disconnect().await {
            debug!("Event loop already stopped before disconnect: {}", e);
        }

        let result = match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => {
                info!("MQTT event task shut down gracefully");
                Ok(())
            }
            Ok(Err(e)) if e.is_panic() => Err(TransportError::DisconnectFailed(Box::new(e))),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!("MQTT event task didn't shut down gracefully, aborting");
                handle.abort();
                Ok(())
            }
        };
        lock(&self.shared.acks).clear();

        result
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.stop_driver();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingEvents {
        results: Mutex<Vec<ConnectResult>>,
        disconnects: AtomicUsize,
    }

    impl TransportEvents for RecordingEvents {
        fn on_connect(&self, result: ConnectResult) {
            lock(&self.results).push(result);
        }

        fn on_disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_generated_client_id() {
        let transport = RumqttTransport::new(None);
        assert!(transport.client_id().starts_with("mqtt-session-"));

        let transport = RumqttTransport::new(Some("fixed-id".to_string()));
        assert_eq!(transport.client_id(), "fixed-id");
    }

    #[test]
    fn test_connect_requires_runtime() {
        let transport = RumqttTransport::new(None);
        let result = transport.connect("localhost", 1883, Duration::from_secs(10));
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_address() {
        let transport = RumqttTransport::new(None);
        assert!(transport.connect("", 1883, Duration::from_secs(10)).is_err());
        assert!(transport.connect("localhost", 0, Duration::from_secs(10)).is_err());
        assert!(!transport.is_running());
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let transport = RumqttTransport::new(None);
        assert!(matches!(
            transport.subscribe("t", QoS::AtMostOnce),
            Err(TransportError::NotStarted)
        ));
        // Still recorded, so the first ConnAck issues it
        assert!(lock(&transport.shared.subscriptions).contains_key("t"));
        assert!(matches!(
            transport
                .publish("t", Bytes::from_static(b"x"), QoS::ExactlyOnce)
                .await,
            Err(TransportError::NotStarted)
        ));
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_refused() {
        let transport = RumqttTransport::new(None);
        let events = Arc::new(RecordingEvents::default());
        transport.set_event_handler(events.clone());

        // Nothing listens on port 1 locally
        transport
            .connect("127.0.0.1", 1, Duration::from_secs(10))
            .expect("connect request should be issued");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while lock(&events.results).is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let results = lock(&events.results).clone();
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_success());
        assert_eq!(events.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_message_callback_registration() {
        let transport = RumqttTransport::new(None);
        transport.message_callback_add("a/#", Arc::new(|_: &str, _: &[u8]| {}));
        transport.message_callback_add("a/#", Arc::new(|_: &str, _: &[u8]| {}));
        assert_eq!(transport.shared.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_after_failed_attempt() {
        let transport = RumqttTransport::new(None);
        transport
            .connect("127.0.0.1", 1, Duration::from_secs(10))
            .expect("connect request should be issued");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while transport.is_running() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!transport.is_running());
        assert!(transport.disconnect().await.is_ok());
    }
}
