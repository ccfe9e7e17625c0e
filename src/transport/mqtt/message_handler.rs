//! Pure event routing and publish-acknowledgment bookkeeping for the MQTT transport
//!
//! [`EventRouter`] turns rumqttc events and poll errors into [`EventRoute`] decisions.
//! [`AckTracker`] pairs publish requests with the packet identifiers rumqttc assigns
//! and resolves their [`PublishAck`](crate::transport::PublishAck) handles.

use crate::transport::QoS;
use bytes::Bytes;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Routing decisions for transport events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAccepted,
    /// Connect handshake refused or connection could not be established
    ConnectionRefused(String),
    /// An established connection dropped
    ConnectionLost(String),
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// A publish packet left the client with this packet identifier
    PublishSent { pkid: u16 },
    /// QoS 1 acknowledgment
    PublishAcknowledged { pkid: u16 },
    /// QoS 2 handshake completed
    PublishCompleted { pkid: u16 },
    /// Subscription confirmed by the broker
    SubscriptionConfirmed { pkid: u16, granted: usize },
    /// Infrastructure event (PingResp, PubRec, etc.)
    InfrastructureEvent(String),
    /// Outgoing event needing no action
    OutgoingEvent,
}

/// Pure routing of rumqttc events
pub struct EventRouter;

impl EventRouter {
    /// Route a successfully polled event
    pub fn route(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => {
                    if connack.code == ConnectReturnCode::Success {
                        EventRoute::ConnectionAccepted
                    } else {
                        EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                    }
                }
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged { pkid: puback.pkid },
                Packet::PubComp(pubcomp) => EventRoute::PublishCompleted { pkid: pubcomp.pkid },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    pkid: suback.pkid,
                    granted: suback.return_codes.len(),
                },
                Packet::Disconnect => {
                    EventRoute::ConnectionLost("broker closed the session".to_string())
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { pkid: *pkid },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Route a poll error
    ///
    /// Before the first accepted connection every error counts as a failed connect
    /// attempt; afterwards it is a lost connection.
    pub fn route_error(error: &ConnectionError, ever_connected: bool) -> EventRoute {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                EventRoute::ConnectionRefused(format!("{code:?}"))
            }
            other if !ever_connected => EventRoute::ConnectionRefused(other.to_string()),
            other => EventRoute::ConnectionLost(other.to_string()),
        }
    }
}

/// Pairs publish requests with packet identifiers and resolves them on acknowledgment
///
/// Requests are queued in submission order; rumqttc reports outgoing publishes in the
/// same order, so each `PublishSent` claims the oldest queued request. A `PublishSent`
/// for an identifier that is already in flight is a retransmission after reconnect.
#[derive(Debug, Default)]
pub struct AckTracker {
    queued: VecDeque<(QoS, oneshot::Sender<()>)>,
    in_flight: HashMap<u16, (QoS, oneshot::Sender<()>)>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter for the next publish handed to the client
    pub fn enqueue(&mut self, qos: QoS, tx: oneshot::Sender<()>) {
        self.queued.push_back((qos, tx));
    }

    /// Undo the most recent `enqueue` when the request never reached the client
    pub fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    pub fn on_publish_sent(&mut self, pkid: u16) {
        if pkid != 0 && self.in_flight.contains_key(&pkid) {
            debug!(pkid, "Retransmitted publish");
            return;
        }

        let Some((qos, tx)) = self.queued.pop_front() else {
            warn!(pkid, "Outgoing publish without a pending waiter");
            return;
        };

        match qos {
            QoS::AtMostOnce => {
                let _ = tx.send(());
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.in_flight.insert(pkid, (qos, tx));
            }
        }
    }

    pub fn on_puback(&mut self, pkid: u16) {
        self.complete(pkid, QoS::AtLeastOnce);
    }

    pub fn on_pubcomp(&mut self, pkid: u16) {
        self.complete(pkid, QoS::ExactlyOnce);
    }

    fn complete(&mut self, pkid: u16, expected: QoS) {
        match self.in_flight.get(&pkid) {
            Some((qos, _)) if *qos == expected => {
                if let Some((_, tx)) = self.in_flight.remove(&pkid) {
                    let _ = tx.send(());
                }
            }
            Some((qos, _)) => {
                warn!(pkid, ?qos, ?expected, "Acknowledgment type does not match publish QoS");
            }
            None => debug!(pkid, "Acknowledgment for unknown packet"),
        }
    }

    /// Number of waiters not yet resolved
    pub fn pending(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    /// Drop every waiter; their handles resolve with `AckDropped`
    pub fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}
