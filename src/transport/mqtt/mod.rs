//! rumqttc-backed transport
//!
//! Split the same way as the rest of the transport code: pure decision logic in
//! [`backoff`] and [`message_handler`], impure I/O in [`client`].
//!
//! - [`backoff`] - bounded exponential delay for automatic reconnects
//! - [`message_handler`] - event routing and publish-acknowledgment bookkeeping
//! - [`client`] - [`RumqttTransport`], the event task and rumqttc client handle

pub mod backoff;
pub mod client;
pub mod message_handler;

pub use backoff::ReconnectBackoff;
pub use client::RumqttTransport;
pub use message_handler::{AckTracker, EventRoute, EventRouter};
