//! mqtt-session - resilient MQTT session management
//!
//! Wraps an MQTT client with a session that survives an unavailable or flapping broker:
//! - `connect` blocks until the broker accepts the connection, retrying forever
//! - `publish` and `subscribe` are silent no-ops while disconnected
//! - an `on_connected` hook runs on every accepted connection, before `connect` returns
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_session::{ConnectionConfig, MqttSession};
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::new("localhost", 1883).with_reconnect_delay_secs(5);
//! let session = MqttSession::with_config(config);
//!
//! session.connect().await;
//! session.publish("status/online", b"1").await;
//! session.disconnect().await.ok();
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError, ConnectionConfig};
pub use error::{SessionError, SessionResult};
pub use session::{ConnectionState, LifecycleState, MqttSession, OnConnected};
pub use transport::{QoS, Transport, TransportError, TransportFactory};
