//! Session core
//!
//! - [`state`] - shared connection state and session lifecycle
//! - [`registry`] - per-topic message handler registry
//! - [`manager`] - [`MqttSession`], the connect loop and publish/subscribe gate

pub mod manager;
pub mod registry;
pub mod state;

pub use manager::{MqttSession, OnConnected, PUBLISH_QOS, SUBSCRIBE_QOS};
pub use registry::{topic_matches, MessageHandler, TopicRegistry};
pub use state::{ConnectionState, LifecycleState, SharedConnectionState};
