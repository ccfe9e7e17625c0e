//! Connection state shared between the caller and the transport's event task
//!
//! [`SharedConnectionState`] wraps a `watch` channel: writes replace the value
//! atomically and a pending `connect()` is woken on every change, with the poll
//! interval as an upper bound on how long it sleeps between checks.

use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Tri-state view of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outcome pending, or an established session just dropped
    Unknown,
    /// Broker accepted the connection
    Connected,
    /// Broker refused the last connect attempt
    Disconnected,
}

/// Lifecycle of the session as seen by its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No connect attempt has been made, or the session was shut down
    Idle,
    /// A connect attempt is in flight
    Connecting,
    /// `connect()` has completed successfully
    Connected,
    /// The last attempt failed and a retry is scheduled
    Failed,
}

/// Thread-safe connection state cell
#[derive(Debug, Clone)]
pub struct SharedConnectionState {
    tx: watch::Sender<ConnectionState>,
}

impl SharedConnectionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Unknown);
        Self { tx }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Replace the state, returning the previous value
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
        previous
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Wait until the state is no longer `Unknown`
    ///
    /// Re-checks at least every `poll_interval` even if no change notification
    /// arrives, and never returns while the state is `Unknown`.
    pub async fn wait_for_outcome(&self, poll_interval: Duration) -> ConnectionState {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current != ConnectionState::Unknown {
                return current;
            }
            // Timeout or change both lead to a re-check; the sender lives in self
            let _ = tokio::time::timeout(poll_interval, rx.changed()).await;
        }
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
