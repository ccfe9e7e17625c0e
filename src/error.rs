//! Error types for session operations
//!
//! The session core itself never surfaces errors from `connect`, `publish` or
//! `subscribe`; failures there are logged and retried or dropped. [`SessionError`]
//! covers the edges that do report failure: teardown and the command line client.

use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
