//! Session configuration
//!
//! [`ConnectionConfig`] is the constructor-level configuration of a session: broker
//! endpoint, keep-alive, reconnect delay and poll interval. [`ClientConfig`] wraps it
//! in the TOML file form read by the command line client.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Broker endpoint and timing parameters for a session
///
/// Immutable once handed to a session. `reconnect_delay_secs` is both the fixed delay
/// between explicit connect attempts and the ceiling of the transport's automatic
/// reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Keep-alive interval in seconds (default: 10)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Delay between connect attempts in seconds (default: 10)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// How often a pending connect re-checks the connection state (default: 1)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Fixed client identifier; a random one is generated per session when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Floor for the connect poll interval; a zero setting would spin
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn default_keep_alive() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    1
}

impl ConnectionConfig {
    /// Create a configuration for `host:port` with default timings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            keep_alive_secs: default_keep_alive(),
            reconnect_delay_secs: default_reconnect_delay(),
            poll_interval_secs: default_poll_interval(),
            client_id: None,
        }
    }

    pub fn with_keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_reconnect_delay_secs(mut self, secs: u64) -> Self {
        self.reconnect_delay_secs = secs;
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Poll interval, never shorter than [`MIN_POLL_INTERVAL`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs).max(MIN_POLL_INTERVAL)
    }

    /// Check the preconditions of `connect()`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker host must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging section of the client configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// TOML configuration file for the command line client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.broker.validate()?;
        Ok(config)
    }

    /// Build a configuration from an `mqtt://host[:port]` URL with default timings
    pub fn from_broker_url(broker_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            broker: parse_broker_url(broker_url)?,
            logging: LoggingSection::default(),
        })
    }
}

/// Parse `mqtt://host[:port]` (or `tcp://`) into a [`ConnectionConfig`]
pub fn parse_broker_url(broker_url: &str) -> Result<ConnectionConfig, ConfigError> {
    let url = url::Url::parse(broker_url)
        .map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "mqtt" | "tcp") {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (unsupported scheme '{}')",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(1883);

    Ok(ConnectionConfig::new(host, port))
}
