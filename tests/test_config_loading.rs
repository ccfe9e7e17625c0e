//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading client configuration files.

use mqtt_session::config::{ClientConfig, ConfigError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[broker]
host = "broker.example.com"
port = 8883
keep_alive_secs = 30
reconnect_delay_secs = 5
poll_interval_secs = 2
client_id = "kitchen-sensor"

[logging]
level = "DEBUG"
format = "json"
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.host, "broker.example.com");
    assert_eq!(config.broker.port, 8883);
    assert_eq!(config.broker.keep_alive(), Duration::from_secs(30));
    assert_eq!(config.broker.reconnect_delay(), Duration::from_secs(5));
    assert_eq!(config.broker.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.broker.client_id.as_deref(), Some("kitchen-sensor"));
    assert_eq!(config.logging.level, "DEBUG");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_config_applies_defaults_when_not_specified() {
    let temp_file = write_config(
        r#"
[broker]
host = "localhost"
port = 1883
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.keep_alive_secs, 10);
    assert_eq!(config.broker.reconnect_delay_secs, 10);
    assert_eq!(config.broker.poll_interval_secs, 1);
    assert!(config.broker.client_id.is_none());
    assert_eq!(config.logging.level, "INFO");
    assert_eq!(config.logging.format, "compact");
}

#[test]
fn test_config_rejects_missing_file() {
    let result = ClientConfig::load_from_file(std::path::Path::new("/nonexistent/mqtt.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_rejects_malformed_toml() {
    let temp_file = write_config("[broker\nhost = ");
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_missing_broker_section() {
    let temp_file = write_config("[logging]\nlevel = \"INFO\"\n");
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_accepts_zero_timings() {
    let temp_file = write_config(
        r#"
[broker]
host = "localhost"
port = 1883
reconnect_delay_secs = 0
poll_interval_secs = 0
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.broker.reconnect_delay(), Duration::ZERO);
    assert!(config.broker.poll_interval() > Duration::ZERO);
}

#[test]
fn test_config_rejects_empty_host() {
    let temp_file = write_config(
        r#"
[broker]
host = ""
port = 1883
"#,
    );

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_rejects_out_of_range_port() {
    let temp_file = write_config(
        r#"
[broker]
host = "localhost"
port = 70000
"#,
    );

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_from_broker_url() {
    let config = ClientConfig::from_broker_url("mqtt://broker.example.com:1884").unwrap();
    assert_eq!(config.broker.host, "broker.example.com");
    assert_eq!(config.broker.port, 1884);

    let config = ClientConfig::from_broker_url("tcp://10.0.0.5").unwrap();
    assert_eq!(config.broker.port, 1883);

    assert!(matches!(
        ClientConfig::from_broker_url("http://broker.example.com"),
        Err(ConfigError::InvalidBrokerUrl(_))
    ));
    assert!(matches!(
        ClientConfig::from_broker_url("not a url"),
        Err(ConfigError::InvalidBrokerUrl(_))
    ));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = ClientConfig::from_broker_url("mqtt://localhost:1883").unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    assert_eq!(ClientConfig::from_toml_str(&rendered).unwrap(), config);
}
