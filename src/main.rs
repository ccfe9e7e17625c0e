//! mqtt-session command line client
//!
//! Connects through [`MqttSession`], waiting out broker outages, to listen on a
//! topic filter or publish a single message.

use chrono::Utc;
use clap::{Parser, Subcommand};
use mqtt_session::config::{ClientConfig, ConfigError};
use mqtt_session::observability::{init_default_logging, init_logging, logging, LogFormat};
use mqtt_session::MqttSession;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info};

/// Resilient MQTT session client
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "MQTT client that blocks until the broker is reachable")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, e.g. mqtt://localhost:1883 (ignored when --config is given)
    #[arg(short, long, env = "MQTT_BROKER_URL")]
    broker: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a topic filter and print messages until interrupted
    Listen {
        #[arg(short, long)]
        topic: String,
    },
    /// Publish one message and wait for the broker to acknowledge it
    Publish {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        message: String,
    },
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(cli.config.as_deref(), cli.broker.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_default_logging();
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if std::env::var("LOG_LEVEL").is_ok() || std::env::var("LOG_FORMAT").is_ok() {
        init_default_logging();
    } else {
        init_logging(
            logging::parse_level(&config.logging.level),
            LogFormat::parse(&config.logging.format),
            false,
        );
    }

    let result = match cli.command {
        Commands::Listen { topic } => listen(config, topic).await,
        Commands::Publish { topic, message } => publish(config, topic, message).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: Option<&Path>,
    broker_url: Option<&str>,
) -> Result<ClientConfig, ConfigError> {
    if let Some(path) = config_path {
        return ClientConfig::load_from_file(path);
    }
    if let Some(url) = broker_url {
        return ClientConfig::from_broker_url(url);
    }

    let default_path = Path::new("mqtt-session.toml");
    if default_path.exists() {
        return ClientConfig::load_from_file(default_path);
    }
    ClientConfig::from_broker_url("mqtt://localhost:1883")
}

async fn listen(config: ClientConfig, topic: String) -> Result<(), Box<dyn std::error::Error>> {
    let session = MqttSession::with_config(config.broker);

    // Subscribing from the hook restores the subscription after every reconnect
    session.set_on_connected(move |session: &MqttSession| {
        session.subscribe(&topic, |topic: &str, payload: &[u8]| {
            let line = json!({
                "received_at": Utc::now().to_rfc3339(),
                "topic": topic,
                "payload": String::from_utf8_lossy(payload),
            });
            println!("{line}");
        });
    });

    tokio::select! {
        connected = session.connect() => {
            if !connected {
                return Err("invalid connection configuration".into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("Interrupted before the broker accepted the connection");
            return Ok(());
        }
    }

    info!("Listening, press Ctrl-C to stop");
    signal::ctrl_c().await?;

    info!("Shutting down");
    session.disconnect().await?;
    Ok(())
}

async fn publish(
    config: ClientConfig,
    topic: String,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = MqttSession::with_config(config.broker);

    if !session.connect().await {
        return Err("invalid connection configuration".into());
    }

    session.publish(&topic, message.as_bytes()).await;
    info!(topic = %topic, bytes = message.len(), "Message published");

    session.disconnect().await?;
    Ok(())
}

fn handle_config_command(config: &ClientConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.broker.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    info!("Configuration validation complete");
    Ok(())
}
