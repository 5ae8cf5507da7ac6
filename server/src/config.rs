//! Configuration for the relay launcher.
//!
//! Sources, highest priority first:
//! - CLI arguments
//! - Environment variables (`PEERLINK_*`)
//! - TOML config file
//! - Defaults

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use peerlink_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Command-line arguments for the relay server.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "peerlink-server")]
#[command(about = "Peerlink signaling relay - pairs two participants per session")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(long, short = 'c', env = "PEERLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long, env = "PEERLINK_HOST")]
    pub host: Option<String>,

    /// Port to bind
    #[arg(long, short = 'p', env = "PEERLINK_PORT")]
    pub port: Option<u16>,

    /// Participants admitted to one session
    #[arg(long, env = "PEERLINK_MAX_PARTICIPANTS")]
    pub max_participants: Option<usize>,

    /// Largest accepted signaling frame in bytes
    #[arg(long, env = "PEERLINK_MAX_MESSAGE_SIZE")]
    pub max_message_size: Option<usize>,

    /// Log output format
    #[arg(long, value_enum, env = "PEERLINK_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,

    /// Filter directives used when `RUST_LOG` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Full server configuration (merged from all sources).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay settings
    pub relay: RelayConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional config file.
    ///
    /// Environment variables reach this function through `clap`'s `env`
    /// fallbacks, so a flag beats its variable and both beat the file.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(host) = &args.host {
            config.relay.host = host.clone();
        }
        if let Some(port) = args.port {
            config.relay.port = port;
        }
        if let Some(max) = args.max_participants {
            config.relay.max_participants_per_session = max;
        }
        if let Some(size) = args.max_message_size {
            config.relay.max_message_size = size;
        }
        if let Some(format) = args.log_format {
            config.logging.format = format;
        }

        config
            .relay
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid relay configuration: {}", e))?;

        Ok(config)
    }

    /// Load configuration from a TOML file.
    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ServerConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }
}
