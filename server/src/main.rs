//! Peerlink signaling relay server

use anyhow::{Context, Result};
use clap::Parser;
use peerlink_relay::RelayServer;
use peerlink_server::{CliArgs, LogFormat, LoggingConfig, ServerConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "peerlink_server=debug,peerlink_relay=debug,tower_http=info";

fn init_tracing(logging: &LoggingConfig) {
    let fallback = logging
        .filter
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| fallback.into());

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = ServerConfig::load(&args)?;

    init_tracing(&config.logging);

    info!("Starting Peerlink relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        max_participants = config.relay.max_participants_per_session,
        max_message_size = config.relay.max_message_size,
        "Session limits"
    );

    let server = RelayServer::bind(config.relay.clone())
        .await
        .with_context(|| format!("Failed to bind {}", config.relay.bind_addr()))?;

    server
        .run_until(shutdown_signal())
        .await
        .context("Relay server stopped with an error")?;

    info!("Relay stopped");
    Ok(())
}
