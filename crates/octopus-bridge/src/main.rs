//! Octopus daemon - MCP bridge for the Diaspora event fabric
//!
//! Serves the Diaspora tool set over streamable HTTP:
//! - login, logout and access-key rotation
//! - topic listing and registration
//! - publishing and peeking at the newest event of a topic

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use octopus_bridge::{BridgeConfig, DaemonError, DaemonResult, Server};

/// Octopus Daemon CLI
#[derive(Parser)]
#[command(name = "octopusd")]
#[command(about = "Octopus - MCP bridge for the Diaspora event fabric", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OCTOPUS_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "OCTOPUS_LISTEN_ADDR")]
    listen: Option<String>,

    /// Native-app client id, overrides the configuration file
    #[arg(long, env = "GLOBUS_CLIENT_ID")]
    client_id: Option<String>,

    /// Log level
    #[arg(long, env = "OCTOPUS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "OCTOPUS_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = BridgeConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(client_id) = cli.client_id {
        config.auth.client_id = Some(client_id);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "Starting Octopus bridge"
    );

    Server::new(config)?.run().await
}
