//! Port Daemon - per-node control plane agent
//!
//! Runs on every proxy node and:
//! - Keeps the proxy's credential table in line with the user snapshot
//! - Meters per-user traffic and spools deltas for upload
//! - Restarts the process when a job hangs or the node profile changes

use clap::Parser;
use port_daemon::{Daemon, DaemonConfig, DaemonError, DaemonResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Port Daemon CLI
#[derive(Parser)]
#[command(name = "portd")]
#[command(about = "Port Daemon - per-node control plane agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PORT_CONFIG")]
    config: Option<String>,

    /// This node's id
    #[arg(short, long, env = "PORT_NODE_ID")]
    node_id: Option<String>,

    /// Log level
    #[arg(long, env = "PORT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "PORT_LOG_JSON")]
    json: bool,

    /// Shorthand for `--log-level debug`
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(node_id) = cli.node_id {
        config.node.id = Some(node_id);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
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

    let daemon = Daemon::new(config)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %daemon.node_id(),
        "Starting port daemon"
    );
    daemon.run().await
}
