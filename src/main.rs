//! Elohim Quests Daemon
//!
//! Serves the quest lifecycle API and dispatches reward settlements.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (static membership from config, ledger disabled)
//! elohim-quests
//!
//! # Start with custom config
//! elohim-quests --config /path/to/config.toml
//!
//! # Point at real membership and ledger services
//! elohim-quests --membership-url http://localhost:8080 --ledger-url http://localhost:8545
//! ```

use clap::Parser;
use elohim_quests::services::events::spawn_logging_listener;
use elohim_quests::{Config, HttpServer, QuestDb, Services};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Pending settlements swept per startup
const STARTUP_SWEEP_LIMIT: i64 = 500;

#[derive(Parser, Debug)]
#[command(name = "elohim-quests")]
#[command(about = "Quest lifecycle and reward settlement service for Elohim groups")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Group membership service base URL
    #[arg(long, env = "QUESTS_MEMBERSHIP_URL")]
    membership_url: Option<String>,

    /// Reward ledger gateway base URL
    #[arg(long, env = "QUESTS_LEDGER_URL")]
    ledger_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("elohim_quests=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if args.membership_url.is_some() {
        config.membership_url = args.membership_url;
    }
    if args.ledger_url.is_some() {
        config.ledger_url = args.ledger_url;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting elohim-quests"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    if config.membership_url.is_none() {
        warn!(groups = config.groups.len(), "No membership URL set, using static groups from config");
    }
    if config.ledger_url.is_none() {
        warn!("No ledger URL set, reward transfers will be recorded as failed");
    }

    let db = QuestDb::open(
        &config.database_path(),
        config.pool_size,
        Duration::from_millis(config.busy_timeout_ms),
    )?;
    let services = Arc::new(Services::from_config(&config, db)?);
    spawn_logging_listener(services.events.clone());

    // Verifications committed before a restart but never dispatched
    let settlement = services.settlement.clone();
    tokio::spawn(async move {
        match settlement.sweep_pending(STARTUP_SWEEP_LIMIT).await {
            Ok(outcomes) if !outcomes.is_empty() => {
                info!(count = outcomes.len(), "Startup settlement sweep finished")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Startup settlement sweep failed"),
        }
    });

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(services, http_addr));

    info!("HTTP API available at http://{}", http_addr);

    tokio::select! {
        result = http_server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
