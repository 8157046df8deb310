//! NCMP inventory daemon
//!
//! Runs one cluster member of the CM handle inventory:
//! 1. Accepts registration deltas and subscription responses over HTTP
//! 2. Syncs module references and operational data in the background
//!
//! Usage:
//!   ncmp-daemon --database ncmp.db --http-port 8883

use anyhow::{Context, Result};
use clap::Parser;
use ncmp_daemon::{build_router, log_events, Service};
use ncmp_storage::SqliteHandleStore;
use ncmp_sync::{ChannelEventPublisher, NcmpConfig};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ncmp-daemon")]
#[command(about = "NCMP CM handle inventory service")]
struct Args {
    /// JSON configuration file; built-in defaults apply without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, default_value = "ncmp.db")]
    database: PathBuf,

    /// HTTP API port
    #[arg(long, default_value = "8883")]
    http_port: u16,

    /// Overrides the configured instance id
    #[arg(long)]
    instance_id: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => NcmpConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => NcmpConfig::default(),
    };
    if let Some(instance_id) = args.instance_id {
        config.instance_id = instance_id;
    }
    info!("NCMP instance {} starting...", config.instance_id);

    let store = Arc::new(
        SqliteHandleStore::open(&args.database)
            .with_context(|| format!("Failed to open {}", args.database.display()))?,
    );
    let (publisher, events) = ChannelEventPublisher::new();
    tokio::spawn(log_events(events));

    let service = Service::assemble(&config, store, Arc::new(publisher))?;
    service.spawn_watchdogs(
        config.watchdog.data_sync_interval(),
        config.watchdog.module_sync_interval(),
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.http_port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", args.http_port))?;
    info!("HTTP API listening on port {}", args.http_port);
    axum::serve(listener, build_router(service.state))
        .await
        .context("HTTP server failed")?;
    Ok(())
}
