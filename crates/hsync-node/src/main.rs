//! hsync-node - a header-only synchronizing peer.
//!
//! This is the main entry point for the hsync-node binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Header synchronizing peer.
#[derive(Parser, Debug)]
#[command(name = "hsync-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "hsync-node.toml")]
    config: PathBuf,

    /// P2P listen address
    #[arg(long)]
    listen: Option<String>,

    /// Peer to dial at startup (repeatable)
    #[arg(long)]
    bootnode: Vec<String>,

    /// Sync mode (full, fast, light)
    #[arg(long)]
    mode: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = NodeConfig::load(&args.config, &args)?;

    if args.dump_config {
        config
            .save(&args.config)
            .with_context(|| format!("Failed to dump config to {:?}", args.config))?;
        info!("Configuration written to {:?}", args.config);
        return Ok(());
    }

    info!("Starting hsync-node v{}", env!("CARGO_PKG_VERSION"));
    info!("Sync mode: {}", config.sync.mode);
    info!("P2P: {}", config.network.listen_address);

    let node = Node::new(config).context("Failed to initialise node")?;

    // Handle shutdown signals
    let node_handle = node.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        node_handle.shutdown();
    });

    node.run().await?;

    info!("hsync-node stopped");
    Ok(())
}
