//! Home Assistant Rust Server
//!
//! Loads `configuration.yaml`, sets up the configured entity components and
//! runs until interrupted.

mod bootstrap;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Home Assistant core
#[derive(Parser, Debug)]
#[command(name = "homeassistant")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding configuration.yaml and .storage
    #[arg(short, long, default_value = "./config")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config = %args.config.display(), "Starting Home Assistant (Rust)");
    let instance = bootstrap::start(&args.config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    instance.stop().await
}
