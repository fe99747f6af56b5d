//! Queue sidecar.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                    QUEUE SIDECAR                      │
//!                  │                                                       │
//!  Client Request  │  ┌─────────┐   ┌───────────┐   ┌──────────┐           │
//!  ────────────────┼─▶│ request │──▶│ admission │──▶│ activity │──┐        │
//!                  │  │   id    │   │  breaker  │   │ tracker  │  │        │
//!                  │  └─────────┘   └─────┬─────┘   └────┬─────┘  │        │
//!                  │                  503 │ shed    0↔1  │        ▼        │
//!                  │                      ▼              ▼   ┌─────────┐   │
//!  Client Response │                   client      freezer   │ forward │───┼──▶ Backend
//!  ◀───────────────┼───────────────────────────────────────────│ handler │◀──┼─── Process
//!                  │                                           └─────────┘   │
//!                  │  config (TOML + watcher) · admin API · metrics · logs   │
//!                  └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use queue_sidecar::config::loader::load_config;
use queue_sidecar::config::SidecarConfig;
use queue_sidecar::lifecycle::startup;
use queue_sidecar::observability::logging;

#[derive(Parser)]
#[command(name = "queue-sidecar")]
#[command(about = "Admission control and idle tracking in front of a single backend", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Watched for capacity changes.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SidecarConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "queue-sidecar starting");

    startup::run(config, cli.config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
