//! Roadworks - unified CLI entrypoint.
//!
//! Usage:
//!   roadworks start --config config/roadworks.toml [--mode memory] [--passive]
//!   roadworks --config config/roadworks.toml config validate
//!   roadworks config generate --env prod
//!   roadworks inspect [--road NAME] [--json]

use anyhow::Result;
use clap::Parser;
use roadworks::cli::commands::{run_config, run_inspect, run_start_with_config};
use roadworks::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/roadworks.toml"));

    match cli.command {
        Commands::Start(args) => run_start_with_config(&config_path, args, cli.log_level).await,
        Commands::Config(args) => run_config(&config_path, args),
        Commands::Inspect(args) => {
            tokio::task::spawn_blocking(move || run_inspect(&config_path, args)).await?
        }
    }
}
