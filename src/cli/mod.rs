//! Command-line interface.
//!
//! Unified CLI for Roadworks operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Roadworks - replicated road registry and reconciliation agent.
#[derive(Parser, Debug)]
#[command(name = "roadworks")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the registry and its agent.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Replay the road topic and print what it holds.
    Inspect(commands::InspectArgs),
}
