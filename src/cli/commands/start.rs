//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides, LogMode};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the registry and its agent.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Override the changelog mode (kafka, memory).
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<LogMode>,

    /// Override the Kafka bootstrap servers.
    #[arg(long)]
    pub bootstrap_servers: Option<String>,

    /// Run without an agent: replicate the registry read-only.
    #[arg(long)]
    pub passive: bool,
}

fn parse_mode(value: &str) -> Result<LogMode, String> {
    match value {
        "kafka" => Ok(LogMode::Kafka),
        "memory" => Ok(LogMode::Memory),
        other => Err(format!("unknown mode '{}', expected kafka or memory", other)),
    }
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over the configured level.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}

/// Run the start command with the given config path.
pub async fn run_start_with_config(
    config_path: &Path,
    args: StartArgs,
    log_level: Option<String>,
) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        mode: args.mode,
        bootstrap_servers: args.bootstrap_servers,
        passive: args.passive,
    });

    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
