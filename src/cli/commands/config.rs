//! Config command implementation.

use crate::core::config::{Config, LogMode};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file given by `--config`.
    Validate,
    /// Print configuration with defaults.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Environment (dev, prod).
        #[arg(long, default_value = "dev")]
        env: String,
    },
}

/// Run the config command against `config_path`.
pub fn run_config(config_path: &Path, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(config_path),
        ConfigCommand::Show { format } => show_config(config_path, &format),
        ConfigCommand::Generate { output, env } => generate_config(output.as_deref(), &env),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = Config::from_file(path)?;
    println!("✓ Configuration is valid");
    println!("  mode:        {}", config.log.mode);
    println!("  road topic:  {}", config.log.road_topic);
    println!("  patch topic: {}", config.log.patch_topic);
    if !config.agent.enabled {
        println!("  ⚠ Agent disabled: this process will only replicate the registry");
    }
    if config.log.mode == LogMode::Memory {
        println!("  ⚠ Memory changelog: registry state is lost on exit");
    }
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;
    let rendered = render(&config, format)?;
    println!("{}", rendered);
    Ok(())
}

fn render(config: &Config, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(config).context("failed to render config as JSON"),
        "toml" => toml::to_string_pretty(config).context("failed to render config as TOML"),
        other => anyhow::bail!("unknown format '{}', expected toml or json", other),
    }
}

fn generate_config(output: Option<&Path>, env: &str) -> Result<()> {
    let template = match env {
        "prod" | "production" => template(LogMode::Kafka),
        _ => template(LogMode::Memory),
    };

    match output {
        Some(path) => {
            std::fs::write(path, &template)
                .with_context(|| format!("failed to write {:?}", path))?;
            println!("Generated {} config template: {:?}", env, path);
        }
        None => {
            println!("{}", template);
        }
    }

    Ok(())
}

fn template(mode: LogMode) -> String {
    let header = match mode {
        LogMode::Kafka => "# Roadworks production configuration",
        LogMode::Memory => "# Roadworks development configuration (in-process changelog)",
    };
    format!(
        r#"{header}

[log]
mode = "{mode}"
bootstrap_servers = "localhost:9092"
road_topic = "_roads"
patch_topic = "_roadmodification"

[store]
sync_timeout_ms = 30000
poll_timeout_ms = 100
catch_up_timeout_ms = 120000

[reconciler]
enabled = true
interval_seconds = 60

[agent]
enabled = true
default_partitions = 3
default_replication_factor = {replication}

[telemetry]
log_level = "info"
"#,
        header = header,
        mode = mode,
        replication = if mode == LogMode::Kafka { 3 } else { 1 },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_parse_and_validate() {
        let dev = Config::from_toml(&template(LogMode::Memory)).unwrap();
        assert_eq!(dev.log.mode, LogMode::Memory);
        assert_eq!(dev.agent.default_replication_factor, 1);

        let prod: Config = toml::from_str(&template(LogMode::Kafka)).unwrap();
        assert_eq!(prod.log.mode, LogMode::Kafka);
    }

    #[test]
    fn render_supports_both_formats() {
        let config = Config::with_mode(LogMode::Memory);
        assert!(render(&config, "toml").unwrap().contains("road_topic"));
        assert!(render(&config, "json").unwrap().contains("\"patch_topic\""));
        assert!(render(&config, "yaml").is_err());
    }
}
