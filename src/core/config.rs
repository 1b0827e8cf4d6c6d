//! Configuration parsing and validation.
//!
//! Roadworks configuration is loaded from TOML files with CLI overrides.
//! Sections follow the process's components: the changelog, the replicated
//! store, the reconciler and the agent.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Roadworks configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Changelog transport configuration.
    pub log: LogConfig,

    /// Replicated store tuning.
    #[serde(default)]
    pub store: StoreSection,

    /// Drift reconciler configuration.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Road agent configuration.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Where the changelog lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Kafka brokers (requires the `kafka` feature).
    Kafka,
    /// In-process log; state is lost on exit.
    Memory,
}

impl std::fmt::Display for LogMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kafka => f.write_str("kafka"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Changelog transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Transport mode: "kafka" or "memory".
    #[serde(default = "default_log_mode")]
    pub mode: LogMode,

    /// Comma-separated `host:port` bootstrap list.
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,

    /// Compacted topic holding road documents.
    #[serde(default = "default_road_topic")]
    pub road_topic: String,

    /// Topic receiving patch sets for the merge process.
    #[serde(default = "default_patch_topic")]
    pub patch_topic: String,
}

/// Replicated store tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// How long a write waits to become locally visible.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    /// How long one log poll may block.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// How long startup waits for the initial replay.
    #[serde(default = "default_catch_up_timeout_ms")]
    pub catch_up_timeout_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            sync_timeout_ms: default_sync_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            catch_up_timeout_ms: default_catch_up_timeout_ms(),
        }
    }
}

impl StoreSection {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn catch_up_timeout(&self) -> Duration {
        Duration::from_millis(self.catch_up_timeout_ms)
    }
}

/// Drift reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Run periodic inspection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between inspection passes.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Road agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// React to road changes. A disabled agent leaves the process a
    /// read-only registry consumer.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Partitions for road topics that do not request a count.
    #[serde(default = "default_partitions")]
    pub default_partitions: u32,

    /// Replication factor for new road topics.
    #[serde(default = "default_replication_factor")]
    pub default_replication_factor: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_partitions: default_partitions(),
            default_replication_factor: default_replication_factor(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_log_mode() -> LogMode {
    LogMode::Kafka
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_road_topic() -> String {
    "_roads".to_string()
}

fn default_patch_topic() -> String {
    "_roadmodification".to_string()
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_catch_up_timeout_ms() -> u64 {
    120_000
}

fn default_true() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_partitions() -> u32 {
    3
}

fn default_replication_factor() -> u16 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Configuration with every default and the given log mode.
    pub fn with_mode(mode: LogMode) -> Self {
        Self {
            log: LogConfig {
                mode,
                bootstrap_servers: default_bootstrap_servers(),
                road_topic: default_road_topic(),
                patch_topic: default_patch_topic(),
            },
            store: StoreSection::default(),
            reconciler: ReconcilerConfig::default(),
            agent: AgentConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(mode) = overrides.mode {
            self.log.mode = mode;
        }
        if let Some(ref bootstrap) = overrides.bootstrap_servers {
            self.log.bootstrap_servers = bootstrap.clone();
        }
        if overrides.passive {
            self.agent.enabled = false;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_log()?;
        self.validate_store()?;
        self.validate_reconciler()?;
        self.validate_agent()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_log(&self) -> Result<()> {
        if self.log.road_topic.trim().is_empty() {
            anyhow::bail!("log.road_topic must not be empty");
        }
        if self.log.patch_topic.trim().is_empty() {
            anyhow::bail!("log.patch_topic must not be empty");
        }
        // Patches written to the road topic would bypass the merge process.
        if self.log.road_topic == self.log.patch_topic {
            anyhow::bail!(
                "log.road_topic and log.patch_topic must differ, both are: {}",
                self.log.road_topic
            );
        }
        if self.log.mode == LogMode::Kafka {
            let hosts = self
                .log
                .bootstrap_servers
                .split(',')
                .filter(|h| !h.trim().is_empty())
                .count();
            if hosts == 0 {
                anyhow::bail!("log.bootstrap_servers required for kafka mode");
            }
            #[cfg(not(feature = "kafka"))]
            anyhow::bail!("log.mode 'kafka' requires the kafka feature");
        }
        Ok(())
    }

    fn validate_store(&self) -> Result<()> {
        if self.store.sync_timeout_ms == 0 {
            anyhow::bail!("store.sync_timeout_ms must be > 0");
        }
        if self.store.poll_timeout_ms == 0 {
            anyhow::bail!("store.poll_timeout_ms must be > 0");
        }
        if self.store.poll_timeout_ms > self.store.sync_timeout_ms {
            anyhow::bail!(
                "store.poll_timeout_ms ({}) cannot exceed store.sync_timeout_ms ({})",
                self.store.poll_timeout_ms,
                self.store.sync_timeout_ms
            );
        }
        if self.store.catch_up_timeout_ms == 0 {
            anyhow::bail!("store.catch_up_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_reconciler(&self) -> Result<()> {
        if self.reconciler.enabled && self.reconciler.interval_seconds == 0 {
            anyhow::bail!("reconciler.interval_seconds must be > 0");
        }
        Ok(())
    }

    fn validate_agent(&self) -> Result<()> {
        if self.agent.default_partitions == 0 {
            anyhow::bail!("agent.default_partitions must be > 0");
        }
        if self.agent.default_replication_factor == 0 {
            anyhow::bail!("agent.default_replication_factor must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the transport mode.
    pub mode: Option<LogMode>,
    /// Override the bootstrap servers.
    pub bootstrap_servers: Option<String>,
    /// Run without an agent.
    pub passive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml("[log]\nmode = \"memory\"\n").unwrap();
        assert_eq!(config.log.mode, LogMode::Memory);
        assert_eq!(config.log.road_topic, "_roads");
        assert_eq!(config.log.patch_topic, "_roadmodification");
        assert_eq!(config.store.sync_timeout(), Duration::from_secs(30));
        assert_eq!(config.reconciler.interval(), Duration::from_secs(60));
        assert!(config.agent.enabled);
    }

    #[test]
    fn rejects_same_topic_twice() {
        let err = Config::from_toml(
            "[log]\nmode = \"memory\"\nroad_topic = \"t\"\npatch_topic = \"t\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Config::from_toml("[log]\nmode = \"zookeeper\"\n").is_err());
    }

    #[test]
    fn overrides_apply() {
        let mut config = Config::with_mode(LogMode::Memory);
        config.apply_overrides(&ConfigOverrides {
            log_level: Some("debug".into()),
            bootstrap_servers: Some("b1:9092".into()),
            passive: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.log.bootstrap_servers, "b1:9092");
        assert!(!config.agent.enabled);
        config.validate().unwrap();
    }
}
