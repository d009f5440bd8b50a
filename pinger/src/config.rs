use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::time::Duration;

// Parses a duration string (e.g., "5s", "250ms") into a `tokio::time::Duration`.
// Used for deserializing duration values from the config file.
fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Configuration of the batching delivery pipeline.
/// Corresponds to the [batch] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    // Maximum number of results per delivered batch.
    #[serde(default = "BatchConfig::default_size")]
    pub size: usize,

    // Maximum time a batch may wait after its first result before it is flushed.
    #[serde(
        default = "BatchConfig::default_timeout",
        deserialize_with = "parse_duration"
    )]
    pub timeout: Duration,

    // Deadline of a single delivery call.
    #[serde(
        default = "BatchConfig::default_deliver_timeout",
        deserialize_with = "parse_duration"
    )]
    pub deliver_timeout: Duration,

    // How long close() waits for the final flush.
    #[serde(
        default = "BatchConfig::default_drain_timeout",
        deserialize_with = "parse_duration"
    )]
    pub drain_timeout: Duration,

    // Capacity of the producer queue, defaults to `size`.
    pub queue_capacity: Option<usize>,
}

impl BatchConfig {
    fn default_size() -> usize {
        100
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(1)
    }

    fn default_deliver_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn default_drain_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.size)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            timeout: Self::default_timeout(),
            deliver_timeout: Self::default_deliver_timeout(),
            drain_timeout: Self::default_drain_timeout(),
            queue_capacity: None,
        }
    }
}

/// Process lifecycle settings.
/// Corresponds to the [startup] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    // How long to wait for the collector to come up before giving up.
    #[serde(
        default = "StartupConfig::default_wait_timeout",
        deserialize_with = "parse_duration"
    )]
    pub wait_timeout: Duration,

    // Hard deadline for the orderly shutdown.
    #[serde(
        default = "StartupConfig::default_shutdown_timeout",
        deserialize_with = "parse_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl StartupConfig {
    fn default_wait_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_shutdown_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Self::default_wait_timeout(),
            shutdown_timeout: Self::default_shutdown_timeout(),
        }
    }
}

/// Represents the overall pinger configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Base URL of the collector, e.g. "http://collector:8080".
    pub collector_url: String,

    // Interval between two probes of the same host.
    #[serde(deserialize_with = "parse_duration")]
    pub ping_interval: Duration,

    // How long a single probe waits for an echo reply.
    #[serde(
        default = "Config::default_ping_timeout",
        deserialize_with = "parse_duration"
    )]
    pub ping_timeout: Duration,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub startup: StartupConfig,
}

impl Config {
    pub fn new(config_path: &PathBuf) -> Result<Self> {
        let config = Self::load_from_file(config_path)?;
        config.validate()?;
        Ok(config)
    }

    fn default_ping_timeout() -> Duration {
        Duration::from_secs(1)
    }

    // Loads configuration from a TOML file.
    fn load_from_file(config_path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.ping_interval.is_zero(), "ping_interval must be positive");
        ensure!(self.batch.size > 0, "batch.size must be at least 1");
        ensure!(
            self.batch.queue_capacity() > 0,
            "batch.queue_capacity must be at least 1"
        );
        url::Url::parse(&self.collector_url)
            .with_context(|| format!("Invalid collector_url: {}", self.collector_url))?;
        Ok(())
    }
}
