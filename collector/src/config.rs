use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

// Parses a duration string (e.g., "30s") into a `Duration`.
fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Represents the collector configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "Config::default_listen_addr")]
    pub listen_addr: SocketAddr,

    // SQLite database file, created on first start.
    #[serde(default = "Config::default_database_path")]
    pub database_path: PathBuf,

    // Host names provisioned into the store at startup.
    #[serde(default)]
    pub hosts: Vec<String>,

    // How many of the newest result rows are scanned when warming the cache.
    #[serde(default = "Config::default_log_tail_limit")]
    pub log_tail_limit: usize,

    #[serde(
        default = "Config::default_shutdown_timeout",
        deserialize_with = "parse_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn new(config_path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        let config = toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        ensure!(config.log_tail_limit > 0, "log_tail_limit must be at least 1");
        Ok(config)
    }

    fn default_listen_addr() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 8080))
    }

    fn default_database_path() -> PathBuf {
        PathBuf::from("collector.db")
    }

    fn default_log_tail_limit() -> usize {
        1000
    }

    fn default_shutdown_timeout() -> Duration {
        Duration::from_secs(30)
    }
}
