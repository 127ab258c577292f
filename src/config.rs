//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::aggregator::DeviceNames;

const DEFAULT_CONFIG: &str = r#"# NLBW Monitor configuration

# Directory containing *.db.gz files
data_dir: ./data

# How often to look for new or modified files (e.g. 5s, 1m, 5m)
scan_interval: 10s

# Web server settings
server_address: 0.0.0.0
server_port: 8080

# Friendly names for devices (MAC address -> human-readable name)
friendly_names:
  "4a:bd:24:cf:07:5d": "iPhone 13"
  "bc:24:11:72:be:55": "MacBook Pro"
  "ea:fa:e9:d2:67:f4": "iPad Air"
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    #[serde(deserialize_with = "deserialize_duration")]
    pub scan_interval: Duration,
    pub server_address: String,
    pub server_port: u16,
    #[serde(default)]
    pub friendly_names: FriendlyNames,
    /// Built frontend served at `/`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("frontend/dist")
}

/// MAC -> display name, keyed by lowercase MAC
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, String>")]
pub struct FriendlyNames(HashMap<String, String>);

impl From<HashMap<String, String>> for FriendlyNames {
    fn from(names: HashMap<String, String>) -> Self {
        Self(
            names
                .into_iter()
                .map(|(mac, name)| (mac.to_lowercase(), name))
                .collect(),
        )
    }
}

impl FriendlyNames {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn resolve(&self, mac: &str) -> String {
        self.0
            .get(&mac.to_lowercase())
            .cloned()
            .unwrap_or_else(|| mac.to_string())
    }
}

impl Config {
    /// Load `path` overlaid with `NLBW_*` environment variables.
    ///
    /// A missing file is created with default contents first.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config not found, creating default at {}", path.display());
            write_default(path)?;
        }

        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("NLBW"));

        let settings = builder.build()?;
        let mut config: Config = settings.try_deserialize()?;

        // Validate configuration
        config.validate()?;

        if config.data_dir.is_relative() {
            let cwd = std::env::current_dir().context("Failed to resolve data_dir")?;
            config.data_dir = cwd.join(&config.data_dir);
        }

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("data_dir cannot be empty");
        }
        if self.scan_interval.is_zero() {
            anyhow::bail!("scan_interval must be positive");
        }
        if self.server_port == 0 {
            anyhow::bail!("Invalid server_port: 0 is not allowed");
        }
        if self.server_address.is_empty() {
            anyhow::bail!("server_address cannot be empty");
        }
        Ok(())
    }

    /// Display name for `mac`, or the MAC itself when none is configured
    pub fn friendly_name(&self, mac: &str) -> String {
        self.friendly_names.resolve(mac)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }
}

impl DeviceNames for Config {
    fn resolve(&self, mac: &str) -> String {
        self.friendly_name(mac)
    }
}

fn write_default(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write default config to {}", path.display()))
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Parse a duration like `500ms`, `10s`, `5m`, `1h` or `2d`. A bare number
/// is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let num: u64 = num
        .parse()
        .with_context(|| format!("invalid duration '{}'", s))?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(num),
        "" | "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        "d" => Duration::from_secs(num * 86_400),
        other => anyhow::bail!("unknown duration unit '{}' in '{}'", other, s),
    };
    Ok(duration)
}
