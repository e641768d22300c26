//! Application configuration management.
//!
//! Holds the API base URL plus the polling and cache timings. Configuration
//! is stored at `~/.config/agamvani/config.json`; every field is optional
//! and missing ones take the defaults below. `AGAMVANI_API_BASE_URL` and
//! `AGAMVANI_POLL_INTERVAL_SECS` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sync::SyncSettings;

/// Application name used for config/log directory paths
const APP_NAME: &str = "agamvani";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_API_BASE_URL: &str = "AGAMVANI_API_BASE_URL";
const ENV_POLL_INTERVAL: &str = "AGAMVANI_POLL_INTERVAL_SECS";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8002";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_NOW_PLAYING_TTL_SECS: u64 = 30;
const DEFAULT_SCHEDULE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub poll_interval_secs: u64,
    pub now_playing_ttl_secs: u64,
    pub schedule_ttl_secs: u64,
    /// Per-request timeout; defaults to the poll interval so a hung request
    /// can't hold up the next poll.
    pub request_timeout_secs: Option<u64>,
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            now_playing_ttl_secs: DEFAULT_NOW_PLAYING_TTL_SECS,
            schedule_ttl_secs: DEFAULT_SCHEDULE_TTL_SECS,
            request_timeout_secs: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate();
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for rolling log files.
    pub fn log_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("logs"))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`Config::load`]). Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.poll_interval_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_POLL_INTERVAL),
            }
        }
    }

    /// Log timing combinations that defeat the cache. Never fails.
    pub fn validate(&self) {
        if self.now_playing_ttl_secs <= self.poll_interval_secs {
            warn!(
                ttl = self.now_playing_ttl_secs,
                interval = self.poll_interval_secs,
                "Now-playing TTL does not exceed the poll interval; every poll will hit the network"
            );
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.poll_interval())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            poll_interval: self.poll_interval(),
            now_playing_ttl: Duration::from_secs(self.now_playing_ttl_secs),
            schedule_ttl: Duration::from_secs(self.schedule_ttl_secs),
            request_timeout: self.request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn temp_config_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("agamvani-config-test-{}-{}", name, std::process::id()))
            .join(CONFIG_FILE)
    }

    #[test]
    fn test_defaults_match_radio_timings() {
        let config = Config::default();
        let settings = config.sync_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.now_playing_ttl, Duration::from_secs(30));
        assert_eq!(settings.schedule_ttl, Duration::from_secs(300));
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_capacity, 50);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = temp_config_path("missing");
        assert_eq!(Config::load_from(&path).expect("load"), Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"poll_interval_secs": 10, "request_timeout_secs": 3}"#)
            .expect("Failed to parse partial config");
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_config_path("roundtrip");
        let config = Config {
            api_base_url: "https://radio.example.org".to_string(),
            schedule_ttl_secs: 600,
            ..Config::default()
        };
        config.save_to(&path).expect("save");
        assert_eq!(Config::load_from(&path).expect("load"), config);
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_BASE_URL, " https://radio.example.org "),
            (ENV_POLL_INTERVAL, "7"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.api_base_url, "https://radio.example.org");
        assert_eq!(config.poll_interval(), Duration::from_secs(7));
    }

    #[test]
    fn test_invalid_env_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|name| (name == ENV_POLL_INTERVAL).then(|| "soon".to_string()));
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);

        config.apply_overrides(|name| (name == ENV_POLL_INTERVAL).then(|| "0".to_string()));
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }
}
