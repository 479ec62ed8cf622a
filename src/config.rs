//! Configuration loading and persistence.
//!
//! Handles reading and writing the sensorlink configuration file and applying
//! `SENSORLINK_*` environment overrides on top of it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::channel::ChannelConfig;
use crate::constants;
use crate::env::Environment;
use crate::relay::RelayConfig;
use crate::transport::ws::http_to_ws_scheme;

/// Configuration for the sensorlink CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the relay, e.g. `ws://localhost:8000`.
    pub server_url: String,
    /// WebSocket path on the relay.
    pub endpoint_path: String,
    /// Base URL for the historical data API. Derived from `server_url` if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_url: Option<String>,
    /// Listen address for `serve`.
    pub bind: String,
    /// Identifier sent in the handshake.
    pub client_name: String,
    /// Seconds between heartbeat pings.
    pub heartbeat_secs: u64,
    /// Seconds before reconnecting after a close.
    pub reconnect_secs: u64,
    /// Seconds a command waits for its acknowledgment.
    pub ack_timeout_secs: u64,
    /// Maximum readings kept for the charts.
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_environment(Environment::current())
    }
}

impl Config {
    /// Defaults for `environment`.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            server_url: environment.default_server_url().to_string(),
            endpoint_path: constants::DEFAULT_ENDPOINT_PATH.to_string(),
            history_url: None,
            bind: constants::DEFAULT_BIND.to_string(),
            client_name: constants::DEFAULT_CLIENT_NAME.to_string(),
            heartbeat_secs: constants::HEARTBEAT_INTERVAL.as_secs(),
            reconnect_secs: constants::RECONNECT_DELAY.as_secs(),
            ack_timeout_secs: constants::ACK_TIMEOUT.as_secs(),
            history_limit: constants::HISTORY_LIMIT,
        }
    }

    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `SENSORLINK_CONFIG_DIR` env var: explicit override
    /// 2. `SENSORLINK_ENV=test`: `<temp dir>/sensorlink-test`
    /// 3. Default: platform config dir (Linux: ~/.config/sensorlink)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("SENSORLINK_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            std::env::temp_dir().join("sensorlink-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("sensorlink")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path).unwrap_or_else(|e| {
                log::warn!("Ignoring config file: {e:#}");
                Self::default()
            })
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads configuration from `path`. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `SENSORLINK_*` overrides looked up through `lookup`.
    ///
    /// Numeric values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SENSORLINK_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(path) = lookup("SENSORLINK_ENDPOINT_PATH") {
            self.endpoint_path = path;
        }
        if let Some(url) = lookup("SENSORLINK_HISTORY_URL") {
            self.history_url = Some(url);
        }
        if let Some(bind) = lookup("SENSORLINK_BIND") {
            self.bind = bind;
        }
        if let Some(name) = lookup("SENSORLINK_CLIENT_NAME") {
            self.client_name = name;
        }

        if let Some(secs) = lookup("SENSORLINK_HEARTBEAT_SECS").and_then(|v| v.parse().ok()) {
            self.heartbeat_secs = secs;
        }
        if let Some(secs) = lookup("SENSORLINK_RECONNECT_SECS").and_then(|v| v.parse().ok()) {
            self.reconnect_secs = secs;
        }
        if let Some(secs) = lookup("SENSORLINK_ACK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.ack_timeout_secs = secs;
        }
        if let Some(limit) = lookup("SENSORLINK_HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
            self.history_limit = limit;
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join("config.json"))
    }

    /// Writes the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Full WebSocket endpoint, e.g. `ws://localhost:8000/ws`.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        let base = http_to_ws_scheme(self.server_url.trim_end_matches('/'));
        let path = self.endpoint_path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Base URL of the historical data API.
    #[must_use]
    pub fn history_base(&self) -> String {
        match &self.history_url {
            Some(url) => url.clone(),
            None => self
                .server_url
                .trim_end_matches('/')
                .replacen("wss://", "https://", 1)
                .replacen("ws://", "http://", 1),
        }
    }

    /// How long commands wait for their acknowledgment.
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Channel settings derived from this configuration.
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            client_name: self.client_name.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_secs),
            ..ChannelConfig::new(self.endpoint_url())
        }
    }

    /// Relay settings derived from this configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            bind: self.bind.clone(),
            endpoint_path: self.endpoint_path.clone(),
            ..RelayConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::for_environment(Environment::Development);
        assert_eq!(config.server_url, "ws://localhost:8000");
        assert_eq!(config.endpoint_path, "/ws");
        assert_eq!(config.heartbeat_secs, 30);
        assert_eq!(config.reconnect_secs, 5);
        assert_eq!(config.ack_timeout_secs, 3);
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn test_endpoint_url_joins_base_and_path() {
        let mut config = Config::for_environment(Environment::Development);
        assert_eq!(config.endpoint_url(), "ws://localhost:8000/ws");

        config.server_url = "https://relay.example.com/".into();
        assert_eq!(config.endpoint_url(), "wss://relay.example.com/ws");
    }

    #[test]
    fn test_history_base_derived_from_server_url() {
        let mut config = Config::for_environment(Environment::Development);
        assert_eq!(config.history_base(), "http://localhost:8000");

        config.server_url = "wss://relay.example.com".into();
        assert_eq!(config.history_base(), "https://relay.example.com");

        config.history_url = Some("http://archive:9000".into());
        assert_eq!(config.history_base(), "http://archive:9000");
    }

    #[test]
    fn test_overrides_apply_and_ignore_bad_numbers() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SENSORLINK_SERVER_URL", "ws://10.0.0.2:8000"),
            ("SENSORLINK_CLIENT_NAME", "bench"),
            ("SENSORLINK_RECONNECT_SECS", "9"),
            ("SENSORLINK_HEARTBEAT_SECS", "soon"),
        ]);
        let mut config = Config::for_environment(Environment::Development);
        config.apply_overrides(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.server_url, "ws://10.0.0.2:8000");
        assert_eq!(config.client_name, "bench");
        assert_eq!(config.reconnect_secs, 9);
        assert_eq!(config.heartbeat_secs, 30);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::for_environment(Environment::Development);
        config.history_limit = 20;
        config.history_url = Some("http://archive:9000".into());

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"client_name":"lab"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.client_name, "lab");
        assert_eq!(config.endpoint_path, "/ws");
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn test_channel_config_carries_timings() {
        let mut config = Config::for_environment(Environment::Development);
        config.reconnect_secs = 2;
        let channel = config.channel_config();
        assert_eq!(channel.endpoint, "ws://localhost:8000/ws");
        assert_eq!(channel.reconnect_delay, Duration::from_secs(2));
        assert_eq!(channel.error_close_grace, constants::ERROR_CLOSE_GRACE);
    }
}
