//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/livesync/config.toml)
//! 3. Environment variables (LIVESYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::SyncError;
use crate::models::TransportMode;
use crate::store::SyncStore;
use crate::sync::{
    ConnectionContext, HttpUpdateSource, MultiModeSync, PollingConfig, PollingStrategy,
    SocketConfig, SocketStrategy, TransportStrategy,
};

/// Environment variable prefix
const ENV_PREFIX: &str = "LIVESYNC";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the update server (optional)
    #[serde(default)]
    pub socket_url: Option<String>,

    /// Base URL of the HTTP update API (optional)
    #[serde(default)]
    pub update_url: Option<String>,

    /// Transports to try, in priority order
    #[serde(default = "default_modes")]
    pub modes: Vec<TransportMode>,

    /// Log file path; logs go to stderr when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub socket: SocketSettings,

    #[serde(default)]
    pub polling: PollingSettings,
}

/// `[socket]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    pub ready_check_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Unexpected closures tolerated before the socket is banned
    pub closure_limit: Option<u32>,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            ready_check_interval_ms: 100,
            connect_timeout_ms: 10_000,
            closure_limit: None,
        }
    }
}

/// `[polling]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            interval_ms: 5_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_url: None,
            update_url: None,
            modes: default_modes(),
            log_file: None,
            socket: SocketSettings::default(),
            polling: PollingSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (LIVESYNC_SOCKET_URL, LIVESYNC_UPDATE_URL, LIVESYNC_MODES, LIVESYNC_LOG_FILE)
    /// 2. Config file (~/.config/livesync/config.toml or LIVESYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // LIVESYNC_SOCKET_URL
        if let Ok(val) = std::env::var(format!("{}_SOCKET_URL", ENV_PREFIX)) {
            self.socket_url = non_empty(val);
        }

        // LIVESYNC_UPDATE_URL
        if let Ok(val) = std::env::var(format!("{}_UPDATE_URL", ENV_PREFIX)) {
            self.update_url = non_empty(val);
        }

        // LIVESYNC_MODES
        if let Ok(val) = std::env::var(format!("{}_MODES", ENV_PREFIX)) {
            self.modes = parse_modes(&val)
                .with_context(|| format!("Invalid {}_MODES value: '{}'", ENV_PREFIX, val))?;
        }

        // LIVESYNC_LOG_FILE
        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = non_empty(val).map(PathBuf::from);
        }

        Ok(())
    }

    /// Set a value by key, as used by `livesync config set`
    ///
    /// `none` or an empty value clears optional keys.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "socket_url" => self.socket_url = non_empty(value.to_string()),
            "update_url" => self.update_url = non_empty(value.to_string()),
            "modes" => self.modes = parse_modes(value)?,
            "log_file" => self.log_file = non_empty(value.to_string()).map(PathBuf::from),
            "socket.ready_check_interval_ms" => {
                self.socket.ready_check_interval_ms = parse_number(key, value)?
            }
            "socket.connect_timeout_ms" => {
                self.socket.connect_timeout_ms = parse_number(key, value)?
            }
            "socket.closure_limit" => {
                self.socket.closure_limit = match non_empty(value.to_string()) {
                    Some(v) => Some(parse_number(key, &v)?),
                    None => None,
                }
            }
            "polling.initial_delay_ms" => {
                self.polling.initial_delay_ms = parse_number(key, value)?
            }
            "polling.interval_ms" => self.polling.interval_ms = parse_number(key, value)?,
            "polling.request_timeout_ms" => {
                self.polling.request_timeout_ms = parse_number(key, value)?
            }
            _ => bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: socket_url, update_url, modes, log_file, \
                 socket.ready_check_interval_ms, socket.connect_timeout_ms, socket.closure_limit, \
                 polling.initial_delay_ms, polling.interval_ms, polling.request_timeout_ms",
                key
            ),
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with LIVESYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livesync")
            .join("config.toml")
    }

    /// Socket transport settings, if a socket URL is configured
    pub fn socket_config(&self) -> Option<SocketConfig> {
        let url = self.socket_url.clone()?;
        Some(SocketConfig {
            url,
            ready_check_interval: Duration::from_millis(self.socket.ready_check_interval_ms),
            connect_timeout: Duration::from_millis(self.socket.connect_timeout_ms),
            closure_limit: self.socket.closure_limit,
        })
    }

    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            initial_delay: Duration::from_millis(self.polling.initial_delay_ms),
            interval: Duration::from_millis(self.polling.interval_ms),
        }
    }

    /// Modes that have the URL they need, in priority order
    pub fn usable_modes(&self) -> Vec<TransportMode> {
        self.modes
            .iter()
            .copied()
            .filter(|mode| match mode {
                TransportMode::Socket => self.socket_url.is_some(),
                TransportMode::Polling => self.update_url.is_some(),
            })
            .collect()
    }

    /// One error per listed mode that is missing its URL
    pub fn unconfigured_modes(&self) -> Vec<SyncError> {
        let usable = self.usable_modes();
        self.modes
            .iter()
            .filter(|mode| !usable.contains(mode))
            .map(|&mode| SyncError::NotConfigured {
                mode,
                details: match mode {
                    TransportMode::Socket => "socket_url is not set".to_string(),
                    TransportMode::Polling => "update_url is not set".to_string(),
                },
            })
            .collect()
    }

    /// Build an orchestrator for one sync session
    ///
    /// Modes without a configured URL are skipped with a warning.
    pub fn build_sync(&self) -> Result<MultiModeSync> {
        for err in self.unconfigured_modes() {
            warn!("{}, skipping it", err);
        }

        let modes = self.usable_modes();

        let store = SyncStore::new(ConnectionContext::new(modes.iter().copied()));
        let mut strategies: Vec<Arc<dyn TransportStrategy>> = Vec::new();

        for mode in &modes {
            match mode {
                TransportMode::Socket => {
                    if let Some(config) = self.socket_config() {
                        strategies.push(Arc::new(SocketStrategy::new(config, store.clone())));
                    }
                }
                TransportMode::Polling => {
                    if let Some(url) = &self.update_url {
                        let source = HttpUpdateSource::new(
                            url.clone(),
                            Duration::from_millis(self.polling.request_timeout_ms),
                        )
                        .context("Failed to create HTTP client")?;
                        strategies.push(Arc::new(PollingStrategy::new(
                            self.polling_config(),
                            Arc::new(source),
                            store.clone(),
                        )));
                    }
                }
            }
        }

        Ok(MultiModeSync::new(store, strategies))
    }
}

/// Default transport order: socket first, polling as fallback
fn default_modes() -> Vec<TransportMode> {
    vec![TransportMode::Socket, TransportMode::Polling]
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value)
    }
}

/// Parse a comma separated mode list such as `socket,polling`
fn parse_modes(value: &str) -> Result<Vec<TransportMode>> {
    let mut modes = Vec::new();
    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
        let mode: TransportMode = part.parse().map_err(anyhow::Error::msg)?;
        if !modes.contains(&mode) {
            modes.push(mode);
        }
    }
    Ok(modes)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: expected a number, got '{}'", key, value))
}
