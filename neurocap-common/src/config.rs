//! Configuration loading and resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing or malformed TOML file never aborts startup: a warning is logged
//! and compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit TOML config path
pub const CONFIG_PATH_ENV: &str = "NEUROCAP_CONFIG";

/// Environment variable overriding the remote service base URL
pub const API_URL_ENV: &str = "NEUROCAP_API_URL";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote record service connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Extraction job polling cadence and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between status polls
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Wall-clock budget for one job; 0 disables the limit
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Maximum wait for a single status response
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

/// Notification bus sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_capacity")]
    pub capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_poll_timeout_secs() -> u64 {
    10
}

fn default_notification_capacity() -> usize {
    32
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            job_timeout_secs: default_job_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: default_notification_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        match self.job_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }
}

/// Parse a TOML config from a file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Default configuration file location for the platform
///
/// `$NEUROCAP_CONFIG` wins; otherwise `<config_dir>/neurocap/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|d| d.join("neurocap").join("config.toml"))
}

/// Resolves the effective configuration from all sources
pub struct ConfigResolver {
    config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Resolver reading the platform default config file
    pub fn new() -> Self {
        Self {
            config_path: default_config_path(),
        }
    }

    /// Resolver reading an explicit config file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load the TOML layer, falling back to compiled defaults
    pub fn load(&self) -> TomlConfig {
        let Some(path) = &self.config_path else {
            warn!("Could not determine config directory, using compiled defaults");
            return TomlConfig::default();
        };

        if !path.exists() {
            info!("Config file {} not found, using compiled defaults", path.display());
            return TomlConfig::default();
        }

        match load_toml_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{}; using compiled defaults", e);
                TomlConfig::default()
            }
        }
    }

    /// Load all layers, applying CLI and environment overrides
    pub fn resolve(&self, cli_base_url: Option<&str>) -> TomlConfig {
        let mut config = self.load();
        config.server.base_url = resolve_base_url(cli_base_url, &config);
        config
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Base URL following CLI → ENV → TOML → default priority
pub fn resolve_base_url(cli_arg: Option<&str>, toml: &TomlConfig) -> String {
    if let Some(url) = cli_arg.filter(|u| !u.trim().is_empty()) {
        return normalize_base_url(url);
    }

    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            return normalize_base_url(&url);
        }
    }

    normalize_base_url(&toml.server.base_url)
}

/// Strip surrounding whitespace and trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.server.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.polling.interval(), Duration::from_secs(2));
        assert_eq!(config.polling.job_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.notifications.capacity, 32);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [polling]
            interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.polling.poll_timeout_secs, 10);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_zero_job_timeout_disables_limit() {
        let polling = PollingConfig {
            job_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(polling.job_timeout(), None);
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(" http://h:1/api/ "), "http://h:1/api");
        assert_eq!(normalize_base_url("http://h:1/api//"), "http://h:1/api");
    }
}
