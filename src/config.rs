//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `WARDWATCH_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::RemoteConfig;
use crate::sync::{RollbackPolicy, SyncOptions};
use crate::websocket::HubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the dashboard core finds its backend
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Anonymous API key; the server requires it on every request
    #[serde(default = "default_anon_key")]
    pub anon_key: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_anon_key() -> String {
    "wardwatch-anon-key".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            anon_key: default_anon_key(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Row store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("wardwatch").join("wardwatch.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./wardwatch_data/wardwatch.db".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Database path with a leading `~/` expanded
    pub fn resolved_path(&self) -> PathBuf {
        match (self.path.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.path),
        }
    }
}

/// Change feed and WebSocket hub configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Events buffered per channel before a slow reader lags
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

fn default_max_connections() -> usize {
    1000
}

fn default_feed_capacity() -> usize {
    1024
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

/// View synchronization tunables
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Put the prior row back when an optimistic write fails
    #[serde(default = "default_rollback")]
    pub rollback_on_failure: bool,

    #[serde(default = "default_search_debounce")]
    pub search_debounce_ms: u64,

    #[serde(default = "default_throttle")]
    pub throttle_ms: u64,
}

fn default_rollback() -> bool {
    true
}

fn default_search_debounce() -> u64 {
    300
}

fn default_throttle() -> u64 {
    2000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rollback_on_failure: default_rollback(),
            search_debounce_ms: default_search_debounce(),
            throttle_ms: default_throttle(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("wardwatch").join("config.toml")),
            Some(PathBuf::from("/etc/wardwatch/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `WARDWATCH_*` overrides read through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Backend overrides
        if let Some(url) = lookup("WARDWATCH_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(key) = lookup("WARDWATCH_ANON_KEY") {
            self.backend.anon_key = key;
        }

        // Server overrides
        if let Some(host) = lookup("WARDWATCH_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("WARDWATCH_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = lookup("WARDWATCH_DB_PATH") {
            self.storage.path = path;
        }

        // Sync overrides
        if let Some(flag) = lookup("WARDWATCH_ROLLBACK_ON_FAILURE").and_then(|f| f.parse().ok()) {
            self.sync.rollback_on_failure = flag;
        }

        // Logging overrides
        if let Some(level) = lookup("WARDWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("WARDWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            rollback: RollbackPolicy::from_flag(self.sync.rollback_on_failure),
            search_debounce: Duration::from_millis(self.sync.search_debounce_ms),
            throttle: Duration::from_millis(self.sync.throttle_ms),
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.realtime.max_connections,
            ..HubConfig::default()
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            request_timeout_ms: self.backend.request_timeout_ms,
            ..RemoteConfig::new(&self.backend.url, &self.backend.anon_key)
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# wardwatch Configuration
#
# Environment variables override these settings:
# - WARDWATCH_BACKEND_URL
# - WARDWATCH_ANON_KEY
# - WARDWATCH_HOST
# - WARDWATCH_PORT
# - WARDWATCH_DB_PATH
# - WARDWATCH_ROLLBACK_ON_FAILURE
# - WARDWATCH_LOG_LEVEL
# - WARDWATCH_LOG_FORMAT

[backend]
# Server the dashboard core and CLI talk to
url = "http://localhost:8090"

# Anonymous API key, sent as the `apikey` header
anon_key = "wardwatch-anon-key"

# Request timeout in milliseconds
request_timeout_ms = 10000

[server]
# API server host
host = "0.0.0.0"

# API server port
port = 8090

# Allowed CORS origins
cors_origins = ["http://localhost:8080", "http://127.0.0.1:8080"]

[storage]
# SQLite database file
path = "~/.local/share/wardwatch/wardwatch.db"

[realtime]
# Maximum concurrent WebSocket connections
max_connections = 1000

# Change events buffered before a slow channel lags
feed_capacity = 1024

[sync]
# Restore the previous row when an optimistic write fails
rollback_on_failure = true

# Search input debounce (ms)
search_debounce_ms = 300

# Reuse dashboard stats computed within this window (ms)
throttle_ms = 2000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_generated_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.backend.anon_key, "wardwatch-anon-key");
        assert_eq!(config.realtime.feed_capacity, 1024);
        assert!(config.sync.rollback_on_failure);
        assert_eq!(config.sync.search_debounce_ms, 300);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::parse("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.backend.url, "http://localhost:8090");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("WARDWATCH_BACKEND_URL", "http://ward:1234"),
            ("WARDWATCH_ANON_KEY", "secret"),
            ("WARDWATCH_PORT", "not-a-port"),
            ("WARDWATCH_ROLLBACK_ON_FAILURE", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.backend.url, "http://ward:1234");
        assert_eq!(config.backend.anon_key, "secret");
        assert_eq!(config.server.port, 8090);
        assert!(!config.sync.rollback_on_failure);
        assert_eq!(config.sync_options().rollback, RollbackPolicy::Retain);
    }

    #[test]
    fn test_derived_configs() {
        let mut config = Config::default();
        config.realtime.max_connections = 5;
        config.sync.throttle_ms = 50;

        assert_eq!(config.hub_config().max_connections, 5);
        assert_eq!(config.sync_options().throttle, Duration::from_millis(50));
        assert_eq!(config.remote_config().base_url, "http://localhost:8090");
        assert_eq!(config.server.addr(), "0.0.0.0:8090");
    }

    #[test]
    fn test_resolved_path() {
        let storage = StorageConfig {
            path: "/var/lib/wardwatch/ward.db".to_string(),
        };
        assert_eq!(storage.resolved_path(), PathBuf::from("/var/lib/wardwatch/ward.db"));

        let storage = StorageConfig {
            path: "~/ward.db".to_string(),
        };
        if let Some(home) = dirs::home_dir() {
            assert_eq!(storage.resolved_path(), home.join("ward.db"));
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/wardwatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
