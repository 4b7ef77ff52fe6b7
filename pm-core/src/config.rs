//! Application configuration management.
//!
//! Handles loading, saving, and accessing client configuration including the
//! realtime server URL and logging settings. Configuration is persisted as
//! TOML on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{PmError, PmResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Realtime server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Realtime server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Realtime server URL (e.g., "https://api.pawfectmatch.app").
    #[serde(default)]
    pub address: String,

    /// Timeout for a single transport open, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses the default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> PmResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> PmResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PmError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load from the default config path, falling back to defaults when the
    /// file does not exist.
    pub fn load_default() -> PmResult<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save to the default config path.
    pub fn save_default(&self) -> PmResult<()> {
        self.save_to(&Self::default_path()?)
    }

    /// The platform config file path: `<config_dir>/pawfectmatch/config.toml`.
    pub fn default_path() -> PmResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| PmError::Config("no platform config directory".into()))?;
        Ok(base.join("pawfectmatch").join("config.toml"))
    }

    /// Whether a server address has been configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty()
    }

    /// Normalize a user-entered server address.
    ///
    /// Trims whitespace and stray quotes, strips trailing slashes, and infers
    /// a scheme: bare IPv4 hosts get `http://`, everything else `https://`.
    pub fn sanitize_server_address(address: &str) -> String {
        let mut addr = address.trim().trim_matches('"').trim().to_string();

        while addr.ends_with('/') {
            addr.pop();
        }

        if !addr.starts_with("http://") && !addr.starts_with("https://") && !addr.is_empty() {
            let host = addr.split(':').next().unwrap_or("");
            let looks_like_ip = host.split('.').count() == 4
                && host.split('.').all(|part| part.parse::<u8>().is_ok());
            if looks_like_ip {
                addr = format!("http://{addr}");
            } else {
                addr = format!("https://{addr}");
            }
        }

        addr
    }
}

/// Thread-safe shared handle to the application configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> PmResult<()> {
        let config = self.inner.read().await;
        config.save_default()
    }
}
