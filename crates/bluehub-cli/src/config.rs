//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bluehub_core::BluetoothConfig;
use serde::{Deserialize, Serialize};

/// Configuration file structure
///
/// ```toml
/// [bluetooth]
/// interface = "hci0"
/// scan_duration = 10
///
/// [store]
/// path = "/var/lib/bluehub/entities.db"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bluetooth: BluetoothConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Where discovered entities are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Persist to SQLite; when false entities live only for the process.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database file, defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(bluehub_store::default_db_path)
    }
}

impl Config {
    /// Get the default config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bluehub")
            .join("config.toml")
    }

    /// Load config from `path`, or from the default location.
    ///
    /// A missing file yields the defaults. A file that cannot be parsed, or
    /// whose Bluetooth section does not validate, is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = Self::path();
        let path = path.unwrap_or(&default_path);
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .bluetooth
            .check()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }
}
