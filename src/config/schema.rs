//! Configuration schema for bundlecache
//!
//! Configuration is stored at `~/.config/bundlecache/config.toml`

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// On-disk layout
    pub storage: StorageConfig,

    /// Launch selection settings
    pub launch: LaunchConfig,

    /// Retention sweep settings
    pub retention: RetentionConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Where the catalog and asset files live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Cache root (default: platform data dir)
    pub root: Option<PathBuf>,

    /// Catalog database file name under the root
    pub database_file: String,

    /// Asset directory name under the root
    pub assets_dir: String,

    /// How long SQLite waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            database_file: "catalog.db".to_string(),
            assets_dir: "assets".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(super::ConfigManager::data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_dir().join(&self.database_file)
    }

    pub fn assets_path(&self) -> PathBuf {
        self.root_dir().join(&self.assets_dir)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Launch selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Scope key of the host application
    pub scope_key: String,

    /// Runtime version the host binary provides
    pub runtime_version: String,

    /// Failed launches (with no success) that roll an update back; 0 disables
    pub failed_launch_threshold: u32,

    /// Budget for the whole selection (0 = unbounded)
    pub cold_start_timeout_ms: u64,

    /// How long a launch waits behind a running sweep
    pub lock_timeout_ms: u64,

    /// Directory holding the embedded update (default: `<root>/embedded`)
    pub embedded_dir: Option<PathBuf>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            scope_key: "default".to_string(),
            runtime_version: "1".to_string(),
            failed_launch_threshold: 1,
            cold_start_timeout_ms: 0,
            lock_timeout_ms: 2000,
            embedded_dir: None,
        }
    }
}

impl LaunchConfig {
    pub fn cold_start_timeout(&self) -> Option<Duration> {
        (self.cold_start_timeout_ms > 0).then(|| Duration::from_millis(self.cold_start_timeout_ms))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn embedded_path(&self, storage: &StorageConfig) -> PathBuf {
        self.embedded_dir
            .clone()
            .unwrap_or_else(|| storage.root_dir().join("embedded"))
    }
}

/// Retention sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Drop updates not launched for N days
    pub window_days: u32,

    /// Also keep this many updates older than the active one
    pub keep_previous: u32,

    /// How long a sweep waits for running launches
    pub lock_timeout_ms: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            keep_previous: 0,
            lock_timeout_ms: 5000,
        }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.window_days))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
