//! Configuration management for the launcher store
//!
//! Uses XDG-compliant paths:
//! - Config: ~/.config/fnf-launcher/config.toml
//! - Data: ~/.local/share/fnf-launcher/
//! - Cache: ~/.cache/fnf-launcher/

mod paths;

pub use paths::Paths;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lock, retry and sync timing for the store
    pub database: DatabaseConfig,

    /// Backend sync behaviour
    pub sync: SyncConfig,

    /// Use this database file instead of the default under the data dir
    pub database_file_override: Option<String>,

    /// Paths configuration
    #[serde(skip)]
    pub paths: Paths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            database_file_override: None,
            paths: Paths::new(),
        }
    }
}

/// Store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Attempts per operation before a lock error is surfaced
    pub max_attempts: u32,
    /// First backoff delay; doubles on each retry
    pub initial_retry_delay_ms: u64,
    /// Backoff ceiling
    pub max_retry_delay_ms: u64,
    /// SQLite busy handler timeout for the connection
    pub busy_timeout_ms: u64,
    /// Pause after a commit before the sync read
    pub sync_settle_delay_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_retry_delay_ms: 50,
            max_retry_delay_ms: 1000,
            busy_timeout_ms: 5000,
            sync_settle_delay_ms: 100,
        }
    }
}

/// Backend sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Send an in-memory preview of each write before it reaches disk
    pub optimistic: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { optimistic: true }
    }
}

impl Config {
    /// Resolve the database file (override or default XDG path)
    pub fn database_file(&self) -> PathBuf {
        self.database_file_override
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.paths.database_file())
    }

    /// Ensure required directories exist, including the override's parent.
    pub fn ensure_dirs(&self) -> Result<()> {
        self.paths
            .ensure_dirs()
            .context("Failed to create default application directories")?;
        if let Some(parent) = self.database_file().parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        Ok(())
    }

    /// Load configuration from disk or create default
    pub async fn load() -> Result<Self> {
        Self::load_from(Paths::new()).await
    }

    /// Load configuration rooted at `paths`, writing defaults when missing
    pub async fn load_from(paths: Paths) -> Result<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            // Create default config
            let config = Config {
                paths: paths.clone(),
                ..Config::default()
            };
            config.save().await?;
            config
        };

        config.paths = paths;
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self) -> Result<()> {
        let config_path = self.paths.config_file();

        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());

        let config = Config::load_from(paths.clone()).await.unwrap();
        assert!(paths.config_file().exists());
        assert_eq!(config.database, DatabaseConfig::default());
        assert!(config.sync.optimistic);
        assert_eq!(config.database_file(), paths.database_file());
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(
            paths.config_file(),
            "database_file_override = \"/srv/fnf/mods.db\"\n\n[database]\nmax_attempts = 3\n\n[sync]\noptimistic = false\n",
        )
        .unwrap();

        let config = Config::load_from(paths).await.unwrap();
        assert_eq!(config.database.max_attempts, 3);
        assert_eq!(config.database.initial_retry_delay_ms, 50);
        assert!(!config.sync.optimistic);
        assert_eq!(config.database_file(), PathBuf::from("/srv/fnf/mods.db"));
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(paths.config_file(), "[database\n").unwrap();

        assert!(Config::load_from(paths).await.is_err());
    }
}
