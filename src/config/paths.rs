//! XDG-compliant path management

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "fnf-launcher";

/// Manages all application paths using XDG base directory specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    config_dir: PathBuf,
    data_dir: PathBuf,
    cache_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    /// Resolve the platform directories. Without a home directory everything
    /// lives under `./.fnf-launcher` instead.
    pub fn new() -> Self {
        match ProjectDirs::from("", "", APP_NAME) {
            Some(dirs) => Self {
                config_dir: dirs.config_dir().to_path_buf(),
                data_dir: dirs.data_dir().to_path_buf(),
                cache_dir: dirs.cache_dir().to_path_buf(),
            },
            None => {
                tracing::warn!("Could not determine home directory, using ./.{}", APP_NAME);
                Self::with_root(Path::new(".").join(format!(".{}", APP_NAME)))
            }
        }
    }

    /// All paths under one root (portable installs and tests)
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
        }
    }

    // ========== Config Paths ==========

    /// Config directory: ~/.config/fnf-launcher/
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Main config file: ~/.config/fnf-launcher/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    // ========== Data Paths ==========

    /// Data directory: ~/.local/share/fnf-launcher/
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Database file: ~/.local/share/fnf-launcher/mods.db
    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("mods.db")
    }

    /// Key/value preferences: ~/.local/share/fnf-launcher/settings.json
    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    // ========== Cache Paths ==========

    /// Cache directory: ~/.cache/fnf-launcher/
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    /// Log file: ~/.cache/fnf-launcher/logs/fnf-launcher.log
    pub fn log_file(&self) -> PathBuf {
        self.cache_dir.join("logs").join(format!("{}.log", APP_NAME))
    }

    // ========== Utility Methods ==========

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.cache_dir.join("logs"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_root() {
        let paths = Paths::with_root("/tmp/fnf");
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/fnf/config/config.toml"));
        assert_eq!(paths.database_file(), PathBuf::from("/tmp/fnf/data/mods.db"));
        assert_eq!(paths.settings_file(), PathBuf::from("/tmp/fnf/data/settings.json"));
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/tmp/fnf/cache/logs/fnf-launcher.log")
        );
    }
}
