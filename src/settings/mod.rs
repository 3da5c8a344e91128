//! Key/value preference store used by the launcher UI
//!
//! The store only talks to it while migrating legacy `settings` rows.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Preference storage the database can hand legacy settings to
pub trait SettingsStore: Send + Sync {
    fn contains(&self, key: &str) -> bool;
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Settings kept as one JSON object on disk, rewritten on every `set`
pub struct JsonSettingsStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonSettingsStore {
    /// Open the file at `path`; a missing file starts out empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings file {}", path.display()))?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&content).context("Failed to parse settings file")?
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let content =
            serde_json::to_string_pretty(values).context("Failed to serialize settings")?;
        std::fs::write(&self.path, content).context("Failed to write settings file")?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn contains(&self, key: &str) -> bool {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        self.save(&values)
    }
}
