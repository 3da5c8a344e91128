//! Application wiring: config, settings, store and backend mirror

mod actions;

use crate::config::Config;
use crate::db::Database;
use crate::settings::{JsonSettingsStore, SettingsStore};
use crate::sync::ModsMirror;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Main application struct that owns the shared store handle
pub struct App {
    /// Application configuration
    pub config: Arc<RwLock<Config>>,

    /// The store, opened and migrated
    pub db: Arc<Database>,

    /// In-process copy of the mod list, fed by backend sync
    pub mirror: Arc<ModsMirror>,

    /// Launcher preferences
    pub settings: Arc<dyn SettingsStore>,
}

impl App {
    /// Create a new App instance
    pub async fn new(config: Config) -> Result<Self> {
        // Ensure directories exist
        config.ensure_dirs().context("Failed to create directories")?;

        let settings: Arc<dyn SettingsStore> = Arc::new(
            JsonSettingsStore::open(config.paths.settings_file())
                .context("Failed to open settings store")?,
        );
        let mirror = Arc::new(ModsMirror::new());

        // Initialize database
        let db = Database::from_config(&config, mirror.clone())
            .with_settings_store(settings.clone());
        let db_path = config.database_file();
        db.open(&db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        db.ensure_schema().await.context("Failed to migrate database")?;
        let db = Arc::new(db);

        // Fill the mirror before anything reads it
        db.sync_backend().await;
        tracing::info!("Store ready with {} mods", mirror.len());

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            db,
            mirror,
            settings,
        })
    }

    /// Close the store connection
    pub async fn shutdown(&self) -> Result<()> {
        self.db.close().await.context("Failed to close database")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use crate::db::ModRecord;

    #[tokio::test]
    async fn test_app_opens_store_and_fills_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_from(Paths::with_root(dir.path())).await.unwrap();
        config.database.sync_settle_delay_ms = 0;

        let app = App::new(config.clone()).await.unwrap();
        app.db.upsert_mod(&ModRecord::new("Foo", "/m1")).await.unwrap();
        assert_eq!(app.mirror.len(), 1);
        app.shutdown().await.unwrap();

        // A second start sees the stored mod without any write
        let app = App::new(config).await.unwrap();
        assert_eq!(app.mirror.len(), 1);
        assert!(dir.path().join("data").join("mods.db").exists());
    }
}
