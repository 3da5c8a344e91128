//! Schema creation and startup migrations
//!
//! Every start runs [`Database::ensure_schema`]: missing tables are created,
//! missing columns are added, then each entry of [`MIGRATIONS`] whose name is
//! not yet in `schema_version` runs once inside its own transaction together
//! with the ledger insert.

use super::error::{Result, StoreError};
use super::schema::{Engine, EngineType, MigrationRecord};
use super::transaction::Session;
use super::{unix_now, Database};
use crate::settings::SettingsStore;
use rusqlite::params;
use serde_json::Value;
use std::collections::HashSet;

/// Column definition. `decl` must be valid for both `CREATE TABLE` and
/// `ALTER TABLE ... ADD COLUMN`, except for primary keys which are never added.
struct Column {
    name: &'static str,
    decl: &'static str,
}

const fn col(name: &'static str, decl: &'static str) -> Column {
    Column { name, decl }
}

struct TableSpec {
    name: &'static str,
    columns: &'static [Column],
    constraints: &'static [&'static str],
}

impl TableSpec {
    fn create_sql(&self, table_name: &str) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.decl))
            .collect();
        parts.extend(self.constraints.iter().map(|c| c.to_string()));
        format!("CREATE TABLE IF NOT EXISTS {} ({})", table_name, parts.join(", "))
    }

    fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

const MODS_TABLE: TableSpec = TableSpec {
    name: "mods",
    columns: &[
        col("id", "TEXT PRIMARY KEY"),
        col("name", "TEXT NOT NULL DEFAULT ''"),
        col("path", "TEXT NOT NULL DEFAULT ''"),
        col("executable_path", "TEXT"),
        col("icon_data", "TEXT"),
        col("banner_data", "TEXT"),
        col("logo_data", "TEXT"),
        col("logo_position", "TEXT"),
        col("version", "TEXT"),
        col("description", "TEXT"),
        col("engine_data", "TEXT"),
        col("display_order", "INTEGER DEFAULT 9999"),
        col("display_order_in_folder", "INTEGER DEFAULT 0"),
        col("folder_id", "TEXT"),
        col("last_played", "INTEGER"),
        col("date_added", "INTEGER"),
        col("save_terminal_output", "INTEGER DEFAULT 0"),
        col("contributors", "TEXT"),
        col("gamebanana", "TEXT"),
    ],
    constraints: &[],
};

const FOLDERS_TABLE: TableSpec = TableSpec {
    name: "folders",
    columns: &[
        col("id", "TEXT PRIMARY KEY"),
        col("name", "TEXT NOT NULL DEFAULT ''"),
        col("color", "TEXT NOT NULL DEFAULT '#FF0088'"),
        col("display_order", "INTEGER DEFAULT 9999"),
    ],
    constraints: &[],
};

const PROFILES_TABLE: TableSpec = TableSpec {
    name: "engine_mod_profiles",
    columns: &[
        col("id", "TEXT PRIMARY KEY"),
        col("name", "TEXT NOT NULL DEFAULT ''"),
        col("icon_data", "TEXT"),
        col("parent_mod_id", "TEXT NOT NULL DEFAULT ''"),
        col("mod_states", "TEXT NOT NULL DEFAULT '{}'"),
        col("created_at", "INTEGER NOT NULL DEFAULT 0"),
        col("updated_at", "INTEGER NOT NULL DEFAULT 0"),
    ],
    constraints: &["FOREIGN KEY (parent_mod_id) REFERENCES mods (id) ON DELETE CASCADE"],
};

/// Tables in creation order (parents before children)
const TABLES: &[&TableSpec] = &[&MODS_TABLE, &FOLDERS_TABLE, &PROFILES_TABLE];

const INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_mods_path ON mods(path);
    CREATE INDEX IF NOT EXISTS idx_mods_folder ON mods(folder_id);
    CREATE INDEX IF NOT EXISTS idx_profiles_parent ON engine_mod_profiles(parent_mod_id);
"#;

/// What a migration did on this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    Applied,
    /// Preconditions are missing; retry on a later start, do not ledger
    Deferred,
}

type Apply = fn(&mut Session<'_>, Option<&dyn SettingsStore>) -> Result<MigrationStep>;

/// A named data migration
pub struct Migration {
    pub name: &'static str,
    /// Rebuilds a table, so foreign key enforcement is suspended around it
    pub rebuilds_tables: bool,
    apply: Apply,
}

/// Startup migrations in the order they run
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "mods_engine_type_to_engine_data_v1",
        rebuilds_tables: true,
        apply: fold_engine_type,
    },
    Migration {
        name: "mod_folders_table_to_folder_id_v1",
        rebuilds_tables: false,
        apply: copy_folder_memberships,
    },
    Migration {
        name: "legacy_settings_to_store_v1",
        rebuilds_tables: false,
        apply: move_legacy_settings,
    },
    Migration {
        name: "mods_date_added_backfill_v1",
        rebuilds_tables: false,
        apply: backfill_date_added,
    },
];

fn table_exists(s: &Session<'_>, table: &str) -> Result<bool> {
    let count: i64 = s.conn().query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn existing_columns(s: &Session<'_>, table: &str) -> Result<HashSet<String>> {
    let mut stmt = s.conn().prepare("SELECT name FROM pragma_table_info(?1)")?;
    let names = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(names)
}

/// Create the table, or add whatever columns an older store is missing
fn ensure_table(s: &Session<'_>, spec: &TableSpec) -> Result<()> {
    let existing = existing_columns(s, spec.name)?;
    if existing.is_empty() {
        s.conn().execute_batch(&spec.create_sql(spec.name))?;
        tracing::info!("Created table '{}'", spec.name);
        return Ok(());
    }

    for column in spec.columns.iter().filter(|c| !existing.contains(c.name)) {
        if column.decl.contains("PRIMARY KEY") {
            tracing::warn!(
                "Table '{}' has no '{}' column and it cannot be added in place",
                spec.name,
                column.name
            );
            continue;
        }
        s.conn().execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                spec.name, column.name, column.decl
            ),
            [],
        )?;
        tracing::info!("Added column '{}' to {} table", column.name, spec.name);
    }
    Ok(())
}

/// Replace `spec.name` with a fresh table built from `spec`, keeping every
/// column the two have in common. Columns outside `spec` are dropped.
///
/// Callers must have foreign keys disabled and `legacy_alter_table` on, or
/// child tables would cascade or be rewritten to point at the backup.
fn rebuild_table(s: &Session<'_>, spec: &TableSpec) -> Result<()> {
    let shadow = format!("{}_shadow", spec.name);
    let backup = format!("{}_backup", spec.name);

    let existing = existing_columns(s, spec.name)?;
    let shared: Vec<&str> = spec
        .column_names()
        .filter(|c| existing.contains(*c))
        .collect();
    let shared = shared.join(", ");

    s.conn().execute_batch(&format!("DROP TABLE IF EXISTS {}", shadow))?;
    s.conn().execute_batch(&spec.create_sql(&shadow))?;
    let copied = s.conn().execute(
        &format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            shadow, shared, shared, spec.name
        ),
        [],
    )?;

    s.conn()
        .execute_batch(&format!("ALTER TABLE {} RENAME TO {}", spec.name, backup))?;
    if let Err(e) = s.conn().execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        shadow, spec.name
    )) {
        tracing::error!("Failed to swap rebuilt {} table into place: {}", spec.name, e);
        if let Err(restore) = s.conn().execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {}",
            backup, spec.name
        )) {
            tracing::error!("Failed to restore {} from backup: {}", spec.name, restore);
        }
        return Err(e.into());
    }
    s.conn().execute_batch(&format!("DROP TABLE {}", backup))?;

    tracing::info!("Rebuilt {} table ({} rows)", spec.name, copied);
    Ok(())
}

/// Fold the legacy `engine_type` column into `engine_data`, then drop it
fn fold_engine_type(s: &mut Session<'_>, _: Option<&dyn SettingsStore>) -> Result<MigrationStep> {
    if !existing_columns(s, "mods")?.contains("engine_type") {
        return Ok(MigrationStep::Applied);
    }

    let legacy: Vec<(String, String)> = {
        let mut stmt = s.conn().prepare(
            r#"
            SELECT id, engine_type FROM mods
            WHERE engine_type IS NOT NULL AND engine_type != ''
              AND (engine_data IS NULL OR engine_data = '')
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (id, engine_type) in &legacy {
        let engine = Engine::new(EngineType::from(engine_type.clone()));
        s.conn().execute(
            "UPDATE mods SET engine_data = ?1 WHERE id = ?2",
            params![serde_json::to_string(&engine)?, id],
        )?;
    }
    tracing::info!("Moved engine type of {} mods into engine_data", legacy.len());

    rebuild_table(s, &MODS_TABLE)?;
    Ok(MigrationStep::Applied)
}

/// Copy memberships out of the old `mod_folders` mapping table
fn copy_folder_memberships(
    s: &mut Session<'_>,
    _: Option<&dyn SettingsStore>,
) -> Result<MigrationStep> {
    if !table_exists(s, "mod_folders")? {
        return Ok(MigrationStep::Applied);
    }

    let updated = s.conn().execute(
        r#"
        UPDATE mods SET folder_id = (
            SELECT mf.folder_id FROM mod_folders mf
            JOIN folders f ON f.id = mf.folder_id
            WHERE mf.mod_id = mods.id
            LIMIT 1
        )
        WHERE folder_id IS NULL
          AND id IN (
            SELECT mf.mod_id FROM mod_folders mf
            JOIN folders f ON f.id = mf.folder_id
          )
        "#,
        [],
    )?;
    // Consumed rows must not re-assign a mod if this runs again
    let consumed = s.conn().execute(
        "DELETE FROM mod_folders WHERE folder_id IN (SELECT id FROM folders)",
        [],
    )?;
    tracing::info!(
        "Copied {} folder memberships from mod_folders ({} rows consumed)",
        updated,
        consumed
    );
    Ok(MigrationStep::Applied)
}

/// Translate a legacy settings row into the key/value the settings store uses
fn convert_legacy_setting(key: &str, raw: &str) -> (String, Value) {
    let as_bool = match raw {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    };

    match (key, as_bool) {
        ("enableLightTheme", Some(light)) => (
            "theme".to_string(),
            Value::String(if light { "light" } else { "dark" }.to_string()),
        ),
        (_, Some(flag)) => (key.to_string(), Value::Bool(flag)),
        (_, None) => (key.to_string(), Value::String(raw.to_string())),
    }
}

/// Hand rows of the legacy `settings` table to the settings store
fn move_legacy_settings(
    s: &mut Session<'_>,
    settings: Option<&dyn SettingsStore>,
) -> Result<MigrationStep> {
    if !table_exists(s, "settings")? {
        return Ok(MigrationStep::Applied);
    }
    let Some(store) = settings else {
        tracing::info!("Legacy settings present but no settings store configured, deferring");
        return Ok(MigrationStep::Deferred);
    };

    let rows: Vec<(String, String)> = {
        let mut stmt = s.conn().prepare("SELECT key, value FROM settings")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut moved = 0;
    for (key, raw) in rows {
        let (key, value) = convert_legacy_setting(&key, &raw);
        if store.contains(&key) {
            tracing::debug!("Settings store already has '{}', keeping it", key);
            continue;
        }
        store
            .set(&key, value)
            .map_err(|e| StoreError::Settings(format!("{:#}", e)))?;
        moved += 1;
    }
    tracing::info!("Moved {} legacy settings into the settings store", moved);
    Ok(MigrationStep::Applied)
}

fn backfill_date_added(
    s: &mut Session<'_>,
    _: Option<&dyn SettingsStore>,
) -> Result<MigrationStep> {
    let updated = s.conn().execute(
        "UPDATE mods SET date_added = ?1 WHERE date_added IS NULL",
        params![unix_now()],
    )?;
    tracing::info!("Backfilled date_added for {} mods", updated);
    Ok(MigrationStep::Applied)
}

fn is_applied(s: &Session<'_>, name: &str) -> Result<bool> {
    let count: i64 = s.conn().query_row(
        "SELECT COUNT(*) FROM schema_version WHERE migration_name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn run_migration(
    s: &mut Session<'_>,
    migration: &Migration,
    settings: Option<&dyn SettingsStore>,
) -> Result<MigrationStep> {
    if migration.rebuilds_tables {
        s.conn()
            .execute_batch("PRAGMA foreign_keys = OFF; PRAGMA legacy_alter_table = ON;")?;
    }

    let outcome = s.transaction(migration.name, |s| {
        let step = (migration.apply)(s, settings)?;
        if step == MigrationStep::Applied {
            s.conn().execute(
                "INSERT INTO schema_version (migration_name, applied_at) VALUES (?1, datetime('now'))",
                params![migration.name],
            )?;
        }
        Ok(step)
    });

    if migration.rebuilds_tables {
        s.conn()
            .execute_batch("PRAGMA legacy_alter_table = OFF; PRAGMA foreign_keys = ON;")?;
    }
    outcome
}

fn apply_schema(s: &mut Session<'_>, settings: Option<&dyn SettingsStore>) -> Result<()> {
    s.conn().execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            migration_name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        "#,
    )?;

    for spec in TABLES {
        ensure_table(s, spec)?;
    }

    for migration in MIGRATIONS {
        if is_applied(s, migration.name)? {
            continue;
        }

        tracing::info!("Applying migration '{}'", migration.name);
        match run_migration(s, migration, settings) {
            Ok(MigrationStep::Applied) => {
                tracing::info!("Migration '{}' completed", migration.name)
            }
            Ok(MigrationStep::Deferred) => {}
            Err(e) => {
                tracing::error!("Migration '{}' failed: {}", migration.name, e);
                return Err(StoreError::MigrationFailed {
                    name: migration.name.to_string(),
                    source: Box::new(e),
                });
            }
        }
    }

    s.conn().execute_batch(INDEXES)?;
    Ok(())
}

impl Database {
    // ========== Schema Operations ==========

    /// Bring the store up to the current schema. Safe to call on every start;
    /// a failure here means the store must not be used.
    pub async fn ensure_schema(&self) -> Result<()> {
        let settings = self.settings.clone();
        self.run("ensure_schema", false, |s| apply_schema(s, settings.as_deref()))
            .await
    }

    /// Ledger entries in the order they were applied
    pub async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        self.run("applied_migrations", false, |s| {
            let mut stmt = s.conn().prepare(
                "SELECT migration_name, applied_at FROM schema_version ORDER BY applied_at ASC, rowid ASC",
            )?;
            let records = stmt
                .query_map([], MigrationRecord::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }
}
