//! Error taxonomy for the store

use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors surfaced by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// An operation ran before the connection was opened (or after it was closed)
    #[error("Database not initialized")]
    NotInitialized,

    /// Busy/locked errors persisted through every attempt
    #[error("Database still locked after {attempts} attempts ({label}): {source}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    /// The unit of work inside a transaction failed; the transaction was rolled back
    #[error("Transaction '{label}' failed: {source}")]
    TransactionFailed {
        label: String,
        #[source]
        source: Box<StoreError>,
    },

    /// A startup migration failed; the schema must not be used
    #[error("Migration '{name}' failed: {source}")]
    MigrationFailed {
        name: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Another mod already owns this path
    #[error("Path '{path}' already belongs to mod '{existing_id}'")]
    PathConflict { path: String, existing_id: String },

    #[error("Settings store error: {0}")]
    Settings(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether this is a transient busy/locked condition from SQLite.
    ///
    /// Matches on the extended result code first and falls back to the message
    /// text, since some paths (e.g. errors raised from inside `execute_batch`)
    /// only carry the message.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, message)) => {
                matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) || message.as_deref().is_some_and(is_lock_message)
            }
            StoreError::Sqlite(other) => is_lock_message(&other.to_string()),
            _ => false,
        }
    }
}

fn is_lock_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("sqlite_busy")
}

#[cfg(test)]
pub(crate) fn locked_error() -> StoreError {
    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        Some("database is locked".to_string()),
    ))
}
