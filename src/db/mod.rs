//! SQLite store for mods, folders and engine-mod profiles
//!
//! All access goes through [`Database::run`], which serializes callers on a
//! FIFO lock, retries busy/locked failures with backoff and manages the single
//! shared transaction. Mutating repository operations push the resulting mod
//! list to the configured [`SyncSink`](crate::sync::SyncSink) once committed.

mod error;
mod folders;
mod lock;
mod migrations;
mod mods;
mod profiles;
mod retry;
mod schema;
mod transaction;

pub use error::{Result, StoreError};
pub use lock::{DbGuard, DbLock};
pub use migrations::{Migration, MigrationStep, MIGRATIONS};
pub use retry::RetryPolicy;
pub use schema::*;
pub use transaction::{Session, TxCounters, TxState};

use crate::config::{Config, DatabaseConfig};
use crate::settings::SettingsStore;
use crate::sync::{NoopSink, SyncBridge, SyncSink};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use transaction::TxFailure;

/// Everything guarded by the database lock
#[derive(Default)]
pub struct ConnState {
    conn: Option<Connection>,
    tx: TxState,
}

/// Point-in-time view of the lock and transaction counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Label of the operation holding the lock when diagnostics were requested
    pub holder: Option<String>,
    pub waiting: usize,
    pub open: bool,
    pub transactions: TxCounters,
}

/// Store handle. Construct once at startup and share it as `Arc<Database>`.
pub struct Database {
    state: DbLock<ConnState>,
    policy: RetryPolicy,
    busy_timeout: Duration,
    settle_delay: Duration,
    sync: SyncBridge,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl Database {
    /// Create an unopened store; every operation fails with
    /// [`StoreError::NotInitialized`] until [`open`](Self::open) succeeds.
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            state: DbLock::new(ConnState::default()),
            policy: RetryPolicy::from_config(config),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            settle_delay: Duration::from_millis(config.sync_settle_delay_ms),
            sync: SyncBridge::new(Arc::new(NoopSink), false),
            settings: None,
        }
    }

    /// Create an unopened store wired according to the full application config
    pub fn from_config(config: &Config, sink: Arc<dyn SyncSink>) -> Self {
        Self::new(&config.database).with_sync_sink(sink, config.sync.optimistic)
    }

    pub fn with_sync_sink(mut self, sink: Arc<dyn SyncSink>, optimistic: bool) -> Self {
        self.sync = SyncBridge::new(sink, optimistic);
        self
    }

    pub fn with_settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Open (or create) the database file. Reopening replaces the current connection.
    pub async fn open(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        tracing::info!("Opened database at {}", path.display());
        self.attach(conn).await
    }

    /// Open a private in-memory database
    pub async fn open_in_memory(&self) -> Result<()> {
        let conn = Connection::open_in_memory()?;
        self.attach(conn).await
    }

    async fn attach(&self, conn: Connection) -> Result<()> {
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let mut state = self.state.acquire("open").await;
        if let Some(previous) = state.conn.take() {
            tracing::info!("Reinitializing database connection");
            if let Err((_, e)) = previous.close() {
                tracing::warn!("Failed to close previous connection cleanly: {}", e);
            }
        }
        state.conn = Some(conn);
        state.tx = TxState::default();
        Ok(())
    }

    /// Close the connection; later operations fail with `NotInitialized`
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.acquire("close").await;
        if let Some(conn) = state.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::from(e))?;
            tracing::info!("Database closed");
        }
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.state.acquire("is_open").await.conn.is_some()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let holder = self.state.current_holder();
        let waiting = self.state.waiting();
        let state = self.state.acquire("diagnostics").await;
        Diagnostics {
            holder,
            waiting,
            open: state.conn.is_some(),
            transactions: TxCounters::from(&state.tx),
        }
    }

    /// Run a unit of work with exclusive access to the connection.
    ///
    /// Busy/locked failures are retried with exponential backoff up to the
    /// policy's attempt cap. With `use_transaction` the work runs inside a
    /// transaction; a failure there is rolled back and surfaced immediately as
    /// [`StoreError::TransactionFailed`] since re-running a partially applied
    /// unit is unsafe. The lock is released on every path when the guard drops.
    pub async fn run<T, F>(&self, label: &str, use_transaction: bool, mut work: F) -> Result<T>
    where
        F: FnMut(&mut Session<'_>) -> Result<T>,
    {
        let mut guard = self.state.acquire(label).await;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = {
                let state = &mut *guard;
                let conn = state.conn.as_ref().ok_or(StoreError::NotInitialized)?;
                let mut session = Session::new(conn, &mut state.tx);

                if use_transaction {
                    match session.scoped(label, &mut work) {
                        Ok(value) => Ok(value),
                        Err(TxFailure::Begin(err)) => Err(err),
                        Err(TxFailure::Work(err)) => {
                            return Err(StoreError::TransactionFailed {
                                label: label.to_string(),
                                source: Box::new(err),
                            });
                        }
                    }
                } else {
                    work(&mut session)
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_lock_contention() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        "Database locked, retrying '{}' in {}ms (attempt {}/{})",
                        label,
                        delay.as_millis(),
                        attempt,
                        self.policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_lock_contention() => {
                    tracing::error!(
                        "Database lock retry exhausted after {} attempts for '{}'",
                        attempt,
                        label
                    );
                    return Err(StoreError::RetriesExhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run a transactional write and keep the sync sink in step with it.
    ///
    /// `preview` applies the same change to the last synced mod list so an
    /// optimistic snapshot can go out before the write. The authoritative
    /// snapshot follows a successful write, and also a failed one when a
    /// preview was already sent, so the consumer drops the previewed state.
    async fn mutate<T, F>(
        &self,
        label: &str,
        preview: impl FnOnce(&mut Vec<ModRecord>),
        work: F,
    ) -> Result<T>
    where
        F: FnMut(&mut Session<'_>) -> Result<T>,
    {
        let previewed = self.sync.publish_optimistic(label, preview).await;
        let result = self.run(label, true, work).await;
        if result.is_ok() || previewed {
            self.publish_committed(label).await;
        }
        result
    }

    /// Push the committed mod list to the sync sink. Failures are logged only.
    async fn publish_committed(&self, reason: &str) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let _publishing = self.sync.begin_authoritative().await;
        match self.get_all_mods().await {
            Ok(mods) => self.sync.publish_authoritative(mods, reason).await,
            Err(e) => {
                tracing::error!("Failed to read mods for backend sync after '{}': {}", reason, e)
            }
        }
    }

    /// Re-send the current mod list without any mutation (e.g. after startup)
    pub async fn sync_backend(&self) {
        self.publish_committed("sync_backend").await;
    }
}

impl StoreError {
    /// Innermost error behind retry/transaction/migration wrappers
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::RetriesExhausted { source, .. }
            | StoreError::TransactionFailed { source, .. }
            | StoreError::MigrationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Current time as Unix seconds
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}


#[cfg(test)]
mod tests {
    use super::error::locked_error;
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_operations_before_open_fail_fast() {
        let db = Database::new(&test_config());
        let err = db.get_all_mods().await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));

        let err = db.upsert_mod(&ModRecord::new("Foo", "/m1")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));
    }

    #[tokio::test]
    async fn test_close_then_operate_is_not_initialized() {
        let db = open_db().await;
        db.close().await.unwrap();
        assert!(!db.is_open().await);
        assert!(matches!(
            db.get_all_mods().await,
            Err(StoreError::NotInitialized)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_error_retried_until_cap() {
        let db = open_db().await;
        let attempts = AtomicU32::new(0);

        let err = db
            .run("always_locked", false, |_| -> Result<()> {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(locked_error())
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 10);
        match err {
            StoreError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 10),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_lock_error_attempted_once() {
        let db = open_db().await;
        let attempts = AtomicU32::new(0);

        let err = db
            .run("fails", false, |_| -> Result<()> {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::not_found("mod", "x"))
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_locked_attempts_then_success() {
        let db = open_db().await;
        let attempts = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = db
            .run("flaky", false, |_| {
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(locked_error())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // Three backoff delays: 50 + 100 + 200 ms (a fourth would add 400 ms)
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(350), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_failure_inside_transaction_is_not_retried() {
        let db = open_db().await;
        let attempts = AtomicU32::new(0);

        let err = db
            .run("tx_locked", true, |_| -> Result<()> {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(locked_error())
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StoreError::TransactionFailed { .. }));
        assert!(err.root_cause().is_lock_contention());

        let diag = db.diagnostics().await;
        assert_eq!(diag.transactions.rolled_back, 1);
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_writes() {
        let db = open_db().await;
        let m = ModRecord::new("Foo", "/m1");

        let result: Result<()> = db
            .run("partial", true, |s| {
                mods::upsert_in(s, &m)?;
                Err(StoreError::not_found("folder", "nope"))
            })
            .await;

        assert!(result.is_err());
        assert!(db.get_all_mods().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nested_transaction_issues_single_begin() {
        let db = open_db().await;
        let before = db.diagnostics().await.transactions;

        let a = ModRecord::new("A", "/a");
        let b = ModRecord::new("B", "/b");
        db.run("outer", true, |s| {
            mods::upsert_in(s, &a)?;
            s.transaction("inner", |s| {
                assert!(!s.conn().is_autocommit());
                mods::upsert_in(s, &b)
            })?;
            Ok(())
        })
        .await
        .unwrap();

        let after = db.diagnostics().await.transactions;
        assert_eq!(after.started - before.started, 1);
        assert_eq!(after.committed - before.committed, 1);
        assert_eq!(db.get_all_mods().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_operations_never_interleave() {
        let db = Arc::new(open_db().await);
        db.run("log_table", false, |s| {
            s.conn()
                .execute_batch(
                    "CREATE TABLE op_log (seq INTEGER PRIMARY KEY AUTOINCREMENT, task INTEGER, step INTEGER)",
                )?;
            Ok(())
        })
        .await
        .unwrap();

        let tasks = (0..8).map(|task| {
            let db = db.clone();
            tokio::spawn(async move {
                db.run("write_steps", true, |s| {
                    for step in 0..5 {
                        s.conn().execute(
                            "INSERT INTO op_log (task, step) VALUES (?1, ?2)",
                            rusqlite::params![task, step],
                        )?;
                    }
                    Ok(())
                })
                .await
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let rows: Vec<(i64, i64)> = db
            .run("read_log", false, |s| {
                let mut stmt = s.conn().prepare("SELECT task, step FROM op_log ORDER BY seq")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .unwrap();

        assert_eq!(rows.len(), 40);
        for chunk in rows.chunks(5) {
            let task = chunk[0].0;
            let steps: Vec<i64> = chunk
                .iter()
                .map(|(t, s)| {
                    assert_eq!(*t, task);
                    *s
                })
                .collect();
            assert_eq!(steps, vec![0, 1, 2, 3, 4]);
        }
    }

    /// Mirror whose first delivery stalls
    #[derive(Default)]
    struct StallingMirror {
        stalled: std::sync::atomic::AtomicBool,
        mirror: crate::sync::ModsMirror,
    }

    #[async_trait::async_trait]
    impl SyncSink for StallingMirror {
        async fn publish(&self, snapshot: crate::sync::SyncSnapshot) -> anyhow::Result<()> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.mirror.publish(snapshot).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_delivery_does_not_leave_mirror_stale() {
        let sink = Arc::new(StallingMirror::default());
        let db = Database::new(&test_config()).with_sync_sink(sink.clone(), false);
        db.open_in_memory().await.unwrap();
        db.ensure_schema().await.unwrap();
        let db = Arc::new(db);

        let first = {
            let db = db.clone();
            tokio::spawn(async move { db.upsert_mod(&ModRecord::new("A", "/a")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        db.upsert_mod(&ModRecord::new("B", "/b")).await.unwrap();
        first.await.unwrap().unwrap();

        let stored = db.get_all_mods().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(sink.mirror.len(), stored.len());
    }

    #[tokio::test]
    async fn test_reopen_replaces_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("mods.db");

        let db = Database::new(&test_config());
        db.open(&path).await.unwrap();
        db.ensure_schema().await.unwrap();
        db.upsert_mod(&ModRecord::new("Foo", "/m1")).await.unwrap();

        db.open(&path).await.unwrap();
        db.ensure_schema().await.unwrap();
        let mods = db.get_all_mods().await.unwrap();
        assert_eq!(mods.len(), 1);
        assert!(path.exists());
    }
}
