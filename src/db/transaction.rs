//! Transaction bookkeeping for the shared connection
//!
//! There is exactly one logical writer, so "is a transaction open" is a single
//! process-wide flag. It lives next to the connection inside the database lock
//! and is only read or written while that lock is held.

use super::error::{Result, StoreError};
use rusqlite::Connection;

/// Process-wide transaction state
#[derive(Debug, Default)]
pub struct TxState {
    active: bool,
    started: u64,
    committed: u64,
    rolled_back: u64,
}

impl TxState {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Counters exposed through [`Database::diagnostics`](super::Database::diagnostics)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxCounters {
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

impl From<&TxState> for TxCounters {
    fn from(state: &TxState) -> Self {
        Self {
            started: state.started,
            committed: state.committed,
            rolled_back: state.rolled_back,
        }
    }
}

/// Why a transactional frame failed
#[derive(Debug)]
pub(crate) enum TxFailure {
    /// `BEGIN` itself failed; no work ran and nothing needs rolling back
    Begin(StoreError),
    /// The work or the commit failed after `BEGIN`; the frame was rolled back
    Work(StoreError),
}

/// Live access to the connection for the duration of one locked operation.
///
/// Repository functions take `&mut Session` so they can be composed: an
/// operation that calls another transactional operation passes its session
/// along, and the inner call joins the already open transaction.
pub struct Session<'a> {
    conn: &'a Connection,
    tx: &'a mut TxState,
}

impl<'a> Session<'a> {
    pub(crate) fn new(conn: &'a Connection, tx: &'a mut TxState) -> Self {
        Self { conn, tx }
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.active
    }

    /// Run `work` inside a transaction. When a transaction is already open
    /// the work joins it and the outer frame keeps ownership of commit and
    /// rollback.
    pub fn transaction<T>(
        &mut self,
        label: &str,
        work: impl FnOnce(&mut Session<'_>) -> Result<T>,
    ) -> Result<T> {
        match self.scoped(label, work) {
            Ok(value) => Ok(value),
            Err(TxFailure::Begin(err)) => Err(err),
            Err(TxFailure::Work(err)) => Err(err),
        }
    }

    /// Core of the transaction state machine.
    ///
    /// `Idle -> Active` on the first call, which issues `BEGIN EXCLUSIVE` and
    /// owns the commit. Calls made while active run inline without touching
    /// commit state. Only the owning frame commits or rolls back, and the
    /// flag returns to idle on both paths.
    pub(crate) fn scoped<T>(
        &mut self,
        label: &str,
        work: impl FnOnce(&mut Session<'_>) -> Result<T>,
    ) -> Result<T, TxFailure> {
        if self.tx.active {
            tracing::trace!("'{}' joining open transaction", label);
            return work(self).map_err(TxFailure::Work);
        }

        self.conn
            .execute_batch("BEGIN EXCLUSIVE")
            .map_err(|e| TxFailure::Begin(e.into()))?;
        self.tx.active = true;
        self.tx.started += 1;
        tracing::debug!("Transaction started for '{}'", label);

        let outcome = work(self).and_then(|value| {
            self.conn.execute_batch("COMMIT")?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                self.tx.active = false;
                self.tx.committed += 1;
                tracing::debug!("Transaction committed for '{}'", label);
                Ok(value)
            }
            Err(err) => {
                // A failed COMMIT can leave the transaction open; roll back either way
                if !self.conn.is_autocommit() {
                    if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK") {
                        tracing::error!(
                            "Rollback failed for '{}': {} (original error: {})",
                            label,
                            rollback_err,
                            err
                        );
                    }
                }
                self.tx.active = false;
                self.tx.rolled_back += 1;
                tracing::warn!("Transaction rolled back for '{}': {}", label, err);
                Err(TxFailure::Work(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER NOT NULL)").unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_returns_to_idle() {
        let conn = setup();
        let mut tx = TxState::default();
        let mut session = Session::new(&conn, &mut tx);

        session
            .transaction("insert", |s| {
                assert!(s.in_transaction());
                assert!(!s.conn().is_autocommit());
                s.conn().execute("INSERT INTO t (v) VALUES (1)", [])?;
                Ok(())
            })
            .unwrap();

        assert!(!session.in_transaction());
        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 1);
        assert_eq!(TxCounters::from(&tx).committed, 1);
    }

    #[test]
    fn test_nested_frames_share_one_begin() {
        let conn = setup();
        let mut tx = TxState::default();
        let mut session = Session::new(&conn, &mut tx);

        session
            .transaction("outer", |s| {
                s.conn().execute("INSERT INTO t (v) VALUES (1)", [])?;
                s.transaction("inner", |s| {
                    s.conn().execute("INSERT INTO t (v) VALUES (2)", [])?;
                    Ok(())
                })?;
                // Inner frame must not have committed
                assert!(s.in_transaction());
                assert!(!s.conn().is_autocommit());
                Ok(())
            })
            .unwrap();

        let counters = TxCounters::from(&tx);
        assert_eq!(counters.started, 1);
        assert_eq!(counters.committed, 1);
        assert_eq!(count(&conn), 2);
    }

    #[test]
    fn test_inner_error_rolls_back_outer() {
        let conn = setup();
        let mut tx = TxState::default();
        let mut session = Session::new(&conn, &mut tx);

        let result: Result<()> = session.transaction("outer", |s| {
            s.conn().execute("INSERT INTO t (v) VALUES (1)", [])?;
            s.transaction("inner", |_| Err(StoreError::not_found("mod", "missing")))
        });

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert!(!tx.is_active());
        assert_eq!(count(&conn), 0);
        let counters = TxCounters::from(&tx);
        assert_eq!(counters.started, 1);
        assert_eq!(counters.rolled_back, 1);
    }

    #[test]
    fn test_begin_failure_is_distinguished() {
        let conn = setup();
        // Open a transaction behind the manager's back so BEGIN fails
        conn.execute_batch("BEGIN").unwrap();
        let mut tx = TxState::default();
        let mut session = Session::new(&conn, &mut tx);

        let result = session.scoped("begin-fails", |_| Ok(()));
        assert!(matches!(result, Err(TxFailure::Begin(_))));
        assert!(!tx.is_active());
        assert_eq!(TxCounters::from(&tx).started, 0);
    }
}
