//! Exclusive access to the storage engine
//!
//! Every statement the store issues runs while holding a [`DbGuard`]. The
//! underlying `tokio::sync::Mutex` queues waiters in FIFO order, so callers
//! are granted access strictly in the order they asked for it and nobody
//! starves. The lock is not re-entrant: code already holding a guard must
//! reuse its [`Session`](super::Session) instead of acquiring again.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, MutexGuard};

/// FIFO async lock with holder diagnostics
pub struct DbLock<T> {
    inner: Mutex<T>,
    holder: StdMutex<Option<String>>,
    waiting: AtomicUsize,
}

impl<T> DbLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: StdMutex::new(None),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Wait for exclusive access. The label is recorded for diagnostics only.
    pub async fn acquire(&self, label: &str) -> DbGuard<'_, T> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let guard = self.inner.lock().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = Some(label.to_string());
        tracing::trace!("Database lock acquired by '{}'", label);

        DbGuard {
            guard,
            holder: &self.holder,
        }
    }

    /// Label of the operation currently holding the lock, if any
    pub fn current_holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of callers queued behind the current holder
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Scoped hold on the lock; dropping it releases access to the next waiter.
pub struct DbGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a StdMutex<Option<String>>,
}

impl<T> Deref for DbGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for DbGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for DbGuard<'_, T> {
    fn drop(&mut self) {
        let previous = self
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(label) = previous {
            tracing::trace!("Database lock released by '{}'", label);
        }
        // `guard` drops after this, handing the lock to the next waiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_holder_label_tracks_guard() {
        let lock = DbLock::new(0u32);
        assert_eq!(lock.current_holder(), None);

        {
            let mut guard = lock.acquire("first").await;
            *guard += 1;
            assert_eq!(lock.current_holder().as_deref(), Some("first"));
        }

        assert_eq!(lock.current_holder(), None);
        assert_eq!(*lock.acquire("second").await, 1);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_arrival_order() {
        let lock = Arc::new(DbLock::new(Vec::new()));
        let first = lock.acquire("holder").await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let waiter = lock.clone();
            handles.push(tokio::spawn(async move {
                waiter.acquire(&format!("waiter-{}", i)).await.push(i);
            }));
            // Make sure waiter i is queued before waiter i + 1 is spawned
            while lock.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(lock.waiting(), 5);
        drop(first);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*lock.acquire("check").await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let lock = Arc::new(DbLock::new(()));
        let guard = lock.acquire("long").await;

        let contender = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire("short").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        assert_eq!(lock.current_holder().as_deref(), Some("long"));

        drop(guard);
        contender.await.unwrap();
    }
}
