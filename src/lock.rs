//! Mutual exclusion for async critical sections that span several awaits.
//!
//! The connection manager holds a [`Lock`] across the whole
//! "open socket → wait for open/timeout → install link" sequence so that at
//! most one connection attempt is in control at a time. Callers that arrive
//! while an attempt is running queue behind it (FIFO) and observe its
//! outcome once they acquire the lock.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// An async lock with no protected data.
#[derive(Debug, Clone, Default)]
pub struct Lock {
    inner: Arc<Mutex<()>>,
}

/// Held while a critical section runs. Dropping it (including by cancelling
/// the future that holds it) releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Lock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock is free and take it.
    pub async fn acquire(&self) -> LockGuard {
        LockGuard {
            _guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self) -> Option<LockGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| LockGuard { _guard: guard })
    }

    /// Returns `true` while some critical section holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn guard_release_unlocks() {
        let lock = Lock::new();
        assert!(!lock.is_locked());
        let guard = lock.acquire().await;
        assert!(lock.is_locked());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn critical_sections_never_overlap() {
        let lock = Lock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _guard = lock.acquire().await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_holder_releases_lock() {
        let lock = Lock::new();
        let held = lock.clone();
        let task = tokio::spawn(async move {
            let _guard = held.acquire().await;
            std::future::pending::<()>().await;
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(lock.is_locked());

        task.abort();
        let _ = task.await;
        assert!(!lock.is_locked());
    }
}
