//! Request/response correlation on top of a fire-and-forget transport.
//!
//! A [`CorrelationTable`] maps a key to the callers waiting for the matching
//! inbound frame. Each entry has a deadline fixed at registration; whichever
//! of "matching frame arrives" ([`complete`](CorrelationTable::complete)) and
//! "deadline passes" happens first resolves the waiters and removes the
//! entry, and the other becomes a no-op.
//!
//! The same table type serves the join table (one key per local user, so
//! concurrent joins share a single outstanding request) and the health-check
//! table (a fresh random key per probe).

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::connection::ConnectionState;
use crate::error::{LiveError, Result};

type Waiter<T> = oneshot::Sender<Result<T>>;

struct Entry<T> {
    generation: u64,
    deadline: Instant,
    waiters: Vec<Waiter<T>>,
}

struct TableInner<K, T> {
    entries: HashMap<K, Entry<T>>,
    next_generation: u64,
}

/// Key → pending waiters, each entry bounded by a deadline.
pub struct CorrelationTable<K, T> {
    inner: Arc<Mutex<TableInner<K, T>>>,
}

impl<K, T> Clone for CorrelationTable<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> Default for CorrelationTable<K, T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TableInner {
                entries: HashMap::new(),
                next_generation: 0,
            })),
        }
    }
}

impl<K, T> std::fmt::Debug for CorrelationTable<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.lock().entries.len())
            .finish()
    }
}

impl<K, T> CorrelationTable<K, T> {
    fn lock(&self) -> MutexGuard<'_, TableInner<K, T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of outstanding keys.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve every outstanding entry as [`LiveError::Cancelled`] and empty
    /// the table. Returns the number of keys that were pending.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<Entry<T>> = self.lock().entries.drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            for waiter in entry.waiters {
                let _ = waiter.send(Err(LiveError::Cancelled));
            }
        }
        count
    }
}

impl<K, T> CorrelationTable<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`, resolving no later than `timeout` from now.
    ///
    /// If `key` is already outstanding the waiter joins that entry and keeps
    /// its original deadline; [`Pending::is_primary`] then returns `false` and
    /// the caller must not send a second request.
    pub fn register(&self, key: K, timeout: Duration) -> Pending<K, T> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.waiters.push(tx);
            let (generation, deadline) = (entry.generation, entry.deadline);
            return Pending {
                key,
                generation,
                deadline,
                primary: false,
                rx,
                table: self.clone(),
            };
        }

        let generation = inner.next_generation;
        inner.next_generation = inner.next_generation.wrapping_add(1);
        let deadline = Instant::now() + timeout;
        inner.entries.insert(
            key.clone(),
            Entry {
                generation,
                deadline,
                waiters: vec![tx],
            },
        );

        Pending {
            key,
            generation,
            deadline,
            primary: true,
            rx,
            table: self.clone(),
        }
    }

    /// Resolve `key` successfully. Returns `false` (and does nothing) when the
    /// key is not outstanding (already timed out, already completed, or
    /// never registered).
    pub fn complete(&self, key: &K, value: T) -> bool {
        let Some(entry) = self.lock().entries.remove(key) else {
            return false;
        };
        for waiter in entry.waiters {
            let _ = waiter.send(Ok(value.clone()));
        }
        true
    }

    /// Resolve `key` as [`LiveError::Cancelled`]. Returns `false` if absent.
    pub fn fail(&self, key: &K) -> bool {
        let Some(entry) = self.lock().entries.remove(key) else {
            return false;
        };
        for waiter in entry.waiters {
            let _ = waiter.send(Err(LiveError::Cancelled));
        }
        true
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Remove `key` if it is still the registration identified by
    /// `generation`, failing its waiters with [`LiveError::Timeout`].
    fn expire(&self, key: &K, generation: u64) -> bool {
        let entry = {
            let mut inner = self.lock();
            let current = inner
                .entries
                .get(key)
                .is_some_and(|e| e.generation == generation);
            if current {
                inner.entries.remove(key)
            } else {
                None
            }
        };
        let Some(entry) = entry else {
            return false;
        };
        for waiter in entry.waiters {
            let _ = waiter.send(Err(LiveError::Timeout));
        }
        true
    }

    /// Drop the entry if every one of its waiters has gone away.
    fn release(&self, key: &K, generation: u64) {
        let mut inner = self.lock();
        let abandoned = inner
            .entries
            .get(key)
            .is_some_and(|e| e.generation == generation && e.waiters.iter().all(|w| w.is_closed()));
        if abandoned {
            inner.entries.remove(key);
        }
    }
}

/// One caller's stake in a correlation entry.
pub struct Pending<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    key: K,
    generation: u64,
    deadline: Instant,
    primary: bool,
    rx: oneshot::Receiver<Result<T>>,
    table: CorrelationTable<K, T>,
}

impl<K, T> Pending<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// `true` if this registration created the entry (and so owns sending
    /// the request), `false` if it attached to one already in flight.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the outcome.
    ///
    /// # Errors
    ///
    /// [`LiveError::Timeout`] once the deadline passes (the entry is removed),
    /// [`LiveError::Cancelled`] if the entry was failed by a teardown.
    pub async fn wait(mut self) -> Result<T> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(LiveError::Cancelled),
            Err(_) => {
                if self.table.expire(&self.key, self.generation) {
                    debug!(key = ?self.key, "correlation timed out");
                    return Err(LiveError::Timeout);
                }
                // Resolved between the deadline firing and the expiry check.
                match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LiveError::Timeout),
                }
            }
        }
    }
}

impl<K, T> Drop for Pending<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    fn drop(&mut self) {
        self.rx.close();
        self.table.release(&self.key, self.generation);
    }
}

impl<K, T> std::fmt::Debug for Pending<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("key", &self.key)
            .field("primary", &self.primary)
            .field("deadline", &self.deadline)
            .finish()
    }
}

// ── Adaptive timeouts ───────────────────────────────────────────────

/// Round-trip budgets for correlated operations, by connection state at the
/// time the operation starts.
///
/// When the socket is not yet usable the budget has to cover connecting (or
/// reconnecting with backoff) as well as the server's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationTimeouts {
    /// Already connected.
    pub connected: Duration,
    /// A connection attempt is in flight.
    pub connecting: Duration,
    /// A reconnect is needed first.
    pub disconnected: Duration,
}

impl Default for CorrelationTimeouts {
    fn default() -> Self {
        Self {
            connected: Duration::from_secs(5),
            connecting: Duration::from_secs(15),
            disconnected: Duration::from_secs(20),
        }
    }
}

/// Pick the correlation budget for an operation starting in `state`.
pub fn adaptive_timeout(state: ConnectionState, timeouts: &CorrelationTimeouts) -> Duration {
    match state {
        ConnectionState::Connected => timeouts.connected,
        ConnectionState::Connecting => timeouts.connecting,
        ConnectionState::Disconnected => timeouts.disconnected,
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

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn complete_resolves_and_removes() {
        let table: CorrelationTable<String, u32> = CorrelationTable::new();
        let pending = table.register("k".into(), SECOND);
        assert!(pending.is_primary());
        assert!(table.contains_key(&"k".to_string()));

        assert!(table.complete(&"k".to_string(), 7));
        assert_eq!(pending.wait().await.unwrap(), 7);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn complete_on_unknown_key_is_noop() {
        let table: CorrelationTable<String, ()> = CorrelationTable::new();
        assert!(!table.complete(&"never".to_string(), ()));
        assert!(!table.fail(&"never".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_and_late_completion_is_ignored() {
        let table: CorrelationTable<String, ()> = CorrelationTable::new();
        let started = Instant::now();
        let pending = table.register("echo-1".into(), SECOND * 5);

        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, LiveError::Timeout));
        assert_eq!(started.elapsed(), SECOND * 5);
        assert!(table.is_empty());

        // The frame shows up after the deadline.
        assert!(!table.complete(&"echo-1".to_string(), ()));
    }

    #[tokio::test(start_paused = true)]
    async fn second_registration_attaches_to_first() {
        let table: CorrelationTable<String, String> = CorrelationTable::new();
        let first = table.register("join-a1".into(), SECOND * 5);
        tokio::time::advance(SECOND).await;
        let second = table.register("join-a1".into(), SECOND * 60);

        assert!(first.is_primary());
        assert!(!second.is_primary());
        assert_eq!(first.deadline(), second.deadline());
        assert_eq!(table.len(), 1);

        assert!(table.complete(&"join-a1".to_string(), "R1".into()));
        assert_eq!(first.wait().await.unwrap(), "R1");
        assert_eq!(second.wait().await.unwrap(), "R1");
    }

    #[tokio::test(start_paused = true)]
    async fn attached_waiters_share_the_timeout() {
        let table: CorrelationTable<String, ()> = CorrelationTable::new();
        let first = table.register("join-a1".into(), SECOND);
        let second = table.register("join-a1".into(), SECOND);

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert!(matches!(a, Err(LiveError::Timeout)));
        assert!(matches!(b, Err(LiveError::Timeout)));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fail_all_cancels_everything_immediately() {
        let table: CorrelationTable<String, ()> = CorrelationTable::new();
        let waiters: Vec<_> = (0..4)
            .map(|i| table.register(format!("h{i}"), SECOND * 30))
            .collect();

        assert_eq!(table.fail_all(), 4);
        assert!(table.is_empty());

        let started = Instant::now();
        for waiter in waiters {
            assert!(matches!(waiter.wait().await, Err(LiveError::Cancelled)));
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_does_not_remove_newer_registration() {
        let table: CorrelationTable<String, ()> = CorrelationTable::new();
        let old = table.register("k".into(), SECOND);
        let old_generation = old.generation;
        assert!(table.complete(&"k".to_string(), ()));
        old.wait().await.unwrap();

        let fresh = table.register("k".into(), SECOND * 10);
        assert!(!table.expire(&"k".to_string(), old_generation));
        assert!(table.contains_key(&"k".to_string()));
        drop(fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_entry_is_released() {
        let table: CorrelationTable<String, ()> = CorrelationTable::new();
        let first = table.register("k".into(), SECOND);
        let second = table.register("k".into(), SECOND);
        drop(first);
        assert_eq!(table.len(), 1);
        drop(second);
        assert!(table.is_empty());
    }

    #[test]
    fn adaptive_timeout_grows_with_distance_from_connected() {
        let t = CorrelationTimeouts::default();
        let connected = adaptive_timeout(ConnectionState::Connected, &t);
        let connecting = adaptive_timeout(ConnectionState::Connecting, &t);
        let disconnected = adaptive_timeout(ConnectionState::Disconnected, &t);
        assert_eq!(connected, Duration::from_secs(5));
        assert!(connected < connecting && connecting < disconnected);
    }
}
