//! Map whose entries are forgotten after a period without access.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::debug;

type PinFn<V> = dyn Fn(&V) -> bool + Send + Sync;

struct Entry<V> {
    value: V,
    last_access: Instant,
}

/// TTL map with access-refreshed expiry.
///
/// All operations take one async mutex, so a sweep can never interleave with
/// a get-or-insert. Entries for which the pin predicate returns `true` survive
/// sweeps regardless of age.
pub struct ExpiringStore<K, V> {
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
    ttl: Duration,
    pinned: Arc<PinFn<V>>,
}

impl<K, V> fmt::Debug for ExpiringStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<K, V> Clone for ExpiringStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
            pinned: Arc::clone(&self.pinned),
        }
    }
}

impl<K, V> ExpiringStore<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a store forgetting entries idle for longer than `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            pinned: Arc::new(|_| false),
        }
    }

    /// Keep entries matching `pinned` through sweeps.
    #[must_use]
    pub fn with_pin(mut self, pinned: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        self.pinned = Arc::new(pinned);
        self
    }

    /// Get a value and refresh its access time.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        entries.get_mut(key).map(|e| {
            e.last_access = Instant::now();
            e.value.clone()
        })
    }

    /// Get a value without refreshing its access time.
    pub async fn peek(&self, key: &K) -> Option<V> {
        self.entries.lock().await.get(key).map(|e| e.value.clone())
    }

    /// Insert or replace a value.
    pub async fn insert(&self, key: K, value: V) {
        self.entries.lock().await.insert(
            key,
            Entry {
                value,
                last_access: Instant::now(),
            },
        );
    }

    /// Return the existing value, or insert the one `make` produces.
    ///
    /// `make` runs under the lock and must not block.
    pub async fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key).or_insert_with(|| Entry {
            value: make(),
            last_access: Instant::now(),
        });
        entry.last_access = Instant::now();
        entry.value.clone()
    }

    /// Refresh an entry's access time. Returns whether it exists.
    pub async fn touch(&self, key: &K) -> bool {
        self.entries
            .lock()
            .await
            .get_mut(key)
            .map(|e| e.last_access = Instant::now())
            .is_some()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop expired, unpinned entries. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| {
            now.duration_since(e.last_access) <= self.ttl || (self.pinned)(&e.value)
        });
        before - entries.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until stopped.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle
    where
        K: Sync,
        V: Sync,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let store = self.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        let evicted = store.sweep().await;
                        if evicted > 0 {
                            debug!(evicted, "swept idle entries");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle for a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store: ExpiringStore<&str, u32> = ExpiringStore::new(Duration::from_secs(60));
        store.insert("a", 1).await;
        store.insert("b", 2).await;

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(store.get(&"a").await, Some(1));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.peek(&"a").await, Some(1));
        assert_eq!(store.peek(&"b").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinned_entries_survive() {
        let store: ExpiringStore<&str, u32> =
            ExpiringStore::new(Duration::from_secs(1)).with_pin(|v| *v == 7);
        store.insert("keep", 7).await;
        store.insert("drop", 1).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.touch(&"keep").await);
        assert!(!store.touch(&"drop").await);
    }

    #[tokio::test]
    async fn test_get_or_insert_keeps_first_value() {
        let store: ExpiringStore<String, u32> = ExpiringStore::new(Duration::from_secs(60));
        assert_eq!(store.get_or_insert_with("k".into(), || 1).await, 1);
        assert_eq!(store.get_or_insert_with("k".into(), || 2).await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts() {
        let store: ExpiringStore<&str, u32> = ExpiringStore::new(Duration::from_secs(10));
        store.insert("a", 1).await;
        let sweeper = store.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(store.is_empty().await);
        sweeper.stop().await;
    }
}
