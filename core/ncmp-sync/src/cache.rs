//! Cluster-wide coordination cache.
//!
//! Cluster members never lock around the cache. Every mutation that depends
//! on the current value goes through one of the atomic per-key operations
//! (`put_if_absent`, `compute_if_present`, `remove`), which is what makes
//! "whoever removes the entry wins" safe across instances.
//!
//! [`LocalCoordinationCache`] is the single-process implementation used by
//! the daemon and the tests. Expiry is measured with `tokio::time` so paused
//! test clocks drive it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared key-value map with per-entry expiry.
///
/// `ttl = None` keeps the entry until it is removed.
#[async_trait]
pub trait CoordinationCache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V>;

    async fn put(&self, key: &str, value: V, ttl: Option<Duration>);

    /// Stores `value` only if no live entry exists. Returns whether it was
    /// stored.
    async fn put_if_absent(&self, key: &str, value: V, ttl: Option<Duration>) -> bool;

    /// Removes the entry, returning it if it was present. Removing an absent
    /// key is not an error.
    async fn remove(&self, key: &str) -> Option<V>;

    async fn contains_key(&self, key: &str) -> bool;

    /// Atomically applies `update` to a present entry, resets its expiry to
    /// `ttl`, and returns the updated value. Absent entries are left absent.
    async fn compute_if_present(
        &self,
        key: &str,
        ttl: Option<Duration>,
        update: &(dyn for<'v> Fn(&'v mut V) + Send + Sync),
    ) -> Option<V>;
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-process [`CoordinationCache`].
pub struct LocalCoordinationCache<V> {
    name: String,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> LocalCoordinationCache<V> {
    /// Creates an empty cache. `name` only appears in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Drops `key` if it has expired and returns the live entry, if any.
fn live_entry<'a, V>(
    entries: &'a mut HashMap<String, Entry<V>>,
    key: &str,
) -> Option<&'a mut Entry<V>> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
        tracing::trace!("Expired cache entry {key}");
    }
    entries.get_mut(key)
}

#[async_trait]
impl<V> CoordinationCache<V> for LocalCoordinationCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        live_entry(&mut entries, key).map(|e| e.value.clone())
    }

    async fn put(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry::new(value, ttl));
    }

    async fn put_if_absent(&self, key: &str, value: V, ttl: Option<Duration>) -> bool {
        let mut entries = self.entries.lock().await;
        if live_entry(&mut entries, key).is_some() {
            return false;
        }
        entries.insert(key.to_string(), Entry::new(value, ttl));
        true
    }

    async fn remove(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        live_entry(&mut entries, key)?;
        entries.remove(key).map(|e| e.value)
    }

    async fn contains_key(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        live_entry(&mut entries, key).is_some()
    }

    async fn compute_if_present(
        &self,
        key: &str,
        ttl: Option<Duration>,
        update: &(dyn for<'v> Fn(&'v mut V) + Send + Sync),
    ) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let entry = live_entry(&mut entries, key)?;
        update(&mut entry.value);
        entry.expires_at = ttl.map(|ttl| Instant::now() + ttl);
        Some(entry.value.clone())
    }
}
