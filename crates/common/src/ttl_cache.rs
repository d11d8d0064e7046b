//! Concurrent map with per-entry time-to-live.
//!
//! Entries expire lazily: a lookup that finds an expired entry removes it and
//! reports a miss. A background sweeper can be started to reclaim memory for
//! entries that are never looked up again, but correctness never depends on it.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe cache whose entries become invisible once their TTL elapses.
///
/// Cloning the cache yields another handle to the same entries, so one clone
/// can be written by a producer task while others are read from request
/// handlers. Values are cloned out on read; a reader never observes a value
/// that is half-written because each entry is replaced as a whole under the
/// shard lock.
pub struct TtlCache<K, V> {
    entries: Arc<DashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Insert or overwrite `key`, with a fresh TTL counted from now
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// Return the value for `key` if it is present and not yet expired
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();

        // The shard guard must be released before removing below.
        let lookup = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                // Another writer may have refreshed the entry in between;
                // only drop it if it is still the expired one.
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                trace!("Evicted expired cache entry on access");
                None
            }
            None => None,
        }
    }

    /// Remove `key`, returning its value if it was still live
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .remove(key)
            .and_then(|(_, entry)| (!entry.is_expired(now)).then_some(entry.value))
    }

    /// Number of stored entries, including expired ones not yet reclaimed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start a background task that purges expired entries every `period`.
    ///
    /// The task holds only a weak reference and exits once every handle to
    /// the cache has been dropped. Must be called from within a Tokio runtime.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(entries) = entries.upgrade() else {
                    trace!("TTL cache dropped, stopping sweeper");
                    break;
                };

                let removed = purge(&entries);
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}

fn purge<K: Eq + Hash, V>(entries: &DashMap<K, Entry<V>>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(entries.len())
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
