//! TTL cache keyed by content hash
//!
//! An entry is a hit only while its TTL has not elapsed AND its stored hash
//! equals the hash the caller currently expects. Anything else is evicted on
//! lookup. Repopulation is serialized per key through [`KeyedLocks`].

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::trace;

/// A cached value with the hash of the configuration that produced it
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub hash: String,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

/// Concurrent TTL cache
pub struct TtlCache<T> {
    name: &'static str,
    ttl: Duration,
    entries: DashMap<String, CacheEntry<T>>,
    locks: KeyedLocks,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: DashMap::new(),
            locks: KeyedLocks::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`, requiring the entry to have been produced under `hash`.
    pub fn get(&self, key: &str, hash: &str) -> Option<T> {
        let entry = self.get_fresh(key)?;
        if entry.hash == hash {
            return Some(entry.value);
        }

        trace!(cache = self.name, key, "[Cache] Hash mismatch, evicting");
        self.entries.remove_if(key, |_, e| e.hash == entry.hash);
        None
    }

    /// Look up `key` by TTL alone.
    pub fn get_fresh(&self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_fresh(self.ttl) {
            return Some(entry);
        }

        trace!(cache = self.name, key, "[Cache] Expired, evicting");
        self.entries
            .remove_if(key, |_, e| e.created_at == entry.created_at);
        None
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: &str, hash: &str, value: T) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                hash: hash.to_string(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys whose repopulation lock is currently held or awaited
    pub fn locked_keys(&self) -> usize {
        self.locks.len()
    }

    /// Acquire the repopulation lock for `key`.
    pub async fn lock(&self, key: &str) -> KeyedLockGuard<'_> {
        self.locks.lock(key).await
    }
}

/// Per-key async mutexes for single-flight repopulation.
///
/// An entry lives only while some caller holds or waits on its lock.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: &str) -> KeyedLockGuard<'_> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedLockGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: &self.locks,
        }
    }

    /// Number of keys currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds a [`KeyedLocks`] entry; dropping it releases the lock and removes
/// the entry when nobody else is waiting on it.
pub struct KeyedLockGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        // The owned guard holds an Arc; release it before counting
        self.guard.take();
        self.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
