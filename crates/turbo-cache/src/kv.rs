//! In-process key-value store with per-entry versions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};

use crate::CacheError;

/// A stored value and the version stamped on it by its last write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    bytes: Vec<u8>,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the entry, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The version of the write that produced this entry.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct CacheInner {
    entries: Mutex<HashMap<String, Entry>>,
    next_version: AtomicU64,
}

/// Shared in-process cache.
///
/// Values are stored as bytes; `get`/`set` add JSON serialization on top.
/// Cloning is cheap and clones share the same entries. Versions come from a
/// single counter, so a key never sees the same version twice.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("entries", &self.entries().len()).finish()
    }
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                next_version: AtomicU64::new(1),
            }),
        }
    }

    /// Get a value from the cache.
    ///
    /// Returns `None` if the key doesn't exist.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get_entry(key) {
            Some(entry) => Ok(Some(serde_json::from_slice(&entry.bytes)?)),
            None => Ok(None),
        }
    }

    /// Set a value in the cache, returning the new version.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<u64, CacheError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.put(key, bytes, None))
    }

    /// Get the raw entry for a key.
    pub fn get_entry(&self, key: &str) -> Option<Entry> {
        let mut entries = self.entries();
        Self::live(&mut entries, key).cloned()
    }

    /// Write raw bytes unconditionally, returning the new version.
    pub fn put(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> u64 {
        let entry = self.stamp(bytes, ttl);
        let version = entry.version;
        self.entries().insert(key.to_string(), entry);
        version
    }

    /// Write raw bytes only if the entry is still at `expected_version`.
    ///
    /// `None` means the key must not exist yet. Returns the new version.
    pub fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<u64, CacheError> {
        let mut entries = self.entries();
        let current = Self::live(&mut entries, key).map(|entry| entry.version);
        if current != expected_version {
            tracing::debug!(key, ?expected_version, ?current, "compare-and-set lost");
            return Err(CacheError::ConcurrentModification(key.to_string()));
        }
        let entry = self.stamp(bytes, ttl);
        let version = entry.version;
        entries.insert(key.to_string(), entry);
        Ok(version)
    }

    /// Remove an entry if it is still at `expected_version`, returning it.
    pub fn take(&self, key: &str, expected_version: u64) -> Result<Entry, CacheError> {
        let mut entries = self.entries();
        let current = Self::live(&mut entries, key).map(|entry| entry.version);
        match current {
            None => Err(CacheError::NotFound(key.to_string())),
            Some(version) if version != expected_version => {
                Err(CacheError::ConcurrentModification(key.to_string()))
            }
            Some(_) => entries
                .remove(key)
                .ok_or_else(|| CacheError::NotFound(key.to_string())),
        }
    }

    /// Put back an entry removed with [`Cache::take`], keeping its version.
    ///
    /// Returns `false` (and keeps the newer entry) if the key was written in
    /// the meantime.
    pub fn restore(&self, key: &str, entry: Entry) -> bool {
        let mut entries = self.entries();
        if Self::live(&mut entries, key).is_some() {
            return false;
        }
        entries.insert(key.to_string(), entry);
        true
    }

    /// Delete a value from the cache.
    pub fn delete(&self, key: &str) {
        self.entries().remove(key);
    }

    /// Check if a key exists in the cache.
    pub fn exists(&self, key: &str) -> bool {
        let mut entries = self.entries();
        Self::live(&mut entries, key).is_some()
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|_, entry| !entry.is_expired(now));
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn stamp(&self, bytes: Vec<u8>, ttl: Option<Duration>) -> Entry {
        Entry {
            bytes,
            version: self.inner.next_version.fetch_add(1, Ordering::Relaxed),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Look up a live entry, evicting it first if it has expired.
    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        if entries.get(key).is_some_and(|entry| entry.is_expired(Instant::now())) {
            entries.remove(key);
            tracing::debug!(key, "cache entry expired");
        }
        entries.get(key)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Helper to build cache keys with namespacing.
///
/// # Example
///
/// ```rust,ignore
/// let key = cache_key!("checkout", token);
/// // Returns "checkout:sess_..."
/// ```
#[macro_export]
macro_rules! cache_key {
    ($prefix:expr, $($part:expr),+) => {{
        let mut key = String::from($prefix);
        $(
            key.push(':');
            key.push_str(&$part.to_string());
        )+
        key
    }};
}
