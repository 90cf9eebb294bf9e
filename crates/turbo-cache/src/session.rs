//! Checkout session storage keyed by opaque tokens.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{cache_key, Cache, CacheError, Entry};

/// Namespace for session entries in the cache.
const SESSION_PREFIX: &str = "checkout";

/// A unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID from an existing token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new cryptographically secure session ID.
    pub fn generate() -> Self {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        use rand::Rng;

        let bytes: [u8; 18] = rand::thread_rng().gen();
        Self(format!("sess_{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Get the session ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored session blob and its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    /// Opaque storage blob.
    pub blob: Vec<u8>,
    /// Version for optimistic concurrency control.
    pub version: u64,
}

/// Session blobs by token.
///
/// # Example
///
/// ```rust,ignore
/// let store = SessionStore::new(Cache::new()).with_ttl(Duration::from_secs(3600));
/// let token = SessionId::generate();
///
/// let version = store.save(&token, blob, None)?;
/// // A second writer holding the same old version loses.
/// assert!(store.save(&token, other_blob, None).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct SessionStore {
    cache: Cache,
    ttl: Option<Duration>,
    /// Keys of sessions currently held by a [`SessionClaim`].
    claims: Arc<Mutex<HashSet<String>>>,
}

impl SessionStore {
    /// Create a session store on top of a cache.
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            ttl: None,
            claims: Arc::default(),
        }
    }

    /// Expire sessions that are not written for `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The configured time-to-live, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Load the blob stored for a token.
    pub fn load(&self, id: &SessionId) -> Option<SessionEntry> {
        self.cache.get_entry(&session_key(id)).map(|entry| SessionEntry {
            version: entry.version(),
            blob: entry.into_bytes(),
        })
    }

    /// Write a blob if nobody else wrote since `expected_version` was read.
    ///
    /// Pass `None` for a session that did not exist when it was loaded.
    /// Returns the new version.
    pub fn save(
        &self,
        id: &SessionId,
        blob: Vec<u8>,
        expected_version: Option<u64>,
    ) -> Result<u64, CacheError> {
        let version = self
            .cache
            .compare_and_set(&session_key(id), expected_version, blob, self.ttl)?;
        tracing::trace!(session = %id, version, "session saved");
        Ok(version)
    }

    /// Take exclusive ownership of a session entry.
    ///
    /// The entry is removed from the store at once, so a second claim on the
    /// same token fails with `Claimed` while this one is held. The claim puts
    /// the entry back when it is dropped, unless it is released.
    pub fn claim(&self, id: &SessionId, version: u64) -> Result<SessionClaim, CacheError> {
        let key = session_key(id);
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if claims.contains(&key) {
            return Err(CacheError::Claimed(key));
        }
        let entry = self.cache.take(&key, version)?;
        claims.insert(key.clone());
        drop(claims);
        tracing::debug!(session = %id, version, "session claimed");
        Ok(SessionClaim {
            cache: self.cache.clone(),
            claims: Arc::clone(&self.claims),
            id: id.clone(),
            key,
            entry: Some(entry),
        })
    }

    /// Check whether a claim on the session is currently held.
    pub fn is_claimed(&self, id: &SessionId) -> bool {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&session_key(id))
    }

    /// Delete a session.
    pub fn delete(&self, id: &SessionId) {
        self.cache.delete(&session_key(id));
    }

    /// Check if a session exists.
    pub fn exists(&self, id: &SessionId) -> bool {
        self.cache.exists(&session_key(id))
    }
}

fn session_key(id: &SessionId) -> String {
    cache_key!(SESSION_PREFIX, id)
}

/// A session entry taken out of the store.
///
/// Dropping the claim restores the exact bytes and version.
#[derive(Debug)]
pub struct SessionClaim {
    cache: Cache,
    claims: Arc<Mutex<HashSet<String>>>,
    id: SessionId,
    key: String,
    entry: Option<Entry>,
}

impl SessionClaim {
    /// The claimed session's token.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The claimed blob.
    pub fn blob(&self) -> &[u8] {
        self.entry.as_ref().map(Entry::bytes).unwrap_or_default()
    }

    /// The claimed version.
    pub fn version(&self) -> Option<u64> {
        self.entry.as_ref().map(Entry::version)
    }

    /// Keep the session deleted.
    pub fn release(mut self) {
        self.entry = None;
        self.unmark();
        tracing::debug!(session = %self.id, "session released");
    }

    /// Put the session back as it was.
    pub fn restore(mut self) {
        self.put_back();
    }

    fn put_back(&mut self) {
        if let Some(entry) = self.entry.take() {
            if !self.cache.restore(&self.key, entry) {
                tracing::warn!(session = %self.id, "session rewritten while claimed, keeping newer entry");
            }
        }
        self.unmark();
    }

    fn unmark(&self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.put_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Cache::new())
    }

    #[test]
    fn test_session_id_new() {
        let id = SessionId::new("abc123");
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(format!("{}", id), "abc123");
    }

    #[test]
    fn test_session_id_generate_format() {
        let id = SessionId::generate();
        let s = id.as_str();

        assert!(s.starts_with("sess_"));
        // 18 bytes of base64 = 24 chars, plus "sess_"
        assert_eq!(s.len(), 29);
        assert!(s[5..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_session_id_generate_uniqueness() {
        let id1 = SessionId::generate();
        let id2 = SessionId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_serialization() {
        let id = SessionId::new("serialize-me");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""serialize-me""#);

        let deserialized: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, id);
    }

    #[test]
    fn test_save_and_load() {
        let store = store();
        let id = SessionId::generate();
        assert!(store.load(&id).is_none());

        let version = store.save(&id, b"{}".to_vec(), None).unwrap();
        let entry = store.load(&id).unwrap();
        assert_eq!(entry.blob, b"{}");
        assert_eq!(entry.version, version);
    }

    #[test]
    fn test_save_detects_concurrent_writer() {
        let store = store();
        let id = SessionId::generate();
        let v1 = store.save(&id, b"a".to_vec(), None).unwrap();

        // Two writers both loaded v1.
        store.save(&id, b"b".to_vec(), Some(v1)).unwrap();
        let err = store.save(&id, b"c".to_vec(), Some(v1)).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.load(&id).unwrap().blob, b"b");
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = store();
        let id = SessionId::generate();
        let version = store.save(&id, b"a".to_vec(), None).unwrap();

        let claim = store.claim(&id, version).unwrap();
        assert_eq!(claim.blob(), b"a");
        assert!(store.is_claimed(&id));
        assert!(store.claim(&id, version).unwrap_err().is_claimed());

        claim.release();
        assert!(!store.exists(&id));
        assert!(!store.is_claimed(&id));
        assert!(store.claim(&id, version).unwrap_err().is_not_found());
    }

    #[test]
    fn test_dropped_claim_restores_exact_entry() {
        let store = store();
        let id = SessionId::generate();
        let version = store.save(&id, b"payload".to_vec(), None).unwrap();

        {
            let _claim = store.claim(&id, version).unwrap();
            assert!(!store.exists(&id));
        }
        assert!(!store.is_claimed(&id));

        let entry = store.load(&id).unwrap();
        assert_eq!(entry.blob, b"payload");
        assert_eq!(entry.version, version);
    }

    #[test]
    fn test_claim_with_stale_version() {
        let store = store();
        let id = SessionId::generate();
        let v1 = store.save(&id, b"a".to_vec(), None).unwrap();
        store.save(&id, b"b".to_vec(), Some(v1)).unwrap();

        assert!(store.claim(&id, v1).unwrap_err().is_conflict());
        assert!(store.exists(&id));
    }

    #[test]
    fn test_ttl_expires_sessions() {
        let store = store().with_ttl(Duration::ZERO);
        let id = SessionId::generate();
        store.save(&id, b"a".to_vec(), None).unwrap();
        assert!(store.load(&id).is_none());
    }
}
