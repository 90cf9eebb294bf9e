//! Versioned key-value cache and checkout session storage for TurboCheckout.
//!
//! Every write to the [`Cache`] stamps the entry with a fresh version, which
//! makes optimistic updates possible: read an entry, then write it back only
//! if the version is still the one you read.
//!
//! # Example
//!
//! ```rust,ignore
//! use turbo_cache::{Cache, SessionId, SessionStore};
//!
//! let sessions = SessionStore::new(Cache::new());
//! let token = SessionId::generate();
//!
//! let version = sessions.save(&token, b"{}".to_vec(), None)?;
//! let entry = sessions.load(&token).expect("just saved");
//! assert_eq!(entry.version, version);
//!
//! // Claim the entry for a commit; dropping the claim puts it back.
//! let claim = sessions.claim(&token, entry.version)?;
//! claim.release();
//! ```

mod error;
mod kv;
mod session;

pub use error::CacheError;
pub use kv::{Cache, Entry};
pub use session::{SessionClaim, SessionEntry, SessionId, SessionStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{Cache, CacheError, Entry, SessionClaim, SessionEntry, SessionId, SessionStore};
}
