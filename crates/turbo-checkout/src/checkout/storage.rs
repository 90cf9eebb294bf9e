//! Versioned checkout storage.
//!
//! This is what a checkout session persists between requests. The layout is
//! keyed by step:
//!
//! ```json
//! {
//!   "version": "1.0.0",
//!   "shipping_address": { "first_name": "Ada", ... },
//!   "shipping_method": { "method_id": "standard" },
//!   "summary": { "billing_same_as_shipping": true, "note": null },
//!   "billing_address": null,
//!   "email": "ada@example.com"
//! }
//! ```
//!
//! Loading never fails. Anything that is not current-version storage is
//! dropped and replaced by empty storage.

use serde::{Deserialize, Serialize};

use crate::checkout::Address;
use crate::error::CommerceError;
use crate::ids::ShippingMethodId;

/// Current storage schema version.
pub const STORAGE_VERSION: &str = "1.0.0";

/// Stored shipping method choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMethodData {
    pub method_id: ShippingMethodId,
}

/// Stored summary step choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryData {
    /// Bill to the shipping address.
    pub billing_same_as_shipping: bool,
    /// Customer note for the order.
    #[serde(default)]
    pub note: Option<String>,
}

/// Typed checkout storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutStorage {
    version: String,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub shipping_method: Option<ShippingMethodData>,
    #[serde(default)]
    pub summary: Option<SummaryData>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Default for CheckoutStorage {
    fn default() -> Self {
        Self {
            version: STORAGE_VERSION.to_string(),
            shipping_address: None,
            shipping_method: None,
            summary: None,
            billing_address: None,
            email: None,
        }
    }
}

impl CheckoutStorage {
    /// Empty storage at the current version.
    pub fn new() -> Self {
        Self::default()
    }

    /// The schema version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Decode a stored blob, or start afresh.
    pub fn load(blob: &[u8]) -> Self {
        if blob.is_empty() {
            return Self::new();
        }
        let value: serde_json::Value = match serde_json::from_slice(blob) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "unreadable checkout storage, resetting");
                return Self::new();
            }
        };
        Self::migrate(value).unwrap_or_else(Self::new)
    }

    /// Bring stored data up to the current version.
    ///
    /// Returns `None` when the data has to be discarded.
    fn migrate(value: serde_json::Value) -> Option<Self> {
        let version = value.get("version").and_then(|v| v.as_str());
        match version {
            Some(STORAGE_VERSION) => match serde_json::from_value(value) {
                Ok(storage) => Some(storage),
                Err(e) => {
                    tracing::debug!(error = %e, "malformed checkout storage, resetting");
                    None
                }
            },
            other => {
                tracing::debug!(
                    found = ?other,
                    current = STORAGE_VERSION,
                    "checkout storage version mismatch, resetting"
                );
                None
            }
        }
    }

    /// Encode for the session store.
    pub fn to_blob(&self) -> Result<Vec<u8>, CommerceError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Drop every step's data.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
