//! Typed identifiers.
//!
//! Ids are ordered so they can key `turbo-db` tables, which lock rows in key
//! order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Checkout tokens are the opaque session tokens handed out by the cache.
pub use turbo_cache::SessionId as CheckoutToken;

/// String-backed identifier newtypes. `generate` yields a v4 UUID.
macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    )+};
}

define_id!(
    ProductId,
    VariantId,
    WarehouseId,
    CartId,
    LineItemId,
    OrderId,
    /// External-facing order identifier.
    OrderToken,
    DeliveryGroupId,
    OrderLineId,
    PaymentId,
    VoucherId,
    ShippingMethodId,
    AddressId,
    UserId,
);
