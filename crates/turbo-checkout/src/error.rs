//! Checkout error types.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkout::StepName;
use crate::ids::{OrderToken, PaymentId, VariantId, WarehouseId};
use crate::order::OrderStatus;
use crate::payment::PaymentStatus;

/// Field-attributable validation messages, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Create an empty set of errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors with a single message for a single field.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a message against a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Add every message from `other`, prefixing its field names.
    pub fn merge_prefixed(&mut self, prefix: &str, other: FieldErrors) {
        for (field, messages) in other.0 {
            let entry = self.0.entry(format!("{prefix}.{field}")).or_default();
            entry.extend(messages);
        }
    }

    /// Messages recorded for a field.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Check whether a field has errors.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Check if there are no errors.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fields with errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over fields and their messages.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Errors that can occur in cart and checkout operations.
#[derive(Error, Debug)]
pub enum CommerceError {
    /// Item not in cart.
    #[error("Item not in cart: {0}")]
    ItemNotInCart(String),

    /// Checkout cannot start on an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Invalid quantity.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// Quantity exceeds maximum allowed.
    #[error("Quantity {0} exceeds maximum allowed ({1})")]
    QuantityExceedsLimit(i64, i64),

    /// Currency mismatch.
    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: String, got: String },

    /// Arithmetic overflow.
    #[error("Arithmetic overflow in money calculation")]
    Overflow,

    /// Concurrent modification of checkout storage.
    #[error("Checkout was modified concurrently")]
    ConcurrentModification,

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Cache error.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<turbo_db::DbError> for CommerceError {
    fn from(e: turbo_db::DbError) -> Self {
        CommerceError::DatabaseError(e.to_string())
    }
}

impl From<turbo_cache::CacheError> for CommerceError {
    fn from(e: turbo_cache::CacheError) -> Self {
        if e.is_conflict() || e.is_claimed() {
            return CommerceError::ConcurrentModification;
        }
        CommerceError::CacheError(e.to_string())
    }
}

impl From<serde_json::Error> for CommerceError {
    fn from(e: serde_json::Error) -> Self {
        CommerceError::SerializationError(e.to_string())
    }
}

/// Why a step's data is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidDataKind {
    /// Something has not been filled in yet; render the step.
    Missing,
    /// Stored data no longer agrees with the cart or address, e.g. a
    /// shipping method that is not offered anymore; force re-selection.
    Contradictory,
}

/// A step failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid {kind:?} data in step {step}: {errors}")]
pub struct InvalidData {
    /// The failing step.
    pub step: StepName,
    /// Missing or contradictory.
    pub kind: InvalidDataKind,
    /// Field-level messages.
    pub errors: FieldErrors,
}

impl InvalidData {
    /// Data has not been provided yet.
    pub fn missing(step: StepName, errors: FieldErrors) -> Self {
        Self {
            step,
            kind: InvalidDataKind::Missing,
            errors,
        }
    }

    /// Stored data contradicts the current state.
    pub fn contradictory(step: StepName, errors: FieldErrors) -> Self {
        Self {
            step,
            kind: InvalidDataKind::Contradictory,
            errors,
        }
    }

    /// Check whether the data is contradictory.
    pub fn is_contradictory(&self) -> bool {
        self.kind == InvalidDataKind::Contradictory
    }
}

/// Stock allocation and movement errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StockError {
    /// Not enough available stock for a request.
    ///
    /// `conflict` is set when the stock looked sufficient before the rows
    /// were locked, i.e. a concurrent order got there first.
    #[error("Insufficient stock for {variant_id}: requested {requested}, available {available}")]
    Insufficient {
        variant_id: VariantId,
        requested: i64,
        available: i64,
        conflict: bool,
    },

    /// No stock record for a variant in a warehouse.
    #[error("No stock record for {variant_id} in {warehouse_id}")]
    NotFound {
        variant_id: VariantId,
        warehouse_id: WarehouseId,
    },

    /// Quantities must be positive.
    #[error("Invalid stock quantity: {0}")]
    InvalidQuantity(i64),

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl StockError {
    /// Whether this failure means the goods are not available.
    pub fn is_shortage(&self) -> bool {
        matches!(self, Self::Insufficient { .. })
    }
}

impl From<turbo_db::DbError> for StockError {
    fn from(e: turbo_db::DbError) -> Self {
        StockError::DatabaseError(e.to_string())
    }
}

/// Voucher resolution and redemption errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoucherError {
    /// No voucher with this code.
    #[error("Voucher not found: {0}")]
    NotFound(String),

    /// Voucher has been switched off.
    #[error("Voucher is not active: {0}")]
    Inactive(String),

    /// Voucher validity window has not started.
    #[error("Voucher is not valid yet: {0}")]
    NotYetValid(String),

    /// Voucher validity window has ended.
    #[error("Voucher expired: {0}")]
    Expired(String),

    /// Voucher usage limit reached.
    #[error("Voucher usage limit reached: {0}")]
    Exhausted(String),

    /// A voucher condition does not hold for the cart.
    #[error("Voucher {code} does not apply: {reason}")]
    ConditionNotMet { code: String, reason: String },

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<turbo_db::DbError> for VoucherError {
    fn from(e: turbo_db::DbError) -> Self {
        VoucherError::DatabaseError(e.to_string())
    }
}

/// Kinds of commit failure, for callers deciding how to re-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitErrorKind {
    /// User-fixable data problem; re-render the offending step.
    Validation,
    /// One or more items are no longer available.
    InsufficientStock,
    /// There is no checkout for this token (never started, or already
    /// committed).
    SessionNotFound,
    /// The cart is empty.
    EmptyCart,
    /// The checkout changed while committing; retry.
    Conflict,
    /// Storage failure.
    Storage,
}

/// Failure to turn a checkout into an order.
///
/// A failed commit leaves checkout storage, the cart, stock and vouchers
/// exactly as they were.
#[derive(Error, Debug)]
pub enum CommitError {
    /// A step failed re-validation.
    #[error(transparent)]
    Invalid(#[from] InvalidData),

    /// The voucher could not be applied.
    #[error("Voucher cannot be applied: {0}")]
    Voucher(#[from] VoucherError),

    /// Stock could not be allocated.
    #[error("One or more items are no longer available")]
    Stock(#[from] StockError),

    /// No checkout session for the token.
    #[error("Checkout session not found")]
    SessionNotFound,

    /// Nothing to order.
    #[error("Cart is empty")]
    EmptyCart,

    /// The session or cart changed under the commit.
    #[error("Checkout was modified concurrently")]
    Conflict,

    /// Storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CommitError {
    /// The failure category.
    pub fn kind(&self) -> CommitErrorKind {
        match self {
            Self::Invalid(_) => CommitErrorKind::Validation,
            Self::Voucher(VoucherError::DatabaseError(_)) => CommitErrorKind::Storage,
            Self::Voucher(_) => CommitErrorKind::Validation,
            Self::Stock(e) if e.is_shortage() => CommitErrorKind::InsufficientStock,
            Self::Stock(_) => CommitErrorKind::Storage,
            Self::SessionNotFound => CommitErrorKind::SessionNotFound,
            Self::EmptyCart => CommitErrorKind::EmptyCart,
            Self::Conflict => CommitErrorKind::Conflict,
            Self::Storage(_) => CommitErrorKind::Storage,
        }
    }

    /// Field-level messages to render against; empty for cart-level errors.
    pub fn field_errors(&self) -> FieldErrors {
        match self {
            Self::Invalid(invalid) => invalid.errors.clone(),
            Self::Voucher(e) if self.kind() == CommitErrorKind::Validation => {
                FieldErrors::single("voucher", e.to_string())
            }
            _ => FieldErrors::new(),
        }
    }
}

impl From<turbo_db::DbError> for CommitError {
    fn from(e: turbo_db::DbError) -> Self {
        CommitError::Storage(e.to_string())
    }
}

impl From<CommerceError> for CommitError {
    fn from(e: CommerceError) -> Self {
        match e {
            CommerceError::EmptyCart => CommitError::EmptyCart,
            CommerceError::ConcurrentModification => CommitError::Conflict,
            other => CommitError::Storage(other.to_string()),
        }
    }
}

/// Order lifecycle errors.
#[derive(Error, Debug)]
pub enum OrderError {
    /// Order not found.
    #[error("Order not found: {0}")]
    NotFound(OrderToken),

    /// The status graph does not allow this move.
    #[error("Invalid order transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Shipping requires a fully paid order.
    #[error("Order {0} is not fully paid")]
    NotFullyPaid(OrderToken),

    /// Delivery group not found.
    #[error("Delivery group not found: {0}")]
    GroupNotFound(String),

    /// Delivery group was already shipped or canceled.
    #[error("Delivery group {0} is already closed")]
    GroupClosed(String),

    /// Stock movement failed.
    #[error(transparent)]
    Stock(#[from] StockError),

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<turbo_db::DbError> for OrderError {
    fn from(e: turbo_db::DbError) -> Self {
        OrderError::DatabaseError(e.to_string())
    }
}

/// Errors raised by a payment gateway client.
///
/// These are logged in full but never shown to the customer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The gateway refused the operation.
    #[error("Gateway declined: {0}")]
    Declined(String),

    /// Network or protocol failure.
    #[error("Gateway transport error: {0}")]
    Transport(String),

    /// The gateway did not answer in time.
    #[error("Gateway timed out after {0:?}")]
    Timeout(Duration),

    /// The gateway does not support the operation.
    #[error("Operation not supported by gateway: {0}")]
    Unsupported(&'static str),
}

/// Payment lifecycle errors.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderToken),

    /// Payment not found.
    #[error("Payment not found: {0}")]
    NotFound(PaymentId),

    /// The order cannot take payments in its current status.
    #[error("Order cannot be paid in status {0}")]
    OrderNotPayable(OrderStatus),

    /// No client registered for the gateway variant.
    #[error("Unknown payment gateway: {0}")]
    UnknownGateway(String),

    /// The status graph does not allow this move.
    #[error("Invalid payment transition from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// No payment attempt is waiting.
    #[error("No waiting payment for order {0}")]
    NoWaitingPayment(OrderToken),

    /// Refund amount is not positive, in another currency or above the
    /// captured total.
    #[error("Invalid refund amount: {0}")]
    InvalidRefund(String),

    /// The gateway failed. The details are in the logs.
    #[error("The payment gateway is currently unavailable, please try again later")]
    GatewayUnavailable { payment_id: PaymentId },

    /// Order status update failed.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<turbo_db::DbError> for PaymentError {
    fn from(e: turbo_db::DbError) -> Self {
        PaymentError::DatabaseError(e.to_string())
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Notification delivery errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    /// The message could not be delivered.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_collects_messages() {
        let mut errors = FieldErrors::new();
        assert!(errors.is_empty());
        errors.add("city", "This field is required");
        errors.add("city", "Too long");
        errors.add("zip", "This field is required");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("city").unwrap().len(), 2);
        assert!(errors.contains("zip"));
        assert!(errors.clone().into_result().is_err());
    }

    #[test]
    fn test_field_errors_serializes_as_map() {
        let errors = FieldErrors::single("method", "Select a shipping method");
        let json = serde_json::to_string(&errors).unwrap();
        assert_eq!(json, r#"{"method":["Select a shipping method"]}"#);
    }

    #[test]
    fn test_field_errors_merge_prefixed() {
        let mut errors = FieldErrors::new();
        errors.merge_prefixed("billing", FieldErrors::single("city", "required"));
        assert!(errors.contains("billing.city"));
    }

    #[test]
    fn test_commit_error_kinds() {
        let invalid = CommitError::from(InvalidData::missing(
            StepName::ShippingAddress,
            FieldErrors::single("address", "required"),
        ));
        assert_eq!(invalid.kind(), CommitErrorKind::Validation);
        assert!(invalid.field_errors().contains("address"));

        let stock = CommitError::from(StockError::Insufficient {
            variant_id: VariantId::new("v"),
            requested: 2,
            available: 1,
            conflict: true,
        });
        assert_eq!(stock.kind(), CommitErrorKind::InsufficientStock);
        assert!(stock.field_errors().is_empty());
        assert_eq!(stock.to_string(), "One or more items are no longer available");

        let voucher = CommitError::from(VoucherError::Exhausted("SAVE".into()));
        assert_eq!(voucher.kind(), CommitErrorKind::Validation);
        assert!(voucher.field_errors().contains("voucher"));

        assert_eq!(
            CommitError::from(CommerceError::EmptyCart).kind(),
            CommitErrorKind::EmptyCart
        );
    }

    #[test]
    fn test_gateway_unavailable_hides_details() {
        let err = PaymentError::GatewayUnavailable {
            payment_id: PaymentId::new("pay-secret-123"),
        };
        assert!(!err.to_string().contains("pay-secret"));
    }
}
