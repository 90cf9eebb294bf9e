//! Payment records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkout::Address;
use crate::ids::{OrderToken, PaymentId};
use crate::money::{Currency, Money};
use crate::order::Order;

/// Where a payment attempt stands with its gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Created, gateway not done yet.
    #[default]
    Waiting,
    /// The gateway asked the customer for more input.
    Input,
    /// Authorized, not captured.
    Preauth,
    /// Funds captured.
    Confirmed,
    Rejected,
    Refunded,
    /// The gateway failed.
    Error,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Waiting => "waiting",
            PaymentStatus::Input => "input",
            PaymentStatus::Preauth => "preauth",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Error => "error",
        }
    }

    /// Check whether the status graph allows moving to `next`. Nothing ever
    /// goes back to `Waiting`, and only `Confirmed` and `Refunded` are final
    /// outcomes: a gateway that failed or declined may still report a
    /// capture later.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match self {
            Waiting => matches!(next, Input | Preauth | Confirmed | Rejected | Error),
            Input => matches!(next, Preauth | Confirmed | Rejected | Error),
            Preauth => matches!(next, Confirmed | Rejected | Refunded),
            Rejected | Error => matches!(next, Confirmed | Refunded),
            Confirmed => matches!(next, Refunded),
            Refunded => false,
        }
    }

    /// Whether the gateway holds the customer's money for this payment.
    pub fn is_captured(&self) -> bool {
        matches!(self, PaymentStatus::Preauth | PaymentStatus::Confirmed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment attempt for an order.
///
/// Billing fields are copied from the order when the attempt starts and do
/// not follow later changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: PaymentId,
    pub order_token: OrderToken,
    /// Gateway identifier.
    pub variant: String,
    pub status: PaymentStatus,
    pub total: Money,
    pub tax: Money,
    pub currency: Currency,
    pub billing_first_name: String,
    pub billing_last_name: String,
    pub billing_address_1: String,
    pub billing_address_2: Option<String>,
    pub billing_city: String,
    pub billing_postcode: String,
    pub billing_country_code: String,
    pub billing_email: Option<String>,
    /// Gateway reference, once known.
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Payment {
    /// A new waiting payment for the order's current total.
    pub fn for_order(order: &Order, variant: impl Into<String>) -> Self {
        let billing = order.billing_address.clone().unwrap_or_else(Address::default);
        let now = Utc::now();
        Self {
            id: PaymentId::generate(),
            order_token: order.token.clone(),
            variant: variant.into(),
            status: PaymentStatus::Waiting,
            total: order.total,
            tax: Money::zero(order.currency),
            currency: order.currency,
            billing_first_name: billing.first_name,
            billing_last_name: billing.last_name,
            billing_address_1: billing.address1,
            billing_address_2: billing.address2,
            billing_city: billing.city,
            billing_postcode: billing.zip,
            billing_country_code: billing.country_code,
            billing_email: order.customer_email().map(str::to_string),
            transaction_id: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == PaymentStatus::Waiting
    }

    /// Move along the status graph.
    pub(crate) fn set_status(&mut self, status: PaymentStatus) {
        self.status = status;
        self.modified_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_graph() {
        use PaymentStatus::*;
        assert!(Waiting.can_transition_to(Confirmed));
        assert!(Waiting.can_transition_to(Error));
        assert!(Input.can_transition_to(Preauth));
        assert!(Preauth.can_transition_to(Refunded));
        assert!(Confirmed.can_transition_to(Refunded));
        assert!(!Confirmed.can_transition_to(Rejected));
        assert!(!Error.can_transition_to(Waiting));
        assert!(Error.can_transition_to(Confirmed));
        assert!(Rejected.can_transition_to(Refunded));
        assert!(!Error.can_transition_to(Rejected));
        assert!(!Refunded.can_transition_to(Confirmed));
        for status in [Waiting, Input, Preauth, Confirmed, Rejected, Refunded, Error] {
            assert!(!status.can_transition_to(Waiting));
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(PaymentStatus::Preauth.to_string(), "preauth");
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Confirmed).unwrap(),
            "\"CONFIRMED\""
        );
    }
}
