//! Voucher definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::Cart;
use crate::error::VoucherError;
use crate::ids::{ProductId, VoucherId};
use crate::money::Money;

/// What a voucher takes off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VoucherValue {
    /// Share of the subtotal in basis points (1000 = 10%).
    Percentage { basis_points: u32 },
    /// Fixed amount off the subtotal.
    Fixed(Money),
    /// Shipping is free.
    FreeShipping,
}

/// Condition for a voucher to apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VoucherCondition {
    /// Minimum cart subtotal.
    MinimumSubtotal(Money),
    /// Minimum number of items.
    MinimumQuantity(i64),
    /// Specific product must be in cart.
    ProductInCart(ProductId),
}

/// A voucher code and its rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Voucher {
    pub id: VoucherId,
    /// Code customers type in (e.g., "SAVE10").
    pub code: String,
    /// Display name.
    pub name: String,
    pub value: VoucherValue,
    pub conditions: Vec<VoucherCondition>,
    /// Maximum number of redemptions (None = unlimited).
    pub usage_limit: Option<i64>,
    /// Redemptions so far.
    pub used: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Voucher {
    fn new(code: impl Into<String>, name: impl Into<String>, value: VoucherValue) -> Self {
        Self {
            id: VoucherId::generate(),
            code: code.into(),
            name: name.into(),
            value,
            conditions: Vec::new(),
            usage_limit: None,
            used: 0,
            starts_at: None,
            ends_at: None,
            active: true,
        }
    }

    /// A percentage voucher, in basis points.
    pub fn percentage(code: impl Into<String>, name: impl Into<String>, basis_points: u32) -> Self {
        Self::new(code, name, VoucherValue::Percentage { basis_points })
    }

    /// A fixed amount voucher.
    pub fn fixed_amount(code: impl Into<String>, name: impl Into<String>, amount: Money) -> Self {
        Self::new(code, name, VoucherValue::Fixed(amount))
    }

    /// A free shipping voucher.
    pub fn free_shipping(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(code, name, VoucherValue::FreeShipping)
    }

    pub fn with_condition(mut self, condition: VoucherCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_usage_limit(mut self, limit: i64) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    /// Restrict the voucher to a validity window.
    pub fn valid_between(
        mut self,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.starts_at = starts_at;
        self.ends_at = ends_at;
        self
    }

    /// Check if the usage limit has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.used >= limit)
    }

    /// Check whether the voucher can be used on a cart right now.
    pub fn check(&self, cart: &Cart, now: DateTime<Utc>) -> Result<(), VoucherError> {
        if !self.active {
            return Err(VoucherError::Inactive(self.code.clone()));
        }
        if self.starts_at.is_some_and(|starts| now < starts) {
            return Err(VoucherError::NotYetValid(self.code.clone()));
        }
        if self.ends_at.is_some_and(|ends| now > ends) {
            return Err(VoucherError::Expired(self.code.clone()));
        }
        if self.is_exhausted() {
            return Err(VoucherError::Exhausted(self.code.clone()));
        }
        if let VoucherValue::Fixed(amount) = &self.value {
            if amount.currency != cart.currency {
                return Err(self.not_met(format!("only valid for {} orders", amount.currency)));
            }
        }
        for condition in &self.conditions {
            self.check_condition(condition, cart)?;
        }
        Ok(())
    }

    fn check_condition(&self, condition: &VoucherCondition, cart: &Cart) -> Result<(), VoucherError> {
        match condition {
            VoucherCondition::MinimumSubtotal(minimum) => {
                let subtotal = cart
                    .subtotal()
                    .map_err(|e| self.not_met(e.to_string()))?;
                if subtotal.currency != minimum.currency || subtotal.amount_cents < minimum.amount_cents {
                    return Err(self.not_met(format!("requires a subtotal of at least {}", minimum)));
                }
            }
            VoucherCondition::MinimumQuantity(minimum) => {
                if cart.item_count() < *minimum {
                    return Err(self.not_met(format!("requires at least {} items", minimum)));
                }
            }
            VoucherCondition::ProductInCart(product_id) => {
                if !cart.items.iter().any(|item| &item.product_id == product_id) {
                    return Err(self.not_met("required product is not in the cart".to_string()));
                }
            }
        }
        Ok(())
    }

    fn not_met(&self, reason: String) -> VoucherError {
        VoucherError::ConditionNotMet {
            code: self.code.clone(),
            reason,
        }
    }

    /// Amount taken off an order with these totals.
    ///
    /// Never more than the amount the voucher applies to.
    pub fn discount_for(&self, subtotal: &Money, shipping_total: &Money) -> Money {
        match &self.value {
            VoucherValue::Percentage { basis_points } => subtotal
                .percentage_bps((*basis_points).min(10_000))
                .unwrap_or(*subtotal),
            VoucherValue::Fixed(amount) => amount
                .min(subtotal)
                .unwrap_or_else(|| Money::zero(subtotal.currency)),
            VoucherValue::FreeShipping => *shipping_total,
        }
    }

    /// Count one redemption.
    pub fn record_usage(&mut self) {
        self.used += 1;
    }
}

/// A voucher as applied to an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedVoucher {
    pub voucher_id: VoucherId,
    pub code: String,
    pub name: String,
    /// Amount discounted.
    pub amount: Money,
}

impl AppliedVoucher {
    pub fn new(voucher: &Voucher, amount: Money) -> Self {
        Self {
            voucher_id: voucher.id.clone(),
            code: voucher.code.clone(),
            name: voucher.name.clone(),
            amount,
        }
    }
}
