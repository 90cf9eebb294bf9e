//! Splitting a cart into delivery partitions.

use serde::{Deserialize, Serialize};

use crate::cart::{Cart, LineItem};
use crate::error::CommerceError;
use crate::money::{Currency, Money};

/// Cart lines that share one shipping treatment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPartition {
    shipping_required: bool,
    currency: Currency,
    lines: Vec<LineItem>,
}

impl DeliveryPartition {
    /// Whether the lines are shipped.
    pub fn shipping_required(&self) -> bool {
        self.shipping_required
    }

    /// The lines in this partition, in cart order.
    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    /// Total quantity.
    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Sum of line totals.
    pub fn subtotal(&self) -> Result<Money, CommerceError> {
        Money::try_sum(self.lines.iter().map(|l| &l.total_price), self.currency)
            .ok_or(CommerceError::Overflow)
    }
}

/// Groups cart lines by whether they need shipping.
///
/// A cart with physical and digital lines yields two partitions, shipped
/// first. A cart with a single kind of line yields one. An empty cart is
/// rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryPartitioner;

impl DeliveryPartitioner {
    /// Partition the cart's lines.
    pub fn partition(cart: &Cart) -> Result<Vec<DeliveryPartition>, CommerceError> {
        if cart.is_empty() {
            return Err(CommerceError::EmptyCart);
        }

        let (shipped, digital): (Vec<LineItem>, Vec<LineItem>) = cart
            .items
            .iter()
            .cloned()
            .partition(|line| line.requires_shipping);

        let partitions = [(true, shipped), (false, digital)]
            .into_iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(shipping_required, lines)| DeliveryPartition {
                shipping_required,
                currency: cart.currency,
                lines,
            })
            .collect();
        Ok(partitions)
    }
}
