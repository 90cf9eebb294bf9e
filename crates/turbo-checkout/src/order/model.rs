//! Order types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::LineItem;
use crate::checkout::{Address, DeliveryPartition, ShippingSelection, User};
use crate::error::CommerceError;
use crate::ids::{
    DeliveryGroupId, OrderId, OrderLineId, OrderToken, PaymentId, ProductId, UserId, VariantId,
    WarehouseId,
};
use crate::money::{Currency, Money};
use crate::stock::Allocation;
use crate::voucher::AppliedVoucher;

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed, no payment started.
    #[default]
    New,
    /// A payment has been started.
    PaymentPending,
    /// Confirmed payments cover the total.
    FullyPaid,
    /// Every delivery group has shipped.
    Shipped,
    /// Canceled before shipping.
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::PaymentPending => "payment-pending",
            OrderStatus::FullyPaid => "fully-paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Canceled => "canceled",
        }
    }

    /// Check whether the status graph allows moving to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, PaymentPending)
                | (New, Canceled)
                | (PaymentPending, FullyPaid)
                | (PaymentPending, Canceled)
                | (FullyPaid, Shipped)
                | (FullyPaid, Canceled)
        )
    }

    /// Check if order is in a terminal state.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Canceled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery group status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    #[default]
    Pending,
    Shipped,
    Canceled,
}

/// A line in an order, copied from the cart at commit time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub variant_id: VariantId,
    pub product_id: ProductId,
    /// Product name at time of order.
    pub product_name: String,
    /// SKU at time of order.
    pub sku: Option<String>,
    pub quantity: i64,
    /// Unit price at time of order.
    pub unit_price: Money,
    pub total_price: Money,
    /// Preferred warehouse from the cart until stock is allocated, then the
    /// warehouse the stock was allocated in.
    pub warehouse_id: Option<WarehouseId>,
}

impl OrderLine {
    pub fn from_line_item(item: &LineItem) -> Self {
        Self {
            id: OrderLineId::generate(),
            variant_id: item.variant_id.clone(),
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            sku: item.sku.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
            warehouse_id: item.warehouse_id.clone(),
        }
    }

    /// The stock held for this line.
    pub fn allocation(&self) -> Option<Allocation> {
        self.warehouse_id.as_ref().map(|warehouse_id| Allocation {
            variant_id: self.variant_id.clone(),
            warehouse_id: warehouse_id.clone(),
            quantity: self.quantity,
        })
    }
}

/// Order lines sharing one shipping treatment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryGroup {
    pub id: DeliveryGroupId,
    pub status: GroupStatus,
    pub shipping_required: bool,
    /// Zero for groups that are not shipped.
    pub shipping_price: Money,
    pub shipping_method_name: Option<String>,
    pub lines: Vec<OrderLine>,
}

impl DeliveryGroup {
    /// Create a group from a delivery partition.
    pub fn from_partition(
        partition: &DeliveryPartition,
        shipping_price: Money,
        shipping_method_name: Option<String>,
    ) -> Self {
        Self {
            id: DeliveryGroupId::generate(),
            status: GroupStatus::Pending,
            shipping_required: partition.shipping_required(),
            shipping_price,
            shipping_method_name,
            lines: partition.lines().iter().map(OrderLine::from_line_item).collect(),
        }
    }

    /// Total quantity in the group.
    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Stock held for the group's lines.
    pub fn allocations(&self) -> Vec<Allocation> {
        self.lines.iter().filter_map(OrderLine::allocation).collect()
    }
}

/// One entry of an order's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub created_at: DateTime<Utc>,
    /// Set when the entry records a status change.
    pub status: Option<OrderStatus>,
    pub message: String,
}

/// A placed order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: OrderId,
    /// External-facing identifier. Never changes.
    pub token: OrderToken,
    pub status: OrderStatus,
    pub user_id: Option<UserId>,
    /// Account email of the user who placed the order.
    pub user_email: Option<String>,
    /// Contact email of an anonymous order.
    pub anonymous_user_email: Option<String>,
    pub billing_address: Option<Address>,
    pub shipping_address: Option<Address>,
    /// `None` when nothing is shipped.
    pub shipping_method: Option<ShippingSelection>,
    pub tracking_client_id: Option<String>,
    pub voucher: Option<AppliedVoucher>,
    pub groups: Vec<DeliveryGroup>,
    /// Payment attempts, oldest first.
    pub payment_ids: Vec<PaymentId>,
    pub currency: Currency,
    pub subtotal: Money,
    pub shipping_total: Money,
    pub discount_total: Money,
    pub total: Money,
    /// Customer note.
    pub note: Option<String>,
    /// Append-only.
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
}

impl Order {
    /// All lines of every group.
    pub fn lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.groups.iter().flat_map(|g| g.lines.iter())
    }

    /// Get total item count.
    pub fn item_count(&self) -> i64 {
        self.groups.iter().map(DeliveryGroup::item_count).sum()
    }

    /// Email to send order mail to.
    pub fn customer_email(&self) -> Option<&str> {
        self.user_email
            .as_deref()
            .or(self.anonymous_user_email.as_deref())
    }

    pub fn group(&self, id: &DeliveryGroupId) -> Option<&DeliveryGroup> {
        self.groups.iter().find(|g| &g.id == id)
    }

    pub fn group_mut(&mut self, id: &DeliveryGroupId) -> Option<&mut DeliveryGroup> {
        self.groups.iter_mut().find(|g| &g.id == id)
    }

    /// Append a history entry.
    pub fn push_history(&mut self, status: Option<OrderStatus>, message: impl Into<String>) {
        self.history.push(HistoryEntry {
            created_at: Utc::now(),
            status,
            message: message.into(),
        });
    }
}

/// An order being assembled by the checkout steps during a commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDraft {
    pub user_id: Option<UserId>,
    pub user_email: Option<String>,
    pub anonymous_user_email: Option<String>,
    pub shipping_address: Option<Address>,
    pub shipping_method: Option<ShippingSelection>,
    pub billing_address: Option<Address>,
    pub note: Option<String>,
    pub groups: Vec<DeliveryGroup>,
    /// Address to store in the user's address book once the order exists.
    pub save_to_address_book: Option<Address>,
}

impl OrderDraft {
    /// Start a draft for a user, or for an anonymous customer with a
    /// contact email.
    pub fn new(user: Option<&User>, anonymous_email: Option<String>) -> Self {
        match user {
            Some(user) => Self {
                user_id: Some(user.id.clone()),
                user_email: Some(user.email.as_str().to_string()),
                ..Self::default()
            },
            None => Self {
                anonymous_user_email: anonymous_email,
                ..Self::default()
            },
        }
    }

    /// All lines, in group order.
    pub fn lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.groups.iter().flat_map(|g| g.lines.iter())
    }

    /// Record where each line's stock was allocated. `allocations` is in
    /// line order.
    pub fn assign_warehouses(&mut self, allocations: &[Allocation]) {
        let lines = self.groups.iter_mut().flat_map(|g| g.lines.iter_mut());
        for (line, allocation) in lines.zip(allocations) {
            line.warehouse_id = Some(allocation.warehouse_id.clone());
        }
    }

    pub fn subtotal(&self, currency: Currency) -> Result<Money, CommerceError> {
        Money::try_sum(self.lines().map(|l| &l.total_price), currency).ok_or(CommerceError::Overflow)
    }

    pub fn shipping_total(&self, currency: Currency) -> Result<Money, CommerceError> {
        Money::try_sum(self.groups.iter().map(|g| &g.shipping_price), currency)
            .ok_or(CommerceError::Overflow)
    }

    /// Turn the draft into a new order.
    pub fn into_order(
        self,
        currency: Currency,
        voucher: Option<AppliedVoucher>,
        tracking_client_id: Option<String>,
    ) -> Result<Order, CommerceError> {
        let subtotal = self.subtotal(currency)?;
        let shipping_total = self.shipping_total(currency)?;
        let discount_total = voucher
            .as_ref()
            .map(|v| v.amount)
            .unwrap_or_else(|| Money::zero(currency));
        let gross = subtotal.try_add(&shipping_total).ok_or(CommerceError::Overflow)?;
        let total = gross
            .try_subtract(&discount_total)
            .ok_or(CommerceError::CurrencyMismatch {
                expected: currency.code().to_string(),
                got: discount_total.currency.code().to_string(),
            })?;
        let total = if total.is_negative() { Money::zero(currency) } else { total };

        let now = Utc::now();
        Ok(Order {
            id: OrderId::generate(),
            token: OrderToken::generate(),
            status: OrderStatus::New,
            user_id: self.user_id,
            user_email: self.user_email,
            anonymous_user_email: self.anonymous_user_email,
            billing_address: self.billing_address,
            shipping_address: self.shipping_address,
            shipping_method: self.shipping_method,
            tracking_client_id,
            voucher,
            groups: self.groups,
            payment_ids: Vec::new(),
            currency,
            subtotal,
            shipping_total,
            discount_total,
            total,
            note: self.note,
            history: Vec::new(),
            created_at: now,
            last_status_change: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{Cart, NewLineItem};
    use crate::checkout::DeliveryPartitioner;
    use crate::ids::VoucherId;

    fn usd(cents: i64) -> Money {
        Money::new(cents, Currency::USD)
    }

    fn draft() -> OrderDraft {
        let mut cart = Cart::new(Currency::USD);
        cart.add_item(NewLineItem::physical(
            VariantId::new("mug"),
            ProductId::new("mug"),
            "Mug",
            2,
            usd(1000),
        ))
        .unwrap();
        cart.add_item(NewLineItem::digital(
            VariantId::new("ebook"),
            ProductId::new("ebook"),
            "Ebook",
            1,
            usd(500),
        ))
        .unwrap();

        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let mut draft = OrderDraft::new(None, Some("guest@example.com".to_string()));
        draft.groups.push(DeliveryGroup::from_partition(&partitions[0], usd(400), Some("Standard".into())));
        draft.groups.push(DeliveryGroup::from_partition(&partitions[1], usd(0), None));
        draft
    }

    #[test]
    fn test_status_graph() {
        use OrderStatus::*;
        assert!(New.can_transition_to(PaymentPending));
        assert!(PaymentPending.can_transition_to(FullyPaid));
        assert!(FullyPaid.can_transition_to(Shipped));
        assert!(FullyPaid.can_transition_to(Canceled));
        assert!(!New.can_transition_to(FullyPaid));
        assert!(!Shipped.can_transition_to(Canceled));
        assert!(!Canceled.can_transition_to(New));
        assert!(Shipped.is_final() && Canceled.is_final());
    }

    #[test]
    fn test_into_order_totals() {
        let voucher = AppliedVoucher {
            voucher_id: VoucherId::new("v"),
            code: "SAVE".into(),
            name: "Save".into(),
            amount: usd(300),
        };
        let order = draft()
            .into_order(Currency::USD, Some(voucher), Some("ga-1".into()))
            .unwrap();

        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.subtotal, usd(2500));
        assert_eq!(order.shipping_total, usd(400));
        assert_eq!(order.discount_total, usd(300));
        assert_eq!(order.total, usd(2600));
        assert_eq!(order.item_count(), 3);
        assert_eq!(order.customer_email(), Some("guest@example.com"));
        assert_eq!(order.tracking_client_id.as_deref(), Some("ga-1"));
    }

    #[test]
    fn test_assign_warehouses_in_line_order() {
        let mut draft = draft();
        let allocations: Vec<Allocation> = draft
            .lines()
            .enumerate()
            .map(|(i, line)| Allocation {
                variant_id: line.variant_id.clone(),
                warehouse_id: WarehouseId::new(format!("wh-{}", i)),
                quantity: line.quantity,
            })
            .collect();
        draft.assign_warehouses(&allocations);

        let order = draft.into_order(Currency::USD, None, None).unwrap();
        assert_eq!(order.groups[0].allocations(), vec![allocations[0].clone()]);
        assert_eq!(order.groups[1].allocations(), vec![allocations[1].clone()]);
    }
}
