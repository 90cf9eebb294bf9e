//! Order lifecycle: status changes, notes, cancellation and shipping.

use chrono::Utc;
use turbo_db::Transaction;

use crate::error::OrderError;
use crate::ids::{DeliveryGroupId, OrderToken};
use crate::money::Money;
use crate::order::{GroupStatus, Order, OrderStatus};
use crate::payment::{Payment, PaymentStatus};
use crate::store::Stores;

/// Drives orders through their status graph.
///
/// Every method that changes an order holds the order row for the whole
/// change, and writes the history entry together with the change.
#[derive(Debug, Clone)]
pub struct OrderStatusMachine {
    stores: Stores,
}

impl OrderStatusMachine {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Move an order to a new status and record it in the history.
    ///
    /// This is the only place an order's status is written.
    pub fn change_status(order: &mut Order, status: OrderStatus) -> Result<(), OrderError> {
        if !order.status.can_transition_to(status) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: status,
            });
        }
        tracing::info!(order = %order.token, from = %order.status, to = %status, "order status changed");
        order.status = status;
        order.last_status_change = Utc::now();
        order.push_history(Some(status), format!("Order status changed to {}", status));
        Ok(())
    }

    /// Whether confirmed payments cover the order total.
    pub async fn is_fully_paid(&self, order: &Order) -> bool {
        self.confirmed_total(order, None).await >= order.total.amount_cents
    }

    /// Like [`Self::is_fully_paid`], with `settled` standing in for the
    /// stored copy of the same payment.
    ///
    /// Callers hold the order row; payments of the order are only changed
    /// under that lock, so reading them here cannot block.
    pub(crate) async fn is_fully_paid_with(&self, order: &Order, settled: &Payment) -> bool {
        self.confirmed_total(order, Some(settled)).await >= order.total.amount_cents
    }

    async fn confirmed_total(&self, order: &Order, settled: Option<&Payment>) -> i64 {
        let mut total: i64 = 0;
        for id in &order.payment_ids {
            let payment = match settled {
                Some(settled) if &settled.id == id => Some(settled.clone()),
                _ => self.stores.payments.get(id).await,
            };
            if let Some(payment) = payment {
                if payment.status == PaymentStatus::Confirmed && payment.currency == order.currency {
                    total = total.saturating_add(payment.total.amount_cents);
                }
            }
        }
        total
    }

    /// Change an order's status.
    pub async fn transition(&self, token: &OrderToken, status: OrderStatus) -> Result<Order, OrderError> {
        let mut row = self.lock(token).await?;
        Self::change_status(&mut row, status)?;
        let order = Order::clone(&row);
        let mut tx = Transaction::begin();
        tx.enlist(row);
        tx.commit();
        Ok(order)
    }

    /// Add a note to the order history.
    pub async fn add_note(&self, token: &OrderToken, message: impl Into<String>) -> Result<(), OrderError> {
        let message = message.into();
        self.stores
            .orders
            .update(token, |order| order.push_history(None, message))
            .await
            .map_err(|e| not_found_or(e, token))
    }

    /// Cancel an order that has not shipped, giving its stock back and
    /// voiding its waiting payment.
    #[tracing::instrument(skip(self), fields(order = %token))]
    pub async fn cancel_order(&self, token: &OrderToken) -> Result<Order, OrderError> {
        let mut tx = Transaction::begin();
        let mut row = self.lock(token).await?;
        Self::change_status(&mut row, OrderStatus::Canceled)?;
        self.void_waiting_payment(&mut tx, &mut row).await?;

        let mut allocations = Vec::new();
        for group in row.groups.iter_mut().filter(|g| g.status == GroupStatus::Pending) {
            allocations.extend(group.allocations());
            group.status = GroupStatus::Canceled;
        }
        self.stores.stock.release(&mut tx, &allocations).await?;

        let order = Order::clone(&row);
        tx.enlist(row);
        tx.commit();
        Ok(order)
    }

    /// Mark a delivery group as shipped. The order has to be fully paid; it
    /// becomes shipped once every group has.
    #[tracing::instrument(skip(self), fields(order = %token, group = %group_id))]
    pub async fn ship_group(
        &self,
        token: &OrderToken,
        group_id: &DeliveryGroupId,
    ) -> Result<Order, OrderError> {
        let mut tx = Transaction::begin();
        let mut row = self.lock(token).await?;
        if row.status != OrderStatus::FullyPaid || !self.is_fully_paid(&row).await {
            return Err(OrderError::NotFullyPaid(token.clone()));
        }

        let group = row
            .group_mut(group_id)
            .ok_or_else(|| OrderError::GroupNotFound(group_id.to_string()))?;
        if group.status != GroupStatus::Pending {
            return Err(OrderError::GroupClosed(group_id.to_string()));
        }
        group.status = GroupStatus::Shipped;
        let allocations = group.allocations();
        self.stores.stock.fulfil(&mut tx, &allocations).await?;
        row.push_history(None, format!("Delivery group {} shipped", group_id));

        if row.groups.iter().all(|g| g.status == GroupStatus::Shipped) {
            Self::change_status(&mut row, OrderStatus::Shipped)?;
        }

        let order = Order::clone(&row);
        tx.enlist(row);
        tx.commit();
        Ok(order)
    }

    /// Delete the order's waiting payment and free its slot. Callers hold
    /// the order row.
    async fn void_waiting_payment(&self, tx: &mut Transaction, order: &mut Order) -> Result<(), OrderError> {
        let mut slot = match self.stores.waiting_payments.lock(&order.token).await {
            Ok(slot) => slot,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match self.stores.payments.lock(&slot).await {
            Ok(mut payment) if payment.is_waiting() => {
                payment.delete();
                order.payment_ids.retain(|id| id != payment.key());
                order.push_history(None, format!("Payment {} voided", payment.key()));
                tracing::info!(payment = %payment.key(), "waiting payment voided");
                tx.enlist(payment);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        slot.delete();
        tx.enlist(slot);
        Ok(())
    }

    async fn lock(&self, token: &OrderToken) -> Result<turbo_db::RowGuard<OrderToken, Order>, OrderError> {
        self.stores
            .orders
            .lock(token)
            .await
            .map_err(|e| not_found_or(e, token))
    }
}

fn not_found_or(e: turbo_db::DbError, token: &OrderToken) -> OrderError {
    if e.is_not_found() {
        OrderError::NotFound(token.clone())
    } else {
        e.into()
    }
}

/// Sum of an order's confirmed payments, for display.
pub fn paid_amount(order: &Order, payments: &[Payment]) -> Money {
    let cents = payments
        .iter()
        .filter(|p| p.order_token == order.token && p.status == PaymentStatus::Confirmed)
        .filter(|p| p.currency == order.currency)
        .fold(0i64, |acc, p| acc.saturating_add(p.total.amount_cents));
    Money::new(cents, order.currency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{Cart, NewLineItem};
    use crate::checkout::DeliveryPartitioner;
    use crate::ids::{ProductId, VariantId, WarehouseId};
    use crate::money::Currency;
    use crate::order::{DeliveryGroup, OrderDraft};
    use crate::stock::{StockLevel, StockRequest};

    fn usd(cents: i64) -> Money {
        Money::new(cents, Currency::USD)
    }

    async fn placed_order(stores: &Stores) -> Order {
        stores
            .stock
            .set_level(VariantId::new("mug"), WarehouseId::new("main"), StockLevel::new(5))
            .await
            .unwrap();

        let mut cart = Cart::new(Currency::USD);
        cart.add_item(NewLineItem::physical(
            VariantId::new("mug"),
            ProductId::new("mug"),
            "Mug",
            2,
            usd(1000),
        ))
        .unwrap();
        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let mut draft = OrderDraft::new(None, Some("guest@example.com".into()));
        draft
            .groups
            .push(DeliveryGroup::from_partition(&partitions[0], usd(500), Some("Standard".into())));

        let mut tx = Transaction::begin();
        let requests: Vec<StockRequest> = draft
            .lines()
            .map(|l| StockRequest {
                variant_id: l.variant_id.clone(),
                quantity: l.quantity,
                preferred_warehouse: None,
            })
            .collect();
        let allocations = stores.stock.allocate(&mut tx, &requests).await.unwrap();
        draft.assign_warehouses(&allocations);
        let order = draft.into_order(Currency::USD, None, None).unwrap();
        tx.enlist(stores.orders.insert_locked(order.token.clone(), order.clone()).unwrap());
        tx.commit();
        order
    }

    async fn confirm_payment(stores: &Stores, order: &Order) {
        let mut payment = Payment::for_order(order, "dummy");
        payment.set_status(PaymentStatus::Confirmed);
        stores.payments.insert(payment.id.clone(), payment.clone()).unwrap();
        stores
            .orders
            .update(&order.token, |o| o.payment_ids.push(payment.id.clone()))
            .await
            .unwrap();
    }

    #[test]
    fn test_change_status_appends_history() {
        let mut order = OrderDraft::new(None, None).into_order(Currency::USD, None, None).unwrap();
        OrderStatusMachine::change_status(&mut order, OrderStatus::PaymentPending).unwrap();
        assert_eq!(order.status, OrderStatus::PaymentPending);
        assert_eq!(order.history.len(), 1);
        assert_eq!(order.history[0].status, Some(OrderStatus::PaymentPending));

        let err = OrderStatusMachine::change_status(&mut order, OrderStatus::Shipped).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
        assert_eq!(order.history.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_stock() {
        let stores = Stores::in_memory();
        let order = placed_order(&stores).await;
        assert_eq!(stores.stock.available(&VariantId::new("mug")).await, 3);

        let machine = OrderStatusMachine::new(stores.clone());
        let canceled = machine.cancel_order(&order.token).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(canceled.groups.iter().all(|g| g.status == GroupStatus::Canceled));
        assert_eq!(stores.stock.available(&VariantId::new("mug")).await, 5);

        assert!(machine.cancel_order(&order.token).await.is_err());
    }

    #[tokio::test]
    async fn test_ship_requires_payment() {
        let stores = Stores::in_memory();
        let order = placed_order(&stores).await;
        let machine = OrderStatusMachine::new(stores.clone());
        let group_id = order.groups[0].id.clone();

        let err = machine.ship_group(&order.token, &group_id).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFullyPaid(_)));

        confirm_payment(&stores, &order).await;
        let stored = stores.orders.get(&order.token).await.unwrap();
        assert!(machine.is_fully_paid(&stored).await);
        machine.transition(&order.token, OrderStatus::PaymentPending).await.unwrap();
        machine.transition(&order.token, OrderStatus::FullyPaid).await.unwrap();

        let shipped = machine.ship_group(&order.token, &group_id).await.unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        let level = stores
            .stock
            .level(&VariantId::new("mug"), &WarehouseId::new("main"))
            .await
            .unwrap();
        assert_eq!((level.quantity, level.allocated), (3, 0));

        let err = machine.ship_group(&order.token, &group_id).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFullyPaid(_)));
    }

    #[tokio::test]
    async fn test_add_note() {
        let stores = Stores::in_memory();
        let order = placed_order(&stores).await;
        let machine = OrderStatusMachine::new(stores.clone());
        machine.add_note(&order.token, "Gift wrap").await.unwrap();

        let stored = stores.orders.get(&order.token).await.unwrap();
        assert_eq!(stored.history.last().unwrap().message, "Gift wrap");
        assert!(matches!(
            machine.add_note(&OrderToken::new("missing"), "x").await,
            Err(OrderError::NotFound(_))
        ));
    }

    #[test]
    fn test_paid_amount() {
        let order = OrderDraft::new(None, None).into_order(Currency::USD, None, None).unwrap();
        let mut confirmed = Payment::for_order(&order, "dummy");
        confirmed.total = usd(700);
        confirmed.set_status(PaymentStatus::Confirmed);
        let waiting = Payment::for_order(&order, "dummy");
        assert_eq!(paid_amount(&order, &[confirmed, waiting]), usd(700));
    }
}
