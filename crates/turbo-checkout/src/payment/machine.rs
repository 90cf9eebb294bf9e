//! Payment attempts and their status changes.

use std::time::Duration;

use turbo_db::{RowGuard, Transaction};

use crate::config::CheckoutConfig;
use crate::error::{GatewayError, PaymentError};
use crate::ids::{OrderToken, PaymentId};
use crate::money::Money;
use crate::order::{Order, OrderStatus, OrderStatusMachine};
use crate::payment::{GatewayRegistry, GatewayResponse, Payment, PaymentGatewayClient, PaymentStatus};
use crate::store::Stores;

/// A payment attempt and what the gateway asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedPayment {
    pub payment: Payment,
    pub outcome: GatewayResponse,
}

/// Drives payments through the gateway and their status graph.
///
/// Every change to a payment first locks its order, then the payment. The
/// order's waiting slot in [`Stores::waiting_payments`] is only touched
/// under the order lock, which is what keeps a second waiting attempt from
/// being created.
#[derive(Debug, Clone)]
pub struct PaymentStateMachine {
    stores: Stores,
    gateways: GatewayRegistry,
    orders: OrderStatusMachine,
    timeout: Duration,
}

impl PaymentStateMachine {
    pub fn new(stores: Stores, gateways: GatewayRegistry, timeout: Duration) -> Self {
        Self {
            orders: OrderStatusMachine::new(stores.clone()),
            stores,
            gateways,
            timeout,
        }
    }

    /// Build a machine with the gateway timeout from the config.
    pub fn from_config(stores: Stores, gateways: GatewayRegistry, config: &CheckoutConfig) -> Self {
        Self::new(stores, gateways, config.gateway_timeout())
    }

    /// Start paying for an order with the given gateway.
    ///
    /// If the order already has a waiting payment, that payment is charged
    /// again instead of creating another one.
    #[tracing::instrument(skip(self), fields(order = %token))]
    pub async fn start_payment(
        &self,
        token: &OrderToken,
        variant: &str,
    ) -> Result<StartedPayment, PaymentError> {
        if !self.gateways.contains(variant) {
            return Err(PaymentError::UnknownGateway(variant.to_string()));
        }

        let payment = {
            let mut tx = Transaction::begin();
            let mut order = self.lock_order(token).await?;
            if !matches!(order.status, OrderStatus::New | OrderStatus::PaymentPending) {
                return Err(PaymentError::OrderNotPayable(order.status));
            }

            match self.waiting_payment(token).await {
                Some(existing) => {
                    tracing::debug!(payment = %existing.id, "reusing waiting payment");
                    existing
                }
                None => {
                    if order.status == OrderStatus::New {
                        OrderStatusMachine::change_status(&mut order, OrderStatus::PaymentPending)?;
                    }
                    let payment = Payment::for_order(&order, variant);
                    order.payment_ids.push(payment.id.clone());
                    tx.enlist(self.stores.payments.insert_locked(payment.id.clone(), payment.clone())?);
                    tx.enlist(
                        self.stores
                            .waiting_payments
                            .insert_locked(token.clone(), payment.id.clone())?,
                    );
                    tx.enlist(order);
                    tx.commit();
                    tracing::info!(payment = %payment.id, variant, "payment started");
                    payment
                }
            }
        };

        let client = self.client(&payment.variant)?;
        match self.call(client.charge(&payment)).await {
            Ok(outcome) => Ok(StartedPayment { payment, outcome }),
            Err(e) => {
                tracing::error!(payment = %payment.id, variant = %payment.variant, error = %e, "gateway charge failed");
                if let Err(e) = self.change_status(&payment.id, PaymentStatus::Error, None).await {
                    tracing::warn!(payment = %payment.id, error = %e, "could not mark payment as failed");
                }
                Err(PaymentError::GatewayUnavailable {
                    payment_id: payment.id,
                })
            }
        }
    }

    /// Drop the order's waiting payment attempt.
    #[tracing::instrument(skip(self), fields(order = %token))]
    pub async fn cancel_payment(&self, token: &OrderToken) -> Result<Payment, PaymentError> {
        let mut tx = Transaction::begin();
        let mut order = self.lock_order(token).await?;
        let mut slot = self.stores.waiting_payments.lock(token).await.map_err(|e| {
            if e.is_not_found() {
                PaymentError::NoWaitingPayment(token.clone())
            } else {
                e.into()
            }
        })?;
        let mut payment = self.lock_payment(&slot).await?;
        if !payment.is_waiting() {
            return Err(PaymentError::NoWaitingPayment(token.clone()));
        }

        let canceled = Payment::clone(&payment);
        payment.delete();
        slot.delete();
        order.payment_ids.retain(|id| id != &canceled.id);
        order.push_history(None, format!("Payment {} canceled", canceled.id));

        tx.enlist(order);
        tx.enlist(slot);
        tx.enlist(payment);
        tx.commit();
        tracing::info!(payment = %canceled.id, "payment canceled");
        Ok(canceled)
    }

    /// Apply a gateway status update.
    ///
    /// A confirmed payment that covers the order total moves the order to
    /// fully paid in the same transaction.
    #[tracing::instrument(skip(self, transaction_id), fields(payment = %payment_id, to = %status))]
    pub async fn change_status(
        &self,
        payment_id: &PaymentId,
        status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Result<Payment, PaymentError> {
        let token = self
            .stores
            .payments
            .get(payment_id)
            .await
            .ok_or_else(|| PaymentError::NotFound(payment_id.clone()))?
            .order_token;

        let mut tx = Transaction::begin();
        let mut order = self.lock_order(&token).await?;
        let mut payment = self.lock_payment(payment_id).await?;
        if !payment.status.can_transition_to(status) {
            return Err(PaymentError::InvalidTransition {
                from: payment.status,
                to: status,
            });
        }

        let was_waiting = payment.is_waiting();
        payment.set_status(status);
        if transaction_id.is_some() {
            payment.transaction_id = transaction_id;
        }

        if was_waiting {
            match self.stores.waiting_payments.lock(&token).await {
                Ok(mut slot) if *slot == *payment_id => {
                    slot.delete();
                    tx.enlist(slot);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        if status == PaymentStatus::Confirmed {
            let order_status = order.status;
            let covered = order_status == OrderStatus::PaymentPending
                && self.orders.is_fully_paid_with(&order, &payment).await;
            match order_status {
                OrderStatus::PaymentPending if covered => {
                    OrderStatusMachine::change_status(&mut order, OrderStatus::FullyPaid)?;
                }
                OrderStatus::Canceled => {
                    tracing::warn!(order = %token, "payment confirmed on a canceled order");
                    order.push_history(
                        None,
                        format!("Payment {} confirmed after cancellation, refund needed", payment_id),
                    );
                }
                _ => {}
            }
        }

        let updated = Payment::clone(&payment);
        tx.enlist(order);
        tx.enlist(payment);
        tx.commit();
        tracing::info!(order = %token, "payment status changed");
        Ok(updated)
    }

    /// Refund a captured (preauthorized or confirmed) payment through its
    /// gateway.
    ///
    /// A gateway failure leaves the payment captured.
    #[tracing::instrument(skip(self), fields(payment = %payment_id))]
    pub async fn refund(&self, payment_id: &PaymentId, amount: Money) -> Result<Payment, PaymentError> {
        let payment = self
            .stores
            .payments
            .get(payment_id)
            .await
            .ok_or_else(|| PaymentError::NotFound(payment_id.clone()))?;
        if !payment.status.is_captured() {
            return Err(PaymentError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::Refunded,
            });
        }
        if amount.currency != payment.currency
            || !amount.is_positive()
            || amount.amount_cents > payment.total.amount_cents
        {
            return Err(PaymentError::InvalidRefund(amount.display()));
        }

        let client = self.client(&payment.variant)?;
        if let Err(e) = self.call(client.refund(&payment, amount)).await {
            tracing::error!(variant = %payment.variant, error = %e, "gateway refund failed");
            return Err(PaymentError::GatewayUnavailable {
                payment_id: payment_id.clone(),
            });
        }
        self.change_status(payment_id, PaymentStatus::Refunded, None).await
    }

    /// All payment attempts of an order, oldest first.
    pub async fn payments_for(&self, token: &OrderToken) -> Result<Vec<Payment>, PaymentError> {
        let order = self
            .stores
            .orders
            .get(token)
            .await
            .ok_or_else(|| PaymentError::OrderNotFound(token.clone()))?;
        let mut payments = Vec::with_capacity(order.payment_ids.len());
        for id in &order.payment_ids {
            if let Some(payment) = self.stores.payments.get(id).await {
                payments.push(payment);
            }
        }
        Ok(payments)
    }

    /// Run a gateway call under the configured timeout.
    async fn call<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }

    fn client(&self, variant: &str) -> Result<std::sync::Arc<dyn PaymentGatewayClient>, PaymentError> {
        self.gateways
            .get(variant)
            .ok_or_else(|| PaymentError::UnknownGateway(variant.to_string()))
    }

    /// The waiting payment of an order. Callers hold the order row.
    async fn waiting_payment(&self, token: &OrderToken) -> Option<Payment> {
        let id = self.stores.waiting_payments.get(token).await?;
        self.stores
            .payments
            .get(&id)
            .await
            .filter(Payment::is_waiting)
    }

    async fn lock_order(&self, token: &OrderToken) -> Result<RowGuard<OrderToken, Order>, PaymentError> {
        self.stores.orders.lock(token).await.map_err(|e| {
            if e.is_not_found() {
                PaymentError::OrderNotFound(token.clone())
            } else {
                e.into()
            }
        })
    }

    async fn lock_payment(&self, id: &PaymentId) -> Result<RowGuard<PaymentId, Payment>, PaymentError> {
        self.stores.payments.lock(id).await.map_err(|e| {
            if e.is_not_found() {
                PaymentError::NotFound(id.clone())
            } else {
                e.into()
            }
        })
    }
}
