//! Customer notifications.

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::order::Order;

/// Sends customer-facing messages about orders.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), NotificationError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), NotificationError> {
        let Some(email) = order.customer_email() else {
            return Err(NotificationError::Delivery(format!(
                "order {} has no contact email",
                order.token
            )));
        };
        tracing::info!(
            order = %order.token,
            email = %email,
            total = %order.total.display(),
            items = order.item_count(),
            "order confirmation sent"
        );
        Ok(())
    }
}
