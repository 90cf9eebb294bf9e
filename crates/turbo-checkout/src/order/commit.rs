//! Turning a finished checkout into an order.

use std::sync::Arc;

use turbo_cache::SessionClaim;
use turbo_db::{Participant, Transaction};

use crate::cart::{validate_cart, Cart};
use crate::checkout::{
    generate_steps, validate_all, AddressBook, CheckoutStorage, DeliveryPartitioner,
    ShippingOptionProvider, StepContext, StepName, User,
};
use crate::error::{CommerceError, CommitError, FieldErrors, InvalidData};
use crate::ids::{CartId, CheckoutToken};
use crate::notify::NotificationSender;
use crate::order::{Order, OrderDraft};
use crate::stock::StockRequest;
use crate::store::Stores;
use crate::voucher::{AppliedVoucher, VoucherEvaluator};

/// Everything needed to place an order from a checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    pub token: CheckoutToken,
    pub cart_id: CartId,
    pub user: Option<User>,
    pub voucher_code: Option<String>,
    pub tracking_client_id: Option<String>,
}

impl CommitRequest {
    pub fn new(token: CheckoutToken, cart_id: CartId) -> Self {
        Self {
            token,
            cart_id,
            user: None,
            voucher_code: None,
            tracking_client_id: None,
        }
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_voucher(mut self, code: impl Into<String>) -> Self {
        self.voucher_code = Some(code.into());
        self
    }

    pub fn with_tracking_client_id(mut self, id: impl Into<String>) -> Self {
        self.tracking_client_id = Some(id.into());
        self
    }
}

/// A claimed checkout session. Committing keeps it deleted, rolling back
/// puts the stored bytes back untouched.
struct ClaimedSession(SessionClaim);

impl Participant for ClaimedSession {
    fn commit(self: Box<Self>) {
        self.0.release();
    }

    fn rollback(self: Box<Self>) {
        self.0.restore();
    }
}

/// Places orders.
///
/// A commit is one transaction over the checkout session, the cart, the
/// stock rows, the voucher and the new order. Locks are always taken in that
/// order. Any failure leaves every one of them as it was.
#[derive(Clone)]
pub struct OrderCommitEngine {
    stores: Stores,
    shipping: Arc<dyn ShippingOptionProvider>,
    vouchers: Arc<dyn VoucherEvaluator>,
    notifier: Arc<dyn NotificationSender>,
}

impl std::fmt::Debug for OrderCommitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderCommitEngine")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

impl OrderCommitEngine {
    pub fn new(
        stores: Stores,
        shipping: Arc<dyn ShippingOptionProvider>,
        vouchers: Arc<dyn VoucherEvaluator>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            stores,
            shipping,
            vouchers,
            notifier,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Place the order for a checkout.
    ///
    /// Succeeds at most once per checkout token: the session is gone after
    /// a successful commit, so a repeat fails with `SessionNotFound`. A
    /// repeat while the first commit is still running fails with `Conflict`.
    #[tracing::instrument(name = "commit", skip(self, request), fields(checkout = %request.token, cart = %request.cart_id))]
    pub async fn commit(&self, request: CommitRequest) -> Result<Order, CommitError> {
        let mut tx = Transaction::begin();

        let sessions = &self.stores.sessions;
        let Some(entry) = sessions.load(&request.token) else {
            return Err(if sessions.is_claimed(&request.token) {
                CommitError::Conflict
            } else {
                CommitError::SessionNotFound
            });
        };
        let claim = sessions.claim(&request.token, entry.version).map_err(|e| {
            if e.is_not_found() {
                CommitError::SessionNotFound
            } else {
                CommitError::Conflict
            }
        })?;
        let storage = CheckoutStorage::load(claim.blob());
        tx.enlist(ClaimedSession(claim));

        let mut cart = self.stores.carts.lock(&request.cart_id).await.map_err(|e| {
            if e.is_not_found() {
                CommitError::EmptyCart
            } else {
                e.into()
            }
        })?;
        validate_cart(&cart).map_err(cart_error)?;
        let partitions = DeliveryPartitioner::partition(&cart).map_err(cart_error)?;

        let ctx = StepContext {
            cart: &cart,
            partitions: &partitions,
            user: request.user.as_ref(),
            shipping: self.shipping.as_ref(),
        };
        let steps = generate_steps(&cart, &storage);
        validate_all(&steps, &ctx).await?;

        let mut draft = OrderDraft::new(request.user.as_ref(), storage.email.clone());
        for step in &steps {
            step.add_to_order(&ctx, &mut draft).await?;
        }

        let requests: Vec<StockRequest> = draft
            .lines()
            .map(|line| StockRequest {
                variant_id: line.variant_id.clone(),
                quantity: line.quantity,
                preferred_warehouse: line.warehouse_id.clone(),
            })
            .collect();
        let allocations = self.stores.stock.allocate(&mut tx, &requests).await?;
        draft.assign_warehouses(&allocations);

        let voucher = match request.voucher_code.as_deref() {
            Some(code) => Some(self.apply_voucher(&mut tx, code, &cart, &draft).await?),
            None => None,
        };

        if let (Some(user), Some(address)) = (&request.user, &draft.save_to_address_book) {
            let mut book = self
                .stores
                .address_books
                .lock_or_insert_with(&user.id, AddressBook::new)
                .await?;
            book.store_shipping_default(address);
            tx.enlist(book);
        }

        let order = draft.into_order(cart.currency, voucher, request.tracking_client_id.clone())?;
        cart.clear();
        tx.enlist(cart);
        let row = self.stores.orders.insert_locked(order.token.clone(), order.clone())?;
        tx.enlist(row);

        tx.commit();
        tracing::info!(
            order = %order.token,
            groups = order.groups.len(),
            total = %order.total.display(),
            "order placed"
        );

        self.after_commit(&order).await;
        Ok(order)
    }

    async fn apply_voucher(
        &self,
        tx: &mut Transaction,
        code: &str,
        cart: &Cart,
        draft: &OrderDraft,
    ) -> Result<AppliedVoucher, CommitError> {
        let voucher = self.vouchers.redeem(tx, code, cart).await?;
        let subtotal = draft.subtotal(cart.currency)?;
        let shipping_total = draft.shipping_total(cart.currency)?;
        let amount = voucher.discount_for(&subtotal, &shipping_total);
        Ok(AppliedVoucher::new(&voucher, amount))
    }

    /// Best-effort follow-up once the order exists.
    async fn after_commit(&self, order: &Order) {
        if let Err(e) = self
            .stores
            .orders
            .update(&order.token, |o| o.push_history(None, "Order placed"))
            .await
        {
            tracing::warn!(order = %order.token, error = %e, "could not record order history");
        }
        if let Err(e) = self.notifier.send_order_confirmation(order).await {
            tracing::warn!(order = %order.token, error = %e, "order confirmation not sent");
        }
    }
}

/// A cart that stopped being orderable since the checkout began.
fn cart_error(e: CommerceError) -> CommitError {
    match e {
        CommerceError::EmptyCart => CommitError::EmptyCart,
        CommerceError::InvalidQuantity(_) | CommerceError::QuantityExceedsLimit(..) => {
            CommitError::Invalid(InvalidData::contradictory(
                StepName::Summary,
                FieldErrors::single("cart", e.to_string()),
            ))
        }
        other => other.into(),
    }
}
