//! Checkout-to-order engine for TurboCheckout.
//!
//! This crate takes a shopping cart through a multi-step checkout and turns
//! it, exactly once, into an order:
//!
//! - **Cart**: line items, quantity limits, the `validate_cart` gate
//! - **Checkout**: step chain, delivery partitions, versioned session storage
//! - **Stock** and **vouchers**: ledgers reserved inside the commit transaction
//! - **Order**: the commit engine and the order status machine
//! - **Payment**: gateway clients and the payment status machine
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use turbo_checkout::prelude::*;
//!
//! let stores = Stores::in_memory();
//! let engine = OrderCommitEngine::new(
//!     stores.clone(),
//!     Arc::new(RateTableShipping::new()),
//!     Arc::new(LedgerVoucherEvaluator::new(stores.vouchers.clone())),
//!     Arc::new(LogNotifier),
//! );
//!
//! let order = engine.commit(CommitRequest::new(token, cart_id)).await?;
//! println!("Total: {}", order.total.display());
//! ```

pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod ids;
pub mod money;
pub mod notify;
pub mod order;
pub mod payment;
pub mod stock;
pub mod store;
pub mod voucher;

pub use config::CheckoutConfig;
pub use error::{CommerceError, CommitError, CommitErrorKind, OrderError, PaymentError};
pub use ids::*;
pub use money::{Currency, Money};
pub use store::Stores;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::CheckoutConfig;
    pub use crate::error::{
        CommerceError, CommitError, CommitErrorKind, FieldErrors, InvalidData, OrderError,
        PaymentError, StockError, VoucherError,
    };
    pub use crate::ids::*;
    pub use crate::money::{Currency, Money};
    pub use crate::store::Stores;

    // Cart
    pub use crate::cart::{validate_cart, Cart, LineItem, NewLineItem};

    // Checkout
    pub use crate::checkout::{
        Address, BillingChoice, CheckoutSession, CheckoutStep, CheckoutStorage,
        DeliveryPartitioner, Email, RateTableShipping, ShippingMethod, ShippingOptionProvider, StepForm, StepName,
        StepOutcome, StepRequest, User,
    };

    // Ledgers
    pub use crate::stock::{StockLedger, StockLevel};
    pub use crate::voucher::{LedgerVoucherEvaluator, Voucher, VoucherEvaluator};

    // Orders and payments
    pub use crate::notify::{LogNotifier, NotificationSender};
    pub use crate::order::{
        CommitRequest, Order, OrderCommitEngine, OrderStatus, OrderStatusMachine,
    };
    pub use crate::payment::{
        GatewayRegistry, GatewayResponse, Payment, PaymentGatewayClient, PaymentStateMachine,
        PaymentStatus, StartedPayment,
    };
}
