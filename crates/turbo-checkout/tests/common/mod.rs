//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use turbo_checkout::prelude::*;

pub fn usd(cents: i64) -> Money {
    Money::new(cents, Currency::USD)
}

pub fn address() -> Address {
    Address::new("Ada", "Lovelace", "12 Engine Street", "London", "GB", "N1 9GU")
}

/// Standard shipping to Great Britain: 5.00 plus 1.00 per item.
pub fn shipping() -> Arc<dyn ShippingOptionProvider> {
    Arc::new(RateTableShipping::new().with_rate(
        ShippingMethod::new(ShippingMethodId::new("standard"), "Standard"),
        &["GB"],
        usd(500),
        usd(100),
    ))
}

pub fn engine(stores: &Stores) -> OrderCommitEngine {
    OrderCommitEngine::new(
        stores.clone(),
        shipping(),
        Arc::new(LedgerVoucherEvaluator::new(stores.vouchers.clone())),
        Arc::new(LogNotifier),
    )
}

pub fn mug(quantity: i64) -> NewLineItem {
    NewLineItem::physical(VariantId::new("mug"), ProductId::new("mug"), "Mug", quantity, usd(1200))
}

pub fn poster(quantity: i64) -> NewLineItem {
    NewLineItem::physical(
        VariantId::new("poster"),
        ProductId::new("poster"),
        "Poster",
        quantity,
        usd(800),
    )
}

pub fn ebook() -> NewLineItem {
    NewLineItem::digital(VariantId::new("ebook"), ProductId::new("ebook"), "E-book", 1, usd(900))
}

pub async fn stock(stores: &Stores, variant: &str, level: StockLevel) {
    stores
        .stock
        .set_level(VariantId::new(variant), WarehouseId::new("main"), level)
        .await
        .unwrap();
}

/// Store a cart holding `items`.
pub fn put_cart(stores: &Stores, items: Vec<NewLineItem>) -> Cart {
    let mut cart = Cart::new(Currency::USD);
    for item in items {
        cart.add_item(item).unwrap();
    }
    stores.carts.insert(cart.id.clone(), cart.clone()).unwrap();
    cart
}

/// Walk an anonymous checkout for `cart` through every step and persist it.
pub async fn complete_checkout(stores: &Stores, cart: &Cart) -> CheckoutToken {
    let token = CheckoutToken::generate();
    let mut session = CheckoutSession::open(&stores.sessions, token.clone(), cart.clone(), None, shipping())
        .unwrap();

    let billing = if cart.is_shipping_required() {
        let outcome = session
            .process(
                StepName::ShippingAddress,
                StepRequest::submit(StepForm::ShippingAddress {
                    address: address(),
                    email: Some("guest@example.com".into()),
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue { next: StepName::ShippingMethod });

        let outcome = session
            .process(
                StepName::ShippingMethod,
                StepRequest::submit(StepForm::ShippingMethod {
                    method_id: ShippingMethodId::new("standard"),
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue { next: StepName::Summary });
        BillingChoice::SameAsShipping
    } else {
        BillingChoice::Address(address())
    };

    let outcome = session
        .process(
            StepName::Summary,
            StepRequest::submit(StepForm::Summary {
                billing,
                email: Some("guest@example.com".into()),
                note: None,
            }),
        )
        .await
        .unwrap();
    assert_eq!(outcome, StepOutcome::ReadyForCommit);

    session.persist(&stores.sessions).unwrap();
    token
}

/// Check out `items` and return the commit request for it.
pub async fn ready(stores: &Stores, items: Vec<NewLineItem>) -> CommitRequest {
    let cart = put_cart(stores, items);
    let token = complete_checkout(stores, &cart).await;
    CommitRequest::new(token, cart.id)
}
