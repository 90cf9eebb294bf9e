//! Shopping cart module.
//!
//! The cart is the mutable input to checkout; it is cleared when an order is
//! placed from it.

mod cart;

pub use cart::{validate_cart, Cart, LineItem, NewLineItem, MAX_QUANTITY_PER_ITEM};
