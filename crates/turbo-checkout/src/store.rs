//! The tables and stores the engine works on.

use turbo_cache::{Cache, SessionStore};
use turbo_db::Table;

use crate::cart::Cart;
use crate::checkout::AddressBook;
use crate::config::CheckoutConfig;
use crate::ids::{CartId, OrderToken, PaymentId, UserId};
use crate::order::Order;
use crate::payment::Payment;
use crate::stock::StockLedger;
use crate::voucher::VoucherLedger;

/// Every table of the checkout engine.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct Stores {
    pub sessions: SessionStore,
    pub carts: Table<CartId, Cart>,
    pub address_books: Table<UserId, AddressBook>,
    pub stock: StockLedger,
    pub vouchers: VoucherLedger,
    pub orders: Table<OrderToken, Order>,
    pub payments: Table<PaymentId, Payment>,
    /// The one WAITING payment of an order, if any. The unique key is what
    /// keeps a second waiting attempt from being created.
    pub waiting_payments: Table<OrderToken, PaymentId>,
}

impl Default for Stores {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Stores {
    /// Empty in-memory stores with sessions that never expire.
    pub fn in_memory() -> Self {
        Self::with_sessions(SessionStore::new(Cache::new()))
    }

    /// Empty stores with session expiry taken from the config.
    pub fn from_config(config: &CheckoutConfig) -> Self {
        let sessions = SessionStore::new(Cache::new());
        let sessions = match config.session_ttl() {
            Some(ttl) => sessions.with_ttl(ttl),
            None => sessions,
        };
        Self::with_sessions(sessions)
    }

    fn with_sessions(sessions: SessionStore) -> Self {
        Self {
            sessions,
            carts: Table::new("carts"),
            address_books: Table::new("address_books"),
            stock: StockLedger::new(),
            vouchers: VoucherLedger::new(),
            orders: Table::new("orders"),
            payments: Table::new("payments"),
            waiting_payments: Table::new("waiting_payments"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_config_sets_session_ttl() {
        let config = CheckoutConfig::from_toml_str("session_ttl_secs = 60").unwrap();
        let stores = Stores::from_config(&config);
        assert_eq!(stores.sessions.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(Stores::in_memory().sessions.ttl(), None);
    }

    #[test]
    fn test_clones_share_tables() {
        let stores = Stores::in_memory();
        let clone = stores.clone();
        let cart = Cart::new(Default::default());
        stores.carts.insert(cart.id.clone(), cart.clone()).unwrap();
        assert!(clone.carts.contains(&cart.id));
    }
}
