//! Transactional in-process row store for TurboCheckout.
//!
//! Rows live in typed [`Table`]s. Every row has its own async lock, so
//! writers only contend when they touch the same key. Multi-row changes are
//! grouped in a [`Transaction`]: locked rows are mutated in place, and if the
//! transaction is dropped before [`Transaction::commit`] every row is put back
//! exactly as it was.
//!
//! # Example
//!
//! ```rust,ignore
//! use turbo_db::{Table, Transaction};
//!
//! let stock: Table<String, i64> = Table::new("stock");
//! stock.insert("sku-1".to_string(), 10)?;
//!
//! let mut tx = Transaction::begin();
//! let mut row = stock.lock(&"sku-1".to_string()).await?;
//! *row -= 3;
//! tx.enlist(row);
//! tx.commit();
//! ```

mod error;
mod table;
mod transaction;

pub use error::DbError;
pub use table::{Key, Peek, RowGuard, Table};
pub use transaction::{Participant, Transaction};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{DbError, Key, Participant, Peek, RowGuard, Table, Transaction};
}
