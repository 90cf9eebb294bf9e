//! Stock levels and the allocation ledger.

mod ledger;
mod level;

pub use ledger::{Allocation, StockLedger, StockRequest};
pub use level::{StockKey, StockLevel};
