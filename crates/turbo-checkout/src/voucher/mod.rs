//! Voucher codes and their usage ledger.

mod ledger;
mod voucher;

pub use ledger::{LedgerVoucherEvaluator, VoucherEvaluator, VoucherLedger};
pub use voucher::{AppliedVoucher, Voucher, VoucherCondition, VoucherValue};
