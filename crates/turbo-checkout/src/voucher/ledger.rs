//! Voucher storage and redemption.

use async_trait::async_trait;
use chrono::Utc;
use turbo_db::{Table, Transaction};

use crate::cart::Cart;
use crate::error::VoucherError;
use crate::voucher::Voucher;

/// Resolves voucher codes against carts.
#[async_trait]
pub trait VoucherEvaluator: Send + Sync {
    /// Look up a code and check that it applies to the cart.
    async fn resolve(&self, code: &str, cart: &Cart) -> Result<Voucher, VoucherError>;

    /// Resolve a code and count one use as part of `tx`.
    ///
    /// Evaluators without a usage ledger only resolve.
    async fn redeem(
        &self,
        _tx: &mut Transaction,
        code: &str,
        cart: &Cart,
    ) -> Result<Voucher, VoucherError> {
        self.resolve(code, cart).await
    }
}

/// Vouchers keyed by normalized code.
#[derive(Debug, Clone)]
pub struct VoucherLedger {
    table: Table<String, Voucher>,
}

impl Default for VoucherLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

impl VoucherLedger {
    pub fn new() -> Self {
        Self {
            table: Table::new("vouchers"),
        }
    }

    /// Add a voucher. Codes are case-insensitive and must be unique.
    pub fn add(&self, voucher: Voucher) -> Result<(), VoucherError> {
        self.table.insert(normalize(&voucher.code), voucher)?;
        Ok(())
    }

    /// Get a voucher by code.
    pub async fn get(&self, code: &str) -> Option<Voucher> {
        self.table.get(&normalize(code)).await
    }

    /// Redeem a voucher inside a transaction.
    ///
    /// The voucher row stays locked until `tx` settles, so concurrent
    /// redemptions queue up and a voucher with a usage limit is never used
    /// more often than the limit allows.
    #[tracing::instrument(skip(self, tx, cart), fields(tx = tx.id()))]
    pub async fn redeem(
        &self,
        tx: &mut Transaction,
        code: &str,
        cart: &Cart,
    ) -> Result<Voucher, VoucherError> {
        let mut row = self.table.lock(&normalize(code)).await.map_err(|e| {
            if e.is_not_found() {
                VoucherError::NotFound(code.to_string())
            } else {
                e.into()
            }
        })?;
        if let Err(e) = row.check(cart, Utc::now()) {
            tracing::debug!(error = %e, "voucher rejected");
            return Err(e);
        }
        row.record_usage();
        let voucher = Voucher::clone(&row);
        tx.enlist(row);
        Ok(voucher)
    }
}

/// [`VoucherEvaluator`] backed by a [`VoucherLedger`].
#[derive(Debug, Clone, Default)]
pub struct LedgerVoucherEvaluator {
    ledger: VoucherLedger,
}

impl LedgerVoucherEvaluator {
    pub fn new(ledger: VoucherLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &VoucherLedger {
        &self.ledger
    }
}

#[async_trait]
impl VoucherEvaluator for LedgerVoucherEvaluator {
    async fn resolve(&self, code: &str, cart: &Cart) -> Result<Voucher, VoucherError> {
        let voucher = self
            .ledger
            .get(code)
            .await
            .ok_or_else(|| VoucherError::NotFound(code.to_string()))?;
        voucher.check(cart, Utc::now())?;
        Ok(voucher)
    }

    async fn redeem(
        &self,
        tx: &mut Transaction,
        code: &str,
        cart: &Cart,
    ) -> Result<Voucher, VoucherError> {
        self.ledger.redeem(tx, code, cart).await
    }
}
