//! The stock ledger: allocation, release and fulfilment.
//!
//! Every change happens on locked rows enlisted in a caller's
//! [`Transaction`], so stock moves together with the order that caused it.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use turbo_db::{Peek, RowGuard, Table, Transaction};

use crate::error::StockError;
use crate::ids::{VariantId, WarehouseId};
use crate::stock::{StockKey, StockLevel};

/// Stock wanted for one order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRequest {
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Warehouse to try first.
    pub preferred_warehouse: Option<WarehouseId>,
}

/// Stock set aside for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

impl Allocation {
    fn key(&self) -> StockKey {
        StockKey::new(self.variant_id.clone(), self.warehouse_id.clone())
    }
}

/// Stock levels for every variant and warehouse.
#[derive(Debug, Clone)]
pub struct StockLedger {
    table: Table<StockKey, StockLevel>,
}

impl Default for StockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl StockLedger {
    pub fn new() -> Self {
        Self {
            table: Table::new("stock"),
        }
    }

    /// Set the stock level of a variant in a warehouse, replacing any
    /// existing level.
    pub async fn set_level(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        level: StockLevel,
    ) -> Result<(), StockError> {
        let key = StockKey::new(variant_id, warehouse_id);
        let mut row = self.table.lock_or_insert_with(&key, StockLevel::default).await?;
        *row = level;
        let mut tx = Transaction::begin();
        tx.enlist(row);
        tx.commit();
        Ok(())
    }

    /// Current level of a variant in a warehouse.
    pub async fn level(&self, variant_id: &VariantId, warehouse_id: &WarehouseId) -> Option<StockLevel> {
        self.table
            .get(&StockKey::new(variant_id.clone(), warehouse_id.clone()))
            .await
    }

    /// Quantity of a variant available across all warehouses.
    pub async fn available(&self, variant_id: &VariantId) -> i64 {
        let mut total: i64 = 0;
        for key in self.keys_for([variant_id]) {
            if let Some(level) = self.table.get(&key).await {
                total = total.saturating_add(level.available());
            }
        }
        total
    }

    /// Add stock on hand.
    pub async fn restock(
        &self,
        variant_id: &VariantId,
        warehouse_id: &WarehouseId,
        quantity: i64,
    ) -> Result<(), StockError> {
        if quantity <= 0 {
            return Err(StockError::InvalidQuantity(quantity));
        }
        let key = StockKey::new(variant_id.clone(), warehouse_id.clone());
        self.table
            .update(&key, |level| level.restock(quantity))
            .await
            .map_err(|e| self.missing_or(e, &key))
    }

    /// Allocate stock for every request, or for none of them.
    ///
    /// All rows of the requested variants are locked in key order before
    /// anything is decided, so two allocations competing for the same stock
    /// are serialized and never oversell. The locked rows are enlisted in
    /// `tx`; dropping `tx` undoes the allocation.
    #[tracing::instrument(skip(self, tx, requests), fields(tx = tx.id(), lines = requests.len()))]
    pub async fn allocate(
        &self,
        tx: &mut Transaction,
        requests: &[StockRequest],
    ) -> Result<Vec<Allocation>, StockError> {
        if let Some(bad) = requests.iter().find(|r| r.quantity <= 0) {
            return Err(StockError::InvalidQuantity(bad.quantity));
        }

        let keys = self.keys_for(requests.iter().map(|r| &r.variant_id));
        let mut before = Snapshot::default();
        for key in &keys {
            match self.table.peek(key) {
                Peek::Committed(level) => {
                    before.available.insert(key.clone(), level.available());
                }
                Peek::Held => {
                    before.contended.insert(key.variant_id.clone());
                }
                Peek::Missing => {}
            }
        }

        let mut rows = self.table.lock_all(keys).await?;
        let mut allocations = Vec::with_capacity(requests.len());
        for request in requests {
            let Some(index) = pick_row(&rows, request) else {
                return Err(shortage(&rows, &before, request));
            };
            let row = &mut rows[index];
            row.allocate(request.quantity);
            allocations.push(Allocation {
                variant_id: request.variant_id.clone(),
                warehouse_id: row.key().warehouse_id.clone(),
                quantity: request.quantity,
            });
        }

        tracing::debug!(allocations = allocations.len(), "stock allocated");
        tx.enlist_all(rows);
        Ok(allocations)
    }

    /// Return allocated stock, e.g. when an order is canceled.
    pub async fn release(&self, tx: &mut Transaction, allocations: &[Allocation]) -> Result<(), StockError> {
        self.apply(tx, allocations, StockLevel::release).await
    }

    /// Take allocated stock off hand once it has shipped.
    pub async fn fulfil(&self, tx: &mut Transaction, allocations: &[Allocation]) -> Result<(), StockError> {
        self.apply(tx, allocations, StockLevel::fulfil).await
    }

    async fn apply(
        &self,
        tx: &mut Transaction,
        allocations: &[Allocation],
        change: fn(&mut StockLevel, i64),
    ) -> Result<(), StockError> {
        let mut rows = Vec::with_capacity(allocations.len());
        let keys: BTreeSet<StockKey> = allocations.iter().map(Allocation::key).collect();
        for key in keys {
            let row = self.table.lock(&key).await.map_err(|e| self.missing_or(e, &key))?;
            rows.push(row);
        }
        for allocation in allocations {
            let key = allocation.key();
            if let Some(row) = rows.iter_mut().find(|row| row.key() == &key) {
                change(&mut **row, allocation.quantity);
            }
        }
        tx.enlist_all(rows);
        Ok(())
    }

    /// Keys of every row holding one of the variants, in lock order.
    fn keys_for<'a>(&self, variants: impl IntoIterator<Item = &'a VariantId>) -> Vec<StockKey> {
        let wanted: BTreeSet<&VariantId> = variants.into_iter().collect();
        self.table
            .keys()
            .into_iter()
            .filter(|key| wanted.contains(&key.variant_id))
            .collect()
    }

    fn missing_or(&self, e: turbo_db::DbError, key: &StockKey) -> StockError {
        if e.is_not_found() {
            StockError::NotFound {
                variant_id: key.variant_id.clone(),
                warehouse_id: key.warehouse_id.clone(),
            }
        } else {
            e.into()
        }
    }
}

/// The row to allocate a request from: the preferred warehouse if it has
/// enough, otherwise the first warehouse that does.
fn pick_row(rows: &[RowGuard<StockKey, StockLevel>], request: &StockRequest) -> Option<usize> {
    let candidates = || {
        rows.iter()
            .enumerate()
            .filter(|(_, row)| row.key().variant_id == request.variant_id)
            .filter(|(_, row)| row.can_allocate(request.quantity))
    };
    request
        .preferred_warehouse
        .as_ref()
        .and_then(|preferred| {
            candidates()
                .find(|(_, row)| &row.key().warehouse_id == preferred)
                .map(|(i, _)| i)
        })
        .or_else(|| candidates().next().map(|(i, _)| i))
}

/// Stock as seen before any row was locked.
#[derive(Debug, Default)]
struct Snapshot {
    available: HashMap<StockKey, i64>,
    /// Variants with a row another transaction was holding.
    contended: BTreeSet<VariantId>,
}

impl Snapshot {
    /// Whether a shortage for `request` means another allocation got there
    /// first: a row was held at snapshot time, or there was enough before
    /// the locks were taken.
    fn lost_race(&self, request: &StockRequest) -> bool {
        self.contended.contains(&request.variant_id)
            || self
                .available
                .iter()
                .any(|(key, available)| key.variant_id == request.variant_id && *available >= request.quantity)
    }
}

/// Build the shortage error for a request, telling a lost race apart from
/// plain lack of stock.
fn shortage(
    rows: &[RowGuard<StockKey, StockLevel>],
    before: &Snapshot,
    request: &StockRequest,
) -> StockError {
    let available = rows
        .iter()
        .filter(|row| row.key().variant_id == request.variant_id)
        .map(|row| row.available())
        .max()
        .unwrap_or(0);
    let conflict = before.lost_race(request);
    tracing::warn!(
        variant = %request.variant_id,
        requested = request.quantity,
        available,
        conflict,
        "insufficient stock"
    );
    StockError::Insufficient {
        variant_id: request.variant_id.clone(),
        requested: request.quantity,
        available,
        conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mug() -> VariantId {
        VariantId::new("mug")
    }

    fn request(variant: VariantId, quantity: i64) -> StockRequest {
        StockRequest {
            variant_id: variant,
            quantity,
            preferred_warehouse: None,
        }
    }

    async fn ledger() -> StockLedger {
        let ledger = StockLedger::new();
        ledger
            .set_level(mug(), WarehouseId::new("a"), StockLevel::new(2))
            .await
            .unwrap();
        ledger
            .set_level(mug(), WarehouseId::new("b"), StockLevel::new(5))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_allocate_first_warehouse_with_enough() {
        let ledger = ledger().await;
        let mut tx = Transaction::begin();
        let allocations = ledger.allocate(&mut tx, &[request(mug(), 3)]).await.unwrap();
        tx.commit();

        assert_eq!(allocations[0].warehouse_id, WarehouseId::new("b"));
        let level = ledger.level(&mug(), &WarehouseId::new("b")).await.unwrap();
        assert_eq!(level.allocated, 3);
        assert_eq!(ledger.available(&mug()).await, 4);
    }

    #[tokio::test]
    async fn test_allocate_preferred_warehouse() {
        let ledger = ledger().await;
        let mut tx = Transaction::begin();
        let mut req = request(mug(), 1);
        req.preferred_warehouse = Some(WarehouseId::new("b"));
        let allocations = ledger.allocate(&mut tx, &[req]).await.unwrap();
        assert_eq!(allocations[0].warehouse_id, WarehouseId::new("b"));
    }

    #[tokio::test]
    async fn test_allocation_is_all_or_nothing() {
        let ledger = ledger().await;
        let tee = VariantId::new("tee");
        ledger
            .set_level(tee.clone(), WarehouseId::new("a"), StockLevel::new(1))
            .await
            .unwrap();

        let mut tx = Transaction::begin();
        let err = ledger
            .allocate(&mut tx, &[request(mug(), 2), request(tee.clone(), 2)])
            .await
            .unwrap_err();
        drop(tx);

        assert!(matches!(
            err,
            StockError::Insufficient {
                requested: 2,
                available: 1,
                conflict: false,
                ..
            }
        ));
        assert_eq!(ledger.available(&mug()).await, 7);
        assert_eq!(ledger.available(&tee).await, 1);
    }

    #[tokio::test]
    async fn test_losing_a_race_is_flagged_as_conflict() {
        let ledger = StockLedger::new();
        ledger
            .set_level(mug(), WarehouseId::new("a"), StockLevel::new(1))
            .await
            .unwrap();

        let mut winner = Transaction::begin();
        ledger.allocate(&mut winner, &[request(mug(), 1)]).await.unwrap();

        let loser = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let mut tx = Transaction::begin();
                ledger.allocate(&mut tx, &[request(mug(), 1)]).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        winner.commit();

        let err = loser.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StockError::Insufficient {
                available: 0,
                conflict: true,
                ..
            }
        ));
        assert_eq!(ledger.available(&mug()).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_variant_is_unavailable() {
        let ledger = ledger().await;
        let mut tx = Transaction::begin();
        let err = ledger
            .allocate(&mut tx, &[request(VariantId::new("ghost"), 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::Insufficient { available: 0, .. }));
    }

    #[tokio::test]
    async fn test_rollback_undoes_allocation() {
        let ledger = ledger().await;
        {
            let mut tx = Transaction::begin();
            ledger.allocate(&mut tx, &[request(mug(), 5)]).await.unwrap();
        }
        assert_eq!(ledger.available(&mug()).await, 7);
    }

    #[tokio::test]
    async fn test_release_and_fulfil() {
        let ledger = ledger().await;
        let mut tx = Transaction::begin();
        let allocations = ledger.allocate(&mut tx, &[request(mug(), 2)]).await.unwrap();
        tx.commit();

        let mut tx = Transaction::begin();
        ledger.fulfil(&mut tx, &allocations).await.unwrap();
        tx.commit();
        let level = ledger.level(&mug(), &WarehouseId::new("a")).await.unwrap();
        assert_eq!((level.quantity, level.allocated), (0, 0));

        let mut tx = Transaction::begin();
        let allocations = ledger.allocate(&mut tx, &[request(mug(), 1)]).await.unwrap();
        tx.commit();
        let mut tx = Transaction::begin();
        ledger.release(&mut tx, &allocations).await.unwrap();
        tx.commit();
        assert_eq!(ledger.available(&mug()).await, 5);
    }

    #[tokio::test]
    async fn test_restock() {
        let ledger = ledger().await;
        ledger.restock(&mug(), &WarehouseId::new("a"), 3).await.unwrap();
        assert_eq!(ledger.available(&mug()).await, 10);
        assert!(matches!(
            ledger.restock(&mug(), &WarehouseId::new("zz"), 1).await,
            Err(StockError::NotFound { .. })
        ));
        assert!(ledger.restock(&mug(), &WarehouseId::new("a"), 0).await.is_err());
    }
}
