//! Stock levels per variant and warehouse.

use serde::{Deserialize, Serialize};

use crate::ids::{VariantId, WarehouseId};

/// Where a stock level lives.
///
/// Ordered by variant, then warehouse, which is the order rows are locked in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(variant_id: VariantId, warehouse_id: WarehouseId) -> Self {
        Self {
            variant_id,
            warehouse_id,
        }
    }
}

/// On-hand and allocated quantity of one variant in one warehouse.
///
/// For tracked stock `allocated <= quantity` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockLevel {
    /// Quantity on hand.
    pub quantity: i64,
    /// Quantity allocated to orders that have not shipped.
    pub allocated: i64,
    /// Untracked stock (e.g. digital goods) never runs out.
    pub track_inventory: bool,
    /// Low stock threshold for alerts.
    pub low_stock_threshold: Option<i64>,
}

impl Default for StockLevel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl StockLevel {
    /// Tracked stock with `quantity` on hand.
    pub fn new(quantity: i64) -> Self {
        Self {
            quantity,
            allocated: 0,
            track_inventory: true,
            low_stock_threshold: None,
        }
    }

    /// Stock that is never counted.
    pub fn untracked() -> Self {
        Self {
            track_inventory: false,
            ..Self::new(0)
        }
    }

    pub fn with_low_stock_threshold(mut self, threshold: i64) -> Self {
        self.low_stock_threshold = Some(threshold);
        self
    }

    /// Quantity that can still be allocated.
    pub fn available(&self) -> i64 {
        if !self.track_inventory {
            return i64::MAX;
        }
        (self.quantity - self.allocated).max(0)
    }

    /// Check if a quantity can be allocated.
    pub fn can_allocate(&self, quantity: i64) -> bool {
        quantity > 0 && self.available() >= quantity
    }

    /// Allocate stock to an order. Returns `false`, changing nothing, when
    /// there is not enough.
    pub fn allocate(&mut self, quantity: i64) -> bool {
        if !self.can_allocate(quantity) {
            return false;
        }
        if self.track_inventory {
            self.allocated += quantity;
        }
        true
    }

    /// Give allocated stock back (order canceled).
    pub fn release(&mut self, quantity: i64) {
        if self.track_inventory {
            self.allocated = (self.allocated - quantity).max(0);
        }
    }

    /// Allocated stock left the warehouse (group shipped).
    pub fn fulfil(&mut self, quantity: i64) {
        if self.track_inventory {
            self.allocated = (self.allocated - quantity).max(0);
            self.quantity = (self.quantity - quantity).max(0);
        }
    }

    /// Add stock on hand.
    pub fn restock(&mut self, quantity: i64) {
        if self.track_inventory {
            self.quantity += quantity;
        }
    }

    /// Check if stock is at or below the alert threshold.
    pub fn is_low_stock(&self) -> bool {
        self.track_inventory
            && self
                .low_stock_threshold
                .is_some_and(|threshold| self.available() <= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_within_quantity() {
        let mut level = StockLevel::new(10);
        assert!(level.can_allocate(10));
        assert!(!level.can_allocate(11));
        assert!(!level.can_allocate(0));

        assert!(level.allocate(4));
        assert_eq!(level.available(), 6);
        assert!(!level.allocate(7));
        assert_eq!(level.allocated, 4);
    }

    #[test]
    fn test_release_and_fulfil() {
        let mut level = StockLevel::new(10);
        level.allocate(5);

        level.release(2);
        assert_eq!(level.allocated, 3);

        level.fulfil(3);
        assert_eq!(level.quantity, 7);
        assert_eq!(level.allocated, 0);
        assert_eq!(level.available(), 7);
    }

    #[test]
    fn test_untracked_stock() {
        let mut level = StockLevel::untracked();
        assert!(level.allocate(1000));
        assert_eq!(level.allocated, 0);
        level.fulfil(1000);
        assert_eq!(level.quantity, 0);
        assert!(!level.is_low_stock());
    }

    #[test]
    fn test_low_stock() {
        let mut level = StockLevel::new(5).with_low_stock_threshold(10);
        assert!(level.is_low_stock());

        level.restock(10);
        assert!(!level.is_low_stock());
    }

    #[test]
    fn test_key_order() {
        let mut keys = vec![
            StockKey::new(VariantId::new("b"), WarehouseId::new("1")),
            StockKey::new(VariantId::new("a"), WarehouseId::new("2")),
            StockKey::new(VariantId::new("a"), WarehouseId::new("1")),
        ];
        keys.sort();
        assert_eq!(keys[0], StockKey::new(VariantId::new("a"), WarehouseId::new("1")));
        assert_eq!(keys[2].variant_id, VariantId::new("b"));
    }
}
