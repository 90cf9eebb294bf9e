//! Cart and line item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommerceError;
use crate::ids::{CartId, LineItemId, ProductId, VariantId, WarehouseId};
use crate::money::{Currency, Money};

/// Default maximum quantity allowed per line item.
pub const MAX_QUANTITY_PER_ITEM: i64 = 9999;

/// A shopping cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cart {
    /// Unique cart identifier.
    pub id: CartId,
    /// Items in the cart.
    pub items: Vec<LineItem>,
    /// Cart currency.
    pub currency: Currency,
    /// Largest quantity accepted on a single line.
    #[serde(default = "default_max_quantity")]
    pub max_quantity: i64,
    /// When the cart was created.
    pub created_at: DateTime<Utc>,
    /// When the cart was last changed.
    pub updated_at: DateTime<Utc>,
}

fn default_max_quantity() -> i64 {
    MAX_QUANTITY_PER_ITEM
}

impl Cart {
    /// Create a new empty cart.
    pub fn new(currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: CartId::generate(),
            items: Vec::new(),
            currency,
            max_quantity: MAX_QUANTITY_PER_ITEM,
            created_at: now,
            updated_at: now,
        }
    }

    /// Use a different per-line quantity limit.
    pub fn with_max_quantity(mut self, max_quantity: i64) -> Self {
        self.max_quantity = max_quantity;
        self
    }

    /// Add an item to the cart.
    ///
    /// Lines for the same variant are merged. Returns an error if:
    /// - Quantity is not positive
    /// - The line would exceed the cart's quantity limit
    /// - The price is in another currency, or arithmetic overflows
    pub fn add_item(&mut self, item: NewLineItem) -> Result<LineItemId, CommerceError> {
        if item.quantity <= 0 {
            return Err(CommerceError::InvalidQuantity(item.quantity));
        }
        if item.unit_price.currency != self.currency {
            return Err(CommerceError::CurrencyMismatch {
                expected: self.currency.code().to_string(),
                got: item.unit_price.currency.code().to_string(),
            });
        }

        let max = self.max_quantity;
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.variant_id == item.variant_id)
        {
            let new_quantity = existing
                .quantity
                .checked_add(item.quantity)
                .ok_or(CommerceError::Overflow)?;
            if new_quantity > max {
                return Err(CommerceError::QuantityExceedsLimit(new_quantity, max));
            }

            existing.quantity = new_quantity;
            existing.update_total()?;
            let id = existing.id.clone();
            self.touch();
            return Ok(id);
        }

        if item.quantity > max {
            return Err(CommerceError::QuantityExceedsLimit(item.quantity, max));
        }

        let line = LineItem::from_new(item)?;
        let id = line.id.clone();
        self.items.push(line);
        self.touch();
        Ok(id)
    }

    /// Update item quantity.
    ///
    /// If quantity is <= 0, removes the item.
    pub fn update_quantity(
        &mut self,
        line_item_id: &LineItemId,
        quantity: i64,
    ) -> Result<(), CommerceError> {
        if quantity <= 0 {
            return if self.remove_item(line_item_id) {
                Ok(())
            } else {
                Err(CommerceError::ItemNotInCart(line_item_id.to_string()))
            };
        }

        if quantity > self.max_quantity {
            return Err(CommerceError::QuantityExceedsLimit(quantity, self.max_quantity));
        }

        let item = self
            .items
            .iter_mut()
            .find(|i| &i.id == line_item_id)
            .ok_or_else(|| CommerceError::ItemNotInCart(line_item_id.to_string()))?;
        item.quantity = quantity;
        item.update_total()?;
        self.touch();
        Ok(())
    }

    /// Remove an item from the cart.
    pub fn remove_item(&mut self, line_item_id: &LineItemId) -> bool {
        let len_before = self.items.len();
        self.items.retain(|i| &i.id != line_item_id);
        let removed = self.items.len() < len_before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Clear all items from the cart.
    pub fn clear(&mut self) {
        self.items.clear();
        self.touch();
    }

    /// Get total item count (sum of quantities).
    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Check if cart is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether any line needs to be shipped.
    pub fn is_shipping_required(&self) -> bool {
        self.items.iter().any(|i| i.requires_shipping)
    }

    /// Get an item by ID.
    pub fn get_item(&self, line_item_id: &LineItemId) -> Option<&LineItem> {
        self.items.iter().find(|i| &i.id == line_item_id)
    }

    /// Sum of line totals.
    pub fn subtotal(&self) -> Result<Money, CommerceError> {
        Money::try_sum(self.items.iter().map(|i| &i.total_price), self.currency)
            .ok_or(CommerceError::Overflow)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Entry gate for checkout: the cart must have at least one line, and every
/// line a quantity within the cart's limit.
pub fn validate_cart(cart: &Cart) -> Result<(), CommerceError> {
    if cart.is_empty() {
        return Err(CommerceError::EmptyCart);
    }
    for item in &cart.items {
        if item.quantity <= 0 {
            return Err(CommerceError::InvalidQuantity(item.quantity));
        }
        if item.quantity > cart.max_quantity {
            return Err(CommerceError::QuantityExceedsLimit(
                item.quantity,
                cart.max_quantity,
            ));
        }
    }
    Ok(())
}

/// An item to put in a cart.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub product_name: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
    pub requires_shipping: bool,
    pub warehouse_id: Option<WarehouseId>,
}

impl NewLineItem {
    /// A physical item that has to be shipped.
    pub fn physical(
        variant_id: VariantId,
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: i64,
        unit_price: Money,
    ) -> Self {
        Self {
            variant_id,
            product_id,
            product_name: product_name.into(),
            sku: None,
            quantity,
            unit_price,
            requires_shipping: true,
            warehouse_id: None,
        }
    }

    /// A digital item that needs no shipping.
    pub fn digital(
        variant_id: VariantId,
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: i64,
        unit_price: Money,
    ) -> Self {
        Self {
            requires_shipping: false,
            ..Self::physical(variant_id, product_id, product_name, quantity, unit_price)
        }
    }

    /// Set the SKU.
    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    /// Prefer allocating stock from this warehouse.
    pub fn with_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }
}

/// A line item in the cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    /// Unique line item identifier.
    pub id: LineItemId,
    /// Variant being purchased.
    pub variant_id: VariantId,
    /// Product ID.
    pub product_id: ProductId,
    /// Product name (denormalized for display).
    pub product_name: String,
    /// Stock keeping unit.
    pub sku: Option<String>,
    /// Quantity.
    pub quantity: i64,
    /// Unit price.
    pub unit_price: Money,
    /// Total price (unit_price * quantity).
    pub total_price: Money,
    /// Whether the product is physically shipped.
    pub requires_shipping: bool,
    /// Preferred warehouse to allocate from.
    pub warehouse_id: Option<WarehouseId>,
}

impl LineItem {
    fn from_new(item: NewLineItem) -> Result<Self, CommerceError> {
        let total_price = item
            .unit_price
            .try_multiply(item.quantity)
            .ok_or(CommerceError::Overflow)?;
        Ok(Self {
            id: LineItemId::generate(),
            variant_id: item.variant_id,
            product_id: item.product_id,
            product_name: item.product_name,
            sku: item.sku,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price,
            requires_shipping: item.requires_shipping,
            warehouse_id: item.warehouse_id,
        })
    }

    /// Update the total price based on quantity.
    pub fn update_total(&mut self) -> Result<(), CommerceError> {
        self.total_price = self
            .unit_price
            .try_multiply(self.quantity)
            .ok_or(CommerceError::Overflow)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(cents: i64) -> Money {
        Money::new(cents, Currency::USD)
    }

    fn tea(quantity: i64) -> NewLineItem {
        NewLineItem::physical(
            VariantId::new("tea-500g"),
            ProductId::new("tea"),
            "Loose Leaf Tea",
            quantity,
            usd(1250),
        )
    }

    fn ebook() -> NewLineItem {
        NewLineItem::digital(
            VariantId::new("ebook-pdf"),
            ProductId::new("ebook"),
            "Brewing Guide",
            1,
            usd(900),
        )
    }

    #[test]
    fn test_cart_creation() {
        let cart = Cart::new(Currency::USD);
        assert!(cart.is_empty());
        assert!(!cart.is_shipping_required());
        assert!(validate_cart(&cart).is_err());
    }

    #[test]
    fn test_add_item() {
        let mut cart = Cart::new(Currency::USD);
        cart.add_item(tea(2)).unwrap();

        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.items[0].total_price, usd(2500));
        assert!(cart.is_shipping_required());
        assert!(validate_cart(&cart).is_ok());
    }

    #[test]
    fn test_add_same_variant_merges() {
        let mut cart = Cart::new(Currency::USD);
        let first = cart.add_item(tea(1)).unwrap();
        let second = cart.add_item(tea(2)).unwrap();

        assert_eq!(first, second);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
    }

    #[test]
    fn test_add_item_rejects_bad_quantity() {
        let mut cart = Cart::new(Currency::USD);
        assert!(matches!(
            cart.add_item(tea(0)),
            Err(CommerceError::InvalidQuantity(0))
        ));

        let mut cart = Cart::new(Currency::USD).with_max_quantity(5);
        cart.add_item(tea(4)).unwrap();
        assert!(matches!(
            cart.add_item(tea(2)),
            Err(CommerceError::QuantityExceedsLimit(6, 5))
        ));
        assert_eq!(cart.items[0].quantity, 4);
    }

    #[test]
    fn test_add_item_rejects_other_currency() {
        let mut cart = Cart::new(Currency::EUR);
        assert!(matches!(
            cart.add_item(tea(1)),
            Err(CommerceError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_update_and_remove() {
        let mut cart = Cart::new(Currency::USD);
        let id = cart.add_item(tea(1)).unwrap();
        cart.add_item(ebook()).unwrap();

        cart.update_quantity(&id, 3).unwrap();
        assert_eq!(cart.get_item(&id).unwrap().total_price, usd(3750));
        assert_eq!(cart.subtotal().unwrap(), usd(4650));

        cart.update_quantity(&id, 0).unwrap();
        assert!(cart.get_item(&id).is_none());
        assert!(!cart.is_shipping_required());
        assert!(cart.update_quantity(&id, 1).is_err());
    }

    #[test]
    fn test_clear() {
        let mut cart = Cart::new(Currency::USD);
        cart.add_item(tea(1)).unwrap();
        cart.clear();
        assert!(cart.is_empty());
        assert!(matches!(validate_cart(&cart), Err(CommerceError::EmptyCart)));
    }
}
