//! Shipping methods and the provider that prices them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkout::{Address, DeliveryPartition};
use crate::ids::ShippingMethodId;
use crate::money::Money;

/// A way of shipping goods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingMethod {
    /// Unique identifier.
    pub id: ShippingMethodId,
    /// Display name.
    pub name: String,
    /// Carrier name (e.g., "UPS", "FedEx").
    pub carrier: Option<String>,
    /// Minimum delivery days.
    pub min_delivery_days: Option<i32>,
    /// Maximum delivery days.
    pub max_delivery_days: Option<i32>,
}

impl ShippingMethod {
    /// Create a new shipping method.
    pub fn new(id: ShippingMethodId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            carrier: None,
            min_delivery_days: None,
            max_delivery_days: None,
        }
    }

    /// Get delivery estimate string.
    pub fn delivery_estimate(&self) -> Option<String> {
        match (self.min_delivery_days, self.max_delivery_days) {
            (Some(min), Some(max)) if min == max => Some(format!("{} days", min)),
            (Some(min), Some(max)) => Some(format!("{}-{} days", min, max)),
            (Some(min), None) => Some(format!("{}+ days", min)),
            (None, Some(max)) => Some(format!("Up to {} days", max)),
            (None, None) => None,
        }
    }
}

/// A method offered for a partition, with its price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingOption {
    pub method: ShippingMethod,
    pub cost: Money,
}

/// The shipping method recorded on an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingSelection {
    /// Selected method ID.
    pub method_id: ShippingMethodId,
    /// Method name (denormalized).
    pub method_name: String,
    /// Carrier name.
    pub carrier: Option<String>,
    /// Delivery estimate.
    pub delivery_estimate: Option<String>,
}

impl ShippingSelection {
    /// Create from a shipping method.
    pub fn from_method(method: &ShippingMethod) -> Self {
        Self {
            method_id: method.id.clone(),
            method_name: method.name.clone(),
            carrier: method.carrier.clone(),
            delivery_estimate: method.delivery_estimate(),
        }
    }
}

/// Source of shipping options.
#[async_trait]
pub trait ShippingOptionProvider: Send + Sync {
    /// Options for shipping a partition to an address.
    async fn options_for(
        &self,
        partition: &DeliveryPartition,
        address: &Address,
    ) -> Vec<ShippingOption>;
}

/// Methods offered for every shipped partition of a checkout.
///
/// A method is only valid if it can ship all of the partitions, so this is
/// the intersection of the per-partition options, in the order the provider
/// lists them for the first partition.
pub async fn available_methods(
    provider: &dyn ShippingOptionProvider,
    partitions: &[DeliveryPartition],
    address: &Address,
) -> Vec<ShippingMethod> {
    let mut methods: Option<Vec<ShippingMethod>> = None;
    for partition in partitions.iter().filter(|p| p.shipping_required()) {
        let offered: Vec<ShippingMethod> = provider
            .options_for(partition, address)
            .await
            .into_iter()
            .map(|option| option.method)
            .collect();
        methods = Some(match methods {
            None => offered,
            Some(current) => current
                .into_iter()
                .filter(|m| offered.iter().any(|o| o.id == m.id))
                .collect(),
        });
    }
    methods.unwrap_or_default()
}

/// One row of a [`RateTableShipping`] table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingRate {
    pub method: ShippingMethod,
    /// Destination country codes; empty means everywhere.
    pub countries: Vec<String>,
    pub base_price: Money,
    pub per_item: Money,
}

impl ShippingRate {
    fn serves(&self, address: &Address) -> bool {
        self.countries.is_empty()
            || self
                .countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(address.country_code.trim()))
    }

    fn price(&self, partition: &DeliveryPartition) -> Option<Money> {
        self.per_item
            .try_multiply(partition.item_count())?
            .try_add(&self.base_price)
    }
}

/// Table-driven shipping: a base price plus a price per item, per method and
/// destination country.
#[derive(Debug, Clone, Default)]
pub struct RateTableShipping {
    rates: Vec<ShippingRate>,
}

impl RateTableShipping {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rate.
    pub fn with_rate(
        mut self,
        method: ShippingMethod,
        countries: &[&str],
        base_price: Money,
        per_item: Money,
    ) -> Self {
        self.rates.push(ShippingRate {
            method,
            countries: countries.iter().map(|c| c.to_string()).collect(),
            base_price,
            per_item,
        });
        self
    }
}

#[async_trait]
impl ShippingOptionProvider for RateTableShipping {
    async fn options_for(
        &self,
        partition: &DeliveryPartition,
        address: &Address,
    ) -> Vec<ShippingOption> {
        if !partition.shipping_required() {
            return Vec::new();
        }
        self.rates
            .iter()
            .filter(|rate| rate.serves(address))
            .filter_map(|rate| match rate.price(partition) {
                Some(cost) => Some(ShippingOption {
                    method: rate.method.clone(),
                    cost,
                }),
                None => {
                    tracing::warn!(method = %rate.method.id, "shipping price overflow, skipping rate");
                    None
                }
            })
            .collect()
    }
}
