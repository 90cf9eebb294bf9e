//! Checkout configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cart::{Cart, MAX_QUANTITY_PER_ITEM};
use crate::error::ConfigError;
use crate::money::Currency;

/// Checkout engine configuration.
///
/// Every field has a default, so an empty file is a valid config.
///
/// ```toml
/// currency = "EUR"
/// gateway_timeout_ms = 5000
/// session_ttl_secs = 86400
/// max_quantity_per_line = 50
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Currency for new carts.
    #[serde(default)]
    pub currency: Currency,

    /// Upper bound on a single payment gateway call.
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,

    /// Idle lifetime of checkout sessions (none = never expire).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ttl_secs: Option<u64>,

    /// Maximum quantity of a single cart line.
    #[serde(default = "default_max_quantity_per_line")]
    pub max_quantity_per_line: i64,
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

fn default_max_quantity_per_line() -> i64 {
    MAX_QUANTITY_PER_ITEM
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: Currency::default(),
            gateway_timeout_ms: default_gateway_timeout_ms(),
            session_ttl_secs: None,
            max_quantity_per_line: default_max_quantity_per_line(),
        }
    }
}

impl CheckoutConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded checkout config");
        Ok(config)
    }

    /// Gateway timeout as a duration.
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    /// Session lifetime as a duration.
    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl_secs.map(Duration::from_secs)
    }

    /// An empty cart in the configured currency and with the configured
    /// line limit.
    pub fn new_cart(&self) -> Cart {
        Cart::new(self.currency).with_max_quantity(self.max_quantity_per_line)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "gateway_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_quantity_per_line < 1 {
            return Err(ConfigError::Invalid {
                field: "max_quantity_per_line",
                reason: format!("must be at least 1, got {}", self.max_quantity_per_line),
            });
        }
        Ok(())
    }
}
