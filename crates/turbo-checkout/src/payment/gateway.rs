//! Payment gateway clients.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::money::Money;
use crate::payment::Payment;

/// What the gateway wants the customer to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayResponse {
    /// Send the customer to the gateway.
    Redirect { url: String },
    /// Show a form that posts to the gateway.
    Form {
        action: String,
        fields: Vec<(String, String)>,
    },
}

/// A client for one payment gateway.
#[async_trait]
pub trait PaymentGatewayClient: Send + Sync {
    /// Start collecting the payment.
    async fn charge(&self, payment: &Payment) -> Result<GatewayResponse, GatewayError>;

    /// Give back part or all of a captured payment.
    async fn refund(&self, _payment: &Payment, _amount: Money) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported("refund"))
    }
}

/// Gateway clients by variant name.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    clients: HashMap<String, Arc<dyn PaymentGatewayClient>>,
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut variants: Vec<&String> = self.clients.keys().collect();
        variants.sort();
        f.debug_struct("GatewayRegistry")
            .field("variants", &variants)
            .finish()
    }
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under a variant name, replacing any earlier one.
    pub fn with_client(
        mut self,
        variant: impl Into<String>,
        client: Arc<dyn PaymentGatewayClient>,
    ) -> Self {
        self.clients.insert(variant.into(), client);
        self
    }

    pub fn get(&self, variant: &str) -> Option<Arc<dyn PaymentGatewayClient>> {
        self.clients.get(variant).cloned()
    }

    pub fn contains(&self, variant: &str) -> bool {
        self.clients.contains_key(variant)
    }
}

/// A gateway that always redirects to a fixed page. Useful for development.
#[derive(Debug, Clone)]
pub struct DummyGateway {
    base_url: String,
}

impl DummyGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentGatewayClient for DummyGateway {
    async fn charge(&self, payment: &Payment) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse::Redirect {
            url: format!("{}/{}", self.base_url.trim_end_matches('/'), payment.id),
        })
    }

    async fn refund(&self, _payment: &Payment, _amount: Money) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use crate::order::OrderDraft;

    struct Broken;

    #[async_trait]
    impl PaymentGatewayClient for Broken {
        async fn charge(&self, _payment: &Payment) -> Result<GatewayResponse, GatewayError> {
            Err(GatewayError::Transport("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = GatewayRegistry::new()
            .with_client("dummy", Arc::new(DummyGateway::new("https://pay.example.com/")))
            .with_client("broken", Arc::new(Broken));
        assert!(registry.contains("dummy"));
        assert!(registry.get("card").is_none());

        let order = OrderDraft::new(None, None).into_order(Currency::USD, None, None).unwrap();
        let payment = Payment::for_order(&order, "dummy");
        let response = registry.get("dummy").unwrap().charge(&payment).await.unwrap();
        assert_eq!(
            response,
            GatewayResponse::Redirect {
                url: format!("https://pay.example.com/{}", payment.id)
            }
        );

        let broken = registry.get("broken").unwrap();
        assert!(broken.charge(&payment).await.is_err());
        assert!(matches!(
            broken.refund(&payment, payment.total).await,
            Err(GatewayError::Unsupported("refund"))
        ));
    }
}
