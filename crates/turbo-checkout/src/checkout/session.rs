//! A customer's checkout, as seen from one request.

use std::sync::Arc;

use turbo_cache::SessionStore;

use crate::cart::{validate_cart, Cart};
use crate::checkout::steps::{
    available_steps, bind_form, generate_steps, validate_all, CheckoutStep, StepContext,
    StepName, StepRequest,
};
use crate::checkout::{CheckoutStorage, DeliveryPartition, DeliveryPartitioner, ShippingOptionProvider, User};
use crate::error::{CommerceError, FieldErrors, InvalidData};
use crate::ids::CheckoutToken;

/// What to do after processing a step request.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Go to another step.
    Continue { next: StepName },
    /// Show the step, with any field errors.
    Render { step: StepName, errors: FieldErrors },
    /// Every step is complete; the checkout can be committed.
    ReadyForCommit,
}

/// Checkout state bound to a cart and a customer.
///
/// Changes made by [`CheckoutSession::process`] live in memory until
/// [`CheckoutSession::persist`] writes them back.
pub struct CheckoutSession {
    token: CheckoutToken,
    storage: CheckoutStorage,
    version: Option<u64>,
    cart: Cart,
    user: Option<User>,
    partitions: Vec<DeliveryPartition>,
    shipping: Arc<dyn ShippingOptionProvider>,
}

impl std::fmt::Debug for CheckoutSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutSession")
            .field("token", &self.token)
            .field("version", &self.version)
            .field("cart", &self.cart.id)
            .field("storage", &self.storage)
            .finish()
    }
}

impl CheckoutSession {
    /// Open the checkout stored under `token`, or start a new one.
    ///
    /// The cart must pass [`validate_cart`].
    pub fn open(
        store: &SessionStore,
        token: CheckoutToken,
        cart: Cart,
        user: Option<User>,
        shipping: Arc<dyn ShippingOptionProvider>,
    ) -> Result<Self, CommerceError> {
        let (blob, version) = match store.load(&token) {
            Some(entry) => (entry.blob, Some(entry.version)),
            None => (Vec::new(), None),
        };
        let mut session = Self::from_blob(token, &blob, cart, user, shipping)?;
        session.version = version;
        Ok(session)
    }

    /// Build a session from a raw storage blob.
    pub fn from_blob(
        token: CheckoutToken,
        blob: &[u8],
        cart: Cart,
        user: Option<User>,
        shipping: Arc<dyn ShippingOptionProvider>,
    ) -> Result<Self, CommerceError> {
        validate_cart(&cart)?;
        let partitions = DeliveryPartitioner::partition(&cart)?;
        Ok(Self {
            token,
            storage: CheckoutStorage::load(blob),
            version: None,
            cart,
            user,
            partitions,
            shipping,
        })
    }

    pub fn token(&self) -> &CheckoutToken {
        &self.token
    }

    pub fn storage(&self) -> &CheckoutStorage {
        &self.storage
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn partitions(&self) -> &[DeliveryPartition] {
        &self.partitions
    }

    /// Store version this session was loaded at, `None` for a new checkout.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    fn context(&self) -> StepContext<'_> {
        StepContext {
            cart: &self.cart,
            partitions: &self.partitions,
            user: self.user.as_ref(),
            shipping: self.shipping.as_ref(),
        }
    }

    /// The step chain for the current storage.
    pub fn steps(&self) -> Vec<CheckoutStep> {
        generate_steps(&self.cart, &self.storage)
    }

    /// Steps the customer may visit.
    pub async fn available_steps(&self) -> Vec<StepName> {
        available_steps(&self.steps(), &self.context()).await
    }

    /// Validate every step.
    pub async fn validate(&self) -> Result<(), InvalidData> {
        validate_all(&self.steps(), &self.context()).await
    }

    /// Handle a request for one step.
    ///
    /// A step that is not reachable yet redirects to the furthest reachable
    /// one. An invalid form leaves storage untouched.
    pub async fn process(
        &mut self,
        step: StepName,
        request: StepRequest,
    ) -> Result<StepOutcome, CommerceError> {
        let steps = self.steps();
        let ctx = self.context();
        let available = available_steps(&steps, &ctx).await;
        let Some(&furthest) = available.last() else {
            return Err(CommerceError::EmptyCart);
        };
        let Some(current) = steps.iter().find(|s| s.name() == step).filter(|_| available.contains(&step)) else {
            tracing::debug!(requested = %step, redirect = %furthest, "step not reachable");
            return Ok(StepOutcome::Continue { next: furthest });
        };

        let Some(form) = request.form else {
            let errors = match current.validate(&ctx).await {
                Err(invalid) if invalid.is_contradictory() => invalid.errors,
                _ => FieldErrors::new(),
            };
            return Ok(StepOutcome::Render { step, errors });
        };

        if form.step() != step {
            return Ok(StepOutcome::Render {
                step,
                errors: FieldErrors::single("form", "This form does not belong to this step."),
            });
        }

        match bind_form(form, &ctx, &self.storage).await {
            Err(errors) => {
                tracing::debug!(step = %step, fields = errors.len(), "step form rejected");
                Ok(StepOutcome::Render { step, errors })
            }
            Ok(updated) => {
                self.storage = updated;
                let names: Vec<StepName> = self.steps().iter().map(CheckoutStep::name).collect();
                let next = names
                    .iter()
                    .position(|name| *name == step)
                    .and_then(|i| names.get(i + 1).copied());
                Ok(match next {
                    Some(next) => StepOutcome::Continue { next },
                    None => StepOutcome::ReadyForCommit,
                })
            }
        }
    }

    /// Encode the current storage.
    pub fn save(&self) -> Result<Vec<u8>, CommerceError> {
        self.storage.to_blob()
    }

    /// Write the storage back, failing if someone else wrote it since it was
    /// loaded.
    pub fn persist(&mut self, store: &SessionStore) -> Result<u64, CommerceError> {
        let version = store.save(&self.token, self.save()?, self.version)?;
        self.version = Some(version);
        Ok(version)
    }
}
