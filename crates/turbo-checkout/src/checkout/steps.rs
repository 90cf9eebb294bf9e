//! The checkout step chain.
//!
//! A checkout is an ordered list of steps. Each step carries the slice of
//! storage it owns, knows how to validate it, and how to copy it onto an
//! order at commit time. The shipping steps are left out entirely when
//! nothing in the cart is shipped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cart::Cart;
use crate::checkout::shipping::available_methods;
use crate::checkout::storage::{CheckoutStorage, ShippingMethodData, SummaryData};
use crate::checkout::{Address, DeliveryPartition, Email, ShippingOptionProvider, ShippingSelection, User};
use crate::error::{CommitError, FieldErrors, InvalidData};
use crate::ids::ShippingMethodId;
use crate::money::Money;
use crate::order::{DeliveryGroup, OrderDraft};

/// Step identifiers, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    ShippingAddress,
    ShippingMethod,
    Summary,
}

impl StepName {
    /// URL-friendly name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::ShippingAddress => "shipping-address",
            StepName::ShippingMethod => "shipping-method",
            StepName::Summary => "summary",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the steps need to know about the checkout they belong to.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub cart: &'a Cart,
    pub partitions: &'a [DeliveryPartition],
    pub user: Option<&'a User>,
    pub shipping: &'a dyn ShippingOptionProvider,
}

/// A step with its slice of checkout storage.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutStep {
    ShippingAddress {
        address: Option<Address>,
        email: Option<String>,
    },
    ShippingMethod {
        address: Option<Address>,
        method_id: Option<ShippingMethodId>,
    },
    Summary {
        shipping_address: Option<Address>,
        summary: Option<SummaryData>,
        billing_address: Option<Address>,
        email: Option<String>,
    },
}

/// Build the step chain for a cart.
pub fn generate_steps(cart: &Cart, storage: &CheckoutStorage) -> Vec<CheckoutStep> {
    let mut steps = Vec::with_capacity(3);
    if cart.is_shipping_required() {
        steps.push(CheckoutStep::ShippingAddress {
            address: storage.shipping_address.clone(),
            email: storage.email.clone(),
        });
        steps.push(CheckoutStep::ShippingMethod {
            address: storage.shipping_address.clone(),
            method_id: storage.shipping_method.as_ref().map(|m| m.method_id.clone()),
        });
    }
    steps.push(CheckoutStep::Summary {
        shipping_address: storage.shipping_address.clone(),
        summary: storage.summary.clone(),
        billing_address: storage.billing_address.clone(),
        email: storage.email.clone(),
    });
    steps
}

/// The steps a customer may currently visit: every step up to and including
/// the first one that does not validate.
pub async fn available_steps(steps: &[CheckoutStep], ctx: &StepContext<'_>) -> Vec<StepName> {
    let mut available = Vec::with_capacity(steps.len());
    for step in steps {
        available.push(step.name());
        if step.validate(ctx).await.is_err() {
            break;
        }
    }
    available
}

/// Validate the whole chain, stopping at the first invalid step.
pub async fn validate_all(steps: &[CheckoutStep], ctx: &StepContext<'_>) -> Result<(), InvalidData> {
    for step in steps {
        step.validate(ctx).await?;
    }
    Ok(())
}

impl CheckoutStep {
    /// The step's name.
    pub fn name(&self) -> StepName {
        match self {
            CheckoutStep::ShippingAddress { .. } => StepName::ShippingAddress,
            CheckoutStep::ShippingMethod { .. } => StepName::ShippingMethod,
            CheckoutStep::Summary { .. } => StepName::Summary,
        }
    }

    /// Check the step's stored data.
    pub async fn validate(&self, ctx: &StepContext<'_>) -> Result<(), InvalidData> {
        let step = self.name();
        let mut errors = FieldErrors::new();
        match self {
            CheckoutStep::ShippingAddress { address, email } => {
                match address {
                    None => errors.add("address", "Enter a shipping address."),
                    Some(address) => {
                        if let Err(e) = address.validate() {
                            errors.merge_prefixed("address", e);
                        }
                    }
                }
                check_email(ctx, email.as_deref(), &mut errors);
            }
            CheckoutStep::ShippingMethod { address, method_id } => {
                let (Some(address), Some(method_id)) = (address, method_id) else {
                    errors.add("method", "Select a shipping method.");
                    return Err(InvalidData::missing(step, errors));
                };
                let methods = available_methods(ctx.shipping, ctx.partitions, address).await;
                if !methods.iter().any(|m| &m.id == method_id) {
                    errors.add("method", "The selected shipping method is no longer available.");
                    return Err(InvalidData::contradictory(step, errors));
                }
            }
            CheckoutStep::Summary {
                shipping_address,
                summary,
                billing_address,
                email,
            } => {
                match summary {
                    None => errors.add("billing", "Choose a billing address."),
                    Some(summary) if summary.billing_same_as_shipping => {
                        if !ctx.cart.is_shipping_required() || shipping_address.is_none() {
                            errors.add("billing", "There is no shipping address to bill to.");
                            return Err(InvalidData::contradictory(step, errors));
                        }
                    }
                    Some(_) => match billing_address {
                        None => errors.add("billing_address", "Enter a billing address."),
                        Some(address) => {
                            if let Err(e) = address.validate() {
                                errors.merge_prefixed("billing_address", e);
                            }
                        }
                    },
                }
                check_email(ctx, email.as_deref(), &mut errors);
            }
        }
        errors
            .into_result()
            .map_err(|errors| InvalidData::missing(step, errors))
    }

    /// Copy the step's data onto an order being built.
    ///
    /// Steps run in chain order, so later steps can rely on what earlier
    /// ones put on the draft.
    pub async fn add_to_order(
        &self,
        ctx: &StepContext<'_>,
        draft: &mut OrderDraft,
    ) -> Result<(), CommitError> {
        let step = self.name();
        match self {
            CheckoutStep::ShippingAddress { address, .. } => {
                let address = address
                    .as_ref()
                    .ok_or_else(|| missing(step, "address", "Enter a shipping address."))?;
                draft.shipping_address = Some(address.copy_for_order());
                if ctx.user.is_some() {
                    draft.save_to_address_book = Some(address.clone());
                }
            }
            CheckoutStep::ShippingMethod { address, method_id } => {
                let (Some(address), Some(method_id)) = (address, method_id) else {
                    return Err(missing(step, "method", "Select a shipping method.").into());
                };
                let method = available_methods(ctx.shipping, ctx.partitions, address)
                    .await
                    .into_iter()
                    .find(|m| &m.id == method_id)
                    .ok_or_else(|| stale_method(step))?;
                draft.shipping_method = Some(ShippingSelection::from_method(&method));
            }
            CheckoutStep::Summary {
                summary,
                billing_address,
                ..
            } => {
                let summary = summary
                    .as_ref()
                    .ok_or_else(|| missing(step, "billing", "Choose a billing address."))?;
                draft.billing_address = if summary.billing_same_as_shipping {
                    let shipping = draft.shipping_address.as_ref().ok_or_else(|| {
                        missing(step, "billing", "There is no shipping address to bill to.")
                    })?;
                    Some(shipping.copy_for_order())
                } else {
                    let billing = billing_address
                        .as_ref()
                        .ok_or_else(|| missing(step, "billing_address", "Enter a billing address."))?;
                    Some(billing.copy_for_order())
                };
                draft.note = summary.note.clone();

                for partition in ctx.partitions {
                    let group = if partition.shipping_required() {
                        let (price, name) = shipping_price(ctx, draft, partition).await?;
                        DeliveryGroup::from_partition(partition, price, Some(name))
                    } else {
                        DeliveryGroup::from_partition(partition, Money::zero(ctx.cart.currency), None)
                    };
                    draft.groups.push(group);
                }
            }
        }
        Ok(())
    }
}

/// Price of shipping one partition with the method on the draft.
async fn shipping_price(
    ctx: &StepContext<'_>,
    draft: &OrderDraft,
    partition: &DeliveryPartition,
) -> Result<(Money, String), CommitError> {
    let (Some(address), Some(selection)) = (&draft.shipping_address, &draft.shipping_method) else {
        return Err(missing(StepName::ShippingMethod, "method", "Select a shipping method.").into());
    };
    ctx.shipping
        .options_for(partition, address)
        .await
        .into_iter()
        .find(|option| option.method.id == selection.method_id)
        .map(|option| (option.cost, option.method.name))
        .ok_or_else(|| stale_method(StepName::ShippingMethod).into())
}

fn missing(step: StepName, field: &str, message: &str) -> InvalidData {
    InvalidData::missing(step, FieldErrors::single(field, message))
}

fn stale_method(step: StepName) -> InvalidData {
    InvalidData::contradictory(
        step,
        FieldErrors::single("method", "The selected shipping method is no longer available."),
    )
}

/// Anonymous checkouts need a contact email.
fn check_email(ctx: &StepContext<'_>, email: Option<&str>, errors: &mut FieldErrors) {
    if ctx.user.is_some() {
        return;
    }
    match email.map(Email::parse) {
        None => errors.add("email", "Enter your email address."),
        Some(Err(e)) => errors.add("email", e.to_string()),
        Some(Ok(_)) => {}
    }
}

/// A step submission.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    /// Submitted form; `None` just displays the step.
    pub form: Option<StepForm>,
    /// Anti-forgery token of the submitting form. Never persisted.
    pub form_token: Option<String>,
}

impl StepRequest {
    /// A request that only displays the step.
    pub fn view() -> Self {
        Self {
            form: None,
            form_token: None,
        }
    }

    /// A form submission.
    pub fn submit(form: StepForm) -> Self {
        Self {
            form: Some(form),
            form_token: None,
        }
    }
}

/// Billing choice on the summary form.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingChoice {
    SameAsShipping,
    Address(Address),
}

/// Per-step form data.
#[derive(Debug, Clone, PartialEq)]
pub enum StepForm {
    ShippingAddress {
        address: Address,
        email: Option<String>,
    },
    ShippingMethod {
        method_id: ShippingMethodId,
    },
    Summary {
        billing: BillingChoice,
        email: Option<String>,
        note: Option<String>,
    },
}

impl StepForm {
    /// The step this form belongs to.
    pub fn step(&self) -> StepName {
        match self {
            StepForm::ShippingAddress { .. } => StepName::ShippingAddress,
            StepForm::ShippingMethod { .. } => StepName::ShippingMethod,
            StepForm::Summary { .. } => StepName::Summary,
        }
    }
}

/// Validate a submitted form against the checkout and return the storage it
/// would produce. `storage` itself is never touched.
pub async fn bind_form(
    form: StepForm,
    ctx: &StepContext<'_>,
    storage: &CheckoutStorage,
) -> Result<CheckoutStorage, FieldErrors> {
    let mut updated = storage.clone();
    let mut errors = FieldErrors::new();

    match form {
        StepForm::ShippingAddress { address, email } => {
            if let Err(e) = address.validate() {
                errors.merge_prefixed("address", e);
            }
            let email = bind_email(ctx, email.as_deref(), None, &mut errors);
            errors.into_result()?;
            updated.shipping_address = Some(Address { id: None, ..address });
            if email.is_some() {
                updated.email = email;
            }
        }
        StepForm::ShippingMethod { method_id } => {
            let Some(address) = &storage.shipping_address else {
                return Err(FieldErrors::single("address", "Enter a shipping address first."));
            };
            let partitions = ctx.partitions;
            let methods = available_methods(ctx.shipping, partitions, address).await;
            if !methods.iter().any(|m| m.id == method_id) {
                return Err(FieldErrors::single("method", "Select a valid shipping method."));
            }
            updated.shipping_method = Some(ShippingMethodData { method_id });
        }
        StepForm::Summary {
            billing,
            email,
            note,
        } => {
            let email = bind_email(ctx, email.as_deref(), storage.email.as_deref(), &mut errors);
            let note = note
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            let billing_same_as_shipping = match billing {
                BillingChoice::SameAsShipping => {
                    if !ctx.cart.is_shipping_required() || storage.shipping_address.is_none() {
                        errors.add("billing", "There is no shipping address to bill to.");
                    }
                    updated.billing_address = None;
                    true
                }
                BillingChoice::Address(address) => {
                    if let Err(e) = address.validate() {
                        errors.merge_prefixed("billing_address", e);
                    }
                    updated.billing_address = Some(Address { id: None, ..address });
                    false
                }
            };
            errors.into_result()?;
            updated.summary = Some(SummaryData {
                billing_same_as_shipping,
                note,
            });
            if email.is_some() {
                updated.email = email;
            }
        }
    }
    Ok(updated)
}

/// Parse the contact email of an anonymous checkout.
fn bind_email(
    ctx: &StepContext<'_>,
    submitted: Option<&str>,
    stored: Option<&str>,
    errors: &mut FieldErrors,
) -> Option<String> {
    if ctx.user.is_some() {
        return None;
    }
    let candidate = submitted.filter(|s| !s.trim().is_empty()).or(stored);
    match candidate.map(Email::parse) {
        Some(Ok(email)) => Some(email.as_str().to_string()),
        Some(Err(e)) => {
            errors.add("email", e.to_string());
            None
        }
        None => {
            errors.add("email", "Enter your email address.");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::NewLineItem;
    use crate::checkout::{DeliveryPartitioner, RateTableShipping, ShippingMethod};
    use crate::error::InvalidDataKind;
    use crate::ids::{ProductId, UserId, VariantId};
    use crate::money::Currency;

    fn usd(cents: i64) -> Money {
        Money::new(cents, Currency::USD)
    }

    fn shipping() -> RateTableShipping {
        RateTableShipping::new().with_rate(
            ShippingMethod::new(ShippingMethodId::new("standard"), "Standard"),
            &["GB"],
            usd(500),
            usd(0),
        )
    }

    fn cart(physical: bool, digital: bool) -> Cart {
        let mut cart = Cart::new(Currency::USD);
        if physical {
            cart.add_item(NewLineItem::physical(
                VariantId::new("mug"),
                ProductId::new("mug"),
                "Mug",
                1,
                usd(1200),
            ))
            .unwrap();
        }
        if digital {
            cart.add_item(NewLineItem::digital(
                VariantId::new("ebook"),
                ProductId::new("ebook"),
                "Ebook",
                1,
                usd(900),
            ))
            .unwrap();
        }
        cart
    }

    fn address() -> Address {
        Address::new("Ada", "Lovelace", "1 Road", "London", "GB", "N1")
    }

    fn complete_storage() -> CheckoutStorage {
        let mut storage = CheckoutStorage::new();
        storage.shipping_address = Some(address());
        storage.shipping_method = Some(ShippingMethodData {
            method_id: ShippingMethodId::new("standard"),
        });
        storage.summary = Some(SummaryData {
            billing_same_as_shipping: true,
            note: None,
        });
        storage.email = Some("ada@example.com".to_string());
        storage
    }

    #[test]
    fn test_generate_steps_for_shipped_cart() {
        let steps = generate_steps(&cart(true, false), &CheckoutStorage::new());
        let names: Vec<StepName> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![StepName::ShippingAddress, StepName::ShippingMethod, StepName::Summary]
        );
    }

    #[test]
    fn test_generate_steps_skips_shipping_for_digital_cart() {
        let steps = generate_steps(&cart(false, true), &complete_storage());
        let names: Vec<StepName> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec![StepName::Summary]);
    }

    #[tokio::test]
    async fn test_available_steps_stop_at_first_invalid() {
        let cart = cart(true, false);
        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let shipping = shipping();
        let ctx = StepContext {
            cart: &cart,
            partitions: &partitions,
            user: None,
            shipping: &shipping,
        };

        let empty = generate_steps(&cart, &CheckoutStorage::new());
        assert_eq!(available_steps(&empty, &ctx).await, vec![StepName::ShippingAddress]);

        let mut storage = complete_storage();
        storage.shipping_method = None;
        let partial = generate_steps(&cart, &storage);
        assert_eq!(
            available_steps(&partial, &ctx).await,
            vec![StepName::ShippingAddress, StepName::ShippingMethod]
        );

        let full = generate_steps(&cart, &complete_storage());
        assert_eq!(available_steps(&full, &ctx).await.len(), 3);
        assert!(validate_all(&full, &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_shipping_method_is_contradictory() {
        let cart = cart(true, false);
        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let shipping = shipping();
        let ctx = StepContext {
            cart: &cart,
            partitions: &partitions,
            user: None,
            shipping: &shipping,
        };

        let mut storage = complete_storage();
        storage.shipping_method = Some(ShippingMethodData {
            method_id: ShippingMethodId::new("discontinued"),
        });
        let steps = generate_steps(&cart, &storage);
        let err = validate_all(&steps, &ctx).await.unwrap_err();
        assert_eq!(err.step, StepName::ShippingMethod);
        assert_eq!(err.kind, InvalidDataKind::Contradictory);
        assert!(err.errors.contains("method"));
    }

    #[tokio::test]
    async fn test_anonymous_checkout_needs_email() {
        let cart = cart(false, true);
        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let shipping = shipping();
        let ctx = StepContext {
            cart: &cart,
            partitions: &partitions,
            user: None,
            shipping: &shipping,
        };

        let mut storage = CheckoutStorage::new();
        storage.summary = Some(SummaryData {
            billing_same_as_shipping: false,
            note: None,
        });
        storage.billing_address = Some(address());
        let err = validate_all(&generate_steps(&cart, &storage), &ctx).await.unwrap_err();
        assert_eq!(err.kind, InvalidDataKind::Missing);
        assert!(err.errors.contains("email"));

        let user = User::new(UserId::new("u1"), Email::parse("ada@example.com").unwrap());
        let ctx = StepContext {
            user: Some(&user),
            ..ctx
        };
        assert!(validate_all(&generate_steps(&cart, &storage), &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_invalid_form_reports_errors() {
        let cart = cart(true, false);
        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let shipping = shipping();
        let ctx = StepContext {
            cart: &cart,
            partitions: &partitions,
            user: None,
            shipping: &shipping,
        };
        let storage = CheckoutStorage::new();

        let mut bad = address();
        bad.city.clear();
        let errors = bind_form(
            StepForm::ShippingAddress {
                address: bad,
                email: Some("nope".to_string()),
            },
            &ctx,
            &storage,
        )
        .await
        .unwrap_err();
        assert!(errors.contains("address.city"));
        assert!(errors.contains("email"));
    }

    #[tokio::test]
    async fn test_bind_shipping_method_checks_offer() {
        let cart = cart(true, false);
        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let shipping = shipping();
        let ctx = StepContext {
            cart: &cart,
            partitions: &partitions,
            user: None,
            shipping: &shipping,
        };
        let mut storage = CheckoutStorage::new();
        storage.shipping_address = Some(address());

        let errors = bind_form(
            StepForm::ShippingMethod {
                method_id: ShippingMethodId::new("teleport"),
            },
            &ctx,
            &storage,
        )
        .await
        .unwrap_err();
        assert!(errors.contains("method"));

        let updated = bind_form(
            StepForm::ShippingMethod {
                method_id: ShippingMethodId::new("standard"),
            },
            &ctx,
            &storage,
        )
        .await
        .unwrap();
        assert_eq!(
            updated.shipping_method.unwrap().method_id,
            ShippingMethodId::new("standard")
        );
    }

    #[tokio::test]
    async fn test_add_to_order_builds_groups() {
        let cart = cart(true, true);
        let partitions = DeliveryPartitioner::partition(&cart).unwrap();
        let shipping = shipping();
        let user = User::new(UserId::new("u1"), Email::parse("ada@example.com").unwrap());
        let ctx = StepContext {
            cart: &cart,
            partitions: &partitions,
            user: Some(&user),
            shipping: &shipping,
        };

        let mut draft = OrderDraft::new(ctx.user, None);
        for step in generate_steps(&cart, &complete_storage()) {
            step.add_to_order(&ctx, &mut draft).await.unwrap();
        }

        assert_eq!(draft.groups.len(), 2);
        assert_eq!(draft.groups[0].shipping_price, usd(500));
        assert_eq!(draft.groups[1].shipping_price, usd(0));
        assert!(draft.save_to_address_book.is_some());

        let shipping_address = draft.shipping_address.unwrap();
        let billing_address = draft.billing_address.unwrap();
        assert!(shipping_address.same_as(&billing_address));
        assert_ne!(shipping_address.id, billing_address.id);
        assert_eq!(draft.shipping_method.unwrap().method_name, "Standard");
    }
}
