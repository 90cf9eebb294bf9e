//! Checkout module.
//!
//! A checkout walks the customer through a chain of steps, keeping what they
//! entered in versioned storage under a checkout token. Carts are split into
//! delivery partitions, which become the delivery groups of the order.

mod address;
mod partition;
mod session;
mod shipping;
mod steps;
mod storage;

pub use address::{Address, AddressBook, Email, EmailError, User};
pub use partition::{DeliveryPartition, DeliveryPartitioner};
pub use session::{CheckoutSession, StepOutcome};
pub use shipping::{
    available_methods, RateTableShipping, ShippingMethod, ShippingOption, ShippingOptionProvider,
    ShippingRate, ShippingSelection,
};
pub use steps::{
    available_steps, bind_form, generate_steps, validate_all, BillingChoice, CheckoutStep,
    StepContext, StepForm, StepName, StepRequest,
};
pub use storage::{CheckoutStorage, ShippingMethodData, SummaryData, STORAGE_VERSION};
