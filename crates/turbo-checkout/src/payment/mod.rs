//! Payments for placed orders.

mod gateway;
mod machine;
mod model;

pub use gateway::{DummyGateway, GatewayRegistry, GatewayResponse, PaymentGatewayClient};
pub use machine::{PaymentStateMachine, StartedPayment};
pub use model::{Payment, PaymentStatus};
