//! Orders: the model, placing them from a checkout, and their lifecycle.

mod commit;
mod model;
mod status;

pub use commit::{CommitRequest, OrderCommitEngine};
pub use model::{
    DeliveryGroup, GroupStatus, HistoryEntry, Order, OrderDraft, OrderLine, OrderStatus,
};
pub use status::{paid_amount, OrderStatusMachine};
