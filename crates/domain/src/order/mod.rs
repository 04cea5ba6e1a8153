//! Order entity and related types.

mod model;
mod state;
mod value_objects;

pub use model::{NewOrder, Order, OrderItem, OrderSummary, StockSnapshotRow};
pub use state::{OrderStatus, PaymentStatus};
pub use value_objects::{
    CardDetails, IdempotencyKey, Money, PaymentInput, PaymentMethod, ProductId, ShippingAddress,
    mask_card,
};
