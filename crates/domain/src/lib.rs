//! Domain layer for the order-placement pipeline.
//!
//! This crate holds the pure, I/O-free part of checkout:
//! - value objects (money, product IDs, shipping address, payment method)
//! - the order entity and its status state machine
//! - the totals calculator with pluggable tax and shipping policies
//! - the acting principal used for authorization decisions

pub mod actor;
pub mod error;
pub mod order;
pub mod totals;

pub use actor::{Actor, Role};
pub use error::DomainError;
pub use order::{
    CardDetails, IdempotencyKey, Money, NewOrder, Order, OrderItem, OrderStatus, OrderSummary,
    PaymentInput, PaymentMethod, PaymentStatus, ProductId, ShippingAddress, StockSnapshotRow,
};
pub use totals::{ChargePolicy, NoCharge, Totals, TotalsCalculator};
