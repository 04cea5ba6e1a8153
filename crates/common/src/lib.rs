//! Identifier types shared by every layer of the order-placement pipeline.

mod types;

pub use types::{OrderId, UserId};
