//! Storage seam for the order-placement pipeline.
//!
//! [`OrderStore`] exposes the non-transactional reads and opens
//! [`StoreTransaction`]s; every write (stock, orders, idempotency records,
//! carts) happens inside a transaction so it commits or rolls back as a unit.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryOrderStore, InMemoryTransaction};
pub use postgres::{PostgresOrderStore, PostgresTransaction};
pub use query::{OrderPage, OrderQuery};
pub use store::{IdempotencyRecord, OrderStore, StoreTransaction};
