use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::{IdempotencyKey, NewOrder, Order, OrderItem, OrderStatus, ProductId, StockSnapshotRow};

use crate::{OrderPage, OrderQuery, Result};

/// Durable mapping from `(user, idempotency key)` to the order it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub user_id: UserId,
    pub key: String,
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
}

/// Core trait for order store implementations.
///
/// Reads that need no isolation live here; everything that mutates state goes
/// through a [`StoreTransaction`] obtained from [`OrderStore::begin`].
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Transaction handle produced by [`OrderStore::begin`].
    type Tx: StoreTransaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Looks up the idempotency record for a user and key.
    async fn find_idempotency_record(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Loads an order with its items.
    ///
    /// Returns None if the order doesn't exist.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists orders matching a query, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage>;

    /// Returns the contact email of a customer, if known.
    async fn customer_email(&self, user_id: UserId) -> Result<Option<String>>;
}

/// Operations available inside an open transaction.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`]
/// discards every write made through it.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Reads the user's cart joined with current product price and stock,
    /// locking each referenced product row until the transaction ends.
    ///
    /// Lines whose product no longer exists are skipped. Returns an empty
    /// list for an empty cart.
    async fn lock_cart_lines(&mut self, user_id: UserId) -> Result<Vec<StockSnapshotRow>>;

    /// Decrements stock only if at least `quantity` units remain.
    ///
    /// Returns false, leaving stock untouched, when the condition fails.
    async fn decrement_stock_if_available(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool>;

    /// Unconditionally adds `quantity` units back to stock.
    async fn increment_stock(&mut self, product_id: &ProductId, quantity: u32) -> Result<()>;

    /// Inserts the order header.
    async fn insert_order(&mut self, order: &NewOrder) -> Result<()>;

    /// Inserts the order's line items.
    async fn insert_order_items(&mut self, order_id: OrderId, items: &[OrderItem]) -> Result<()>;

    /// Inserts the idempotency record.
    ///
    /// Fails with [`crate::StoreError::DuplicateIdempotencyKey`] when the user
    /// already has a record for this key.
    async fn insert_idempotency_record(
        &mut self,
        user_id: UserId,
        key: &IdempotencyKey,
        order_id: OrderId,
    ) -> Result<()>;

    /// Removes every line from the user's cart. Returns the number removed.
    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64>;

    /// Sets the order status if it still equals `expected`.
    ///
    /// Returns false when the order is missing or its status moved on.
    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        expected: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Makes every write in this transaction durable and releases its locks.
    async fn commit(self) -> Result<()>;

    /// Discards every write in this transaction and releases its locks.
    async fn rollback(self) -> Result<()>;
}
