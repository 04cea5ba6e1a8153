use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::{
    IdempotencyKey, Money, NewOrder, Order, OrderItem, OrderStatus, ProductId, StockSnapshotRow,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    IdempotencyRecord, OrderPage, OrderQuery, Result, StoreError,
    store::{OrderStore, StoreTransaction},
};

#[derive(Debug, Clone)]
struct ProductRow {
    price: Money,
    stock: i32,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<ProductId, ProductRow>,
    /// Cart lines per user, in insertion order.
    carts: HashMap<UserId, Vec<(ProductId, i32)>>,
    orders: HashMap<OrderId, Order>,
    idempotency: HashMap<(UserId, String), IdempotencyRecord>,
    emails: HashMap<UserId, String>,
}

/// In-memory order store implementation for testing.
///
/// A transaction holds the whole store exclusively from `begin` until
/// `commit`/`rollback`, which is stricter than per-row locking but gives the
/// same guarantees to callers. Writes go to a private copy that replaces the
/// shared state only on commit.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<MemoryState>>,
    fail_on_commit: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every subsequent commit to fail (and roll back).
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Creates or replaces a product with the given price and stock.
    pub async fn put_product(&self, product_id: impl Into<ProductId>, price: Money, stock: i32) {
        self.state
            .lock()
            .await
            .products
            .insert(product_id.into(), ProductRow { price, stock });
    }

    /// Changes the catalog price of an existing product.
    pub async fn set_price(&self, product_id: &ProductId, price: Money) {
        if let Some(row) = self.state.lock().await.products.get_mut(product_id) {
            row.price = price;
        }
    }

    /// Removes a product from the catalog.
    pub async fn remove_product(&self, product_id: &ProductId) {
        self.state.lock().await.products.remove(product_id);
    }

    /// Adds `quantity` units of a product to the user's cart.
    pub async fn add_to_cart(&self, user_id: UserId, product_id: impl Into<ProductId>, quantity: i32) {
        let product_id = product_id.into();
        let mut state = self.state.lock().await;
        let cart = state.carts.entry(user_id).or_default();
        match cart.iter_mut().find(|(id, _)| *id == product_id) {
            Some((_, existing)) => *existing += quantity,
            None => cart.push((product_id, quantity)),
        }
    }

    /// Registers the contact email of a customer.
    pub async fn register_customer(&self, user_id: UserId, email: impl Into<String>) {
        self.state.lock().await.emails.insert(user_id, email.into());
    }

    /// Returns the current stock of a product.
    pub async fn stock_of(&self, product_id: &ProductId) -> Option<i32> {
        self.state
            .lock()
            .await
            .products
            .get(product_id)
            .map(|row| row.stock)
    }

    /// Returns the lines in the user's cart.
    pub async fn cart_of(&self, user_id: UserId) -> Vec<(ProductId, i32)> {
        self.state
            .lock()
            .await
            .carts
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the total number of idempotency records stored.
    pub async fn idempotency_record_count(&self) -> usize {
        self.state.lock().await.idempotency.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTransaction {
            guard,
            working,
            fail_on_commit: self.fail_on_commit.clone(),
        })
    }

    async fn find_idempotency_record(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .idempotency
            .get(&(user_id, key.as_str().to_string()))
            .cloned())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let state = self.state.lock().await;
        let mut matching: Vec<_> = state
            .orders
            .values()
            .map(Order::summary)
            .filter(|summary| query.matches(summary))
            .collect();

        // Newest first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let (page, limit) = query.normalized();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();

        Ok(OrderPage {
            total,
            items,
            page,
            limit,
        })
    }

    async fn customer_email(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.state.lock().await.emails.get(&user_id).cloned())
    }
}

/// Transaction over an [`InMemoryOrderStore`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_on_commit: Arc<AtomicBool>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_cart_lines(&mut self, user_id: UserId) -> Result<Vec<StockSnapshotRow>> {
        let Some(cart) = self.working.carts.get(&user_id) else {
            return Ok(Vec::new());
        };

        Ok(cart
            .iter()
            .filter_map(|(product_id, quantity)| {
                self.working
                    .products
                    .get(product_id)
                    .map(|row| StockSnapshotRow {
                        product_id: product_id.clone(),
                        price: row.price,
                        stock: row.stock,
                        requested_quantity: *quantity,
                    })
            })
            .collect())
    }

    async fn decrement_stock_if_available(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let quantity = to_units(quantity)?;
        match self.working.products.get_mut(product_id) {
            Some(row) if row.stock >= quantity => {
                row.stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_stock(&mut self, product_id: &ProductId, quantity: u32) -> Result<()> {
        let quantity = to_units(quantity)?;
        if let Some(row) = self.working.products.get_mut(product_id) {
            row.stock = row
                .stock
                .checked_add(quantity)
                .ok_or_else(|| StoreError::Unavailable("stock out of range".to_string()))?;
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<()> {
        let mut header = Order::from(order.clone());
        header.items.clear();
        self.working.orders.insert(order.id, header);
        Ok(())
    }

    async fn insert_order_items(&mut self, order_id: OrderId, items: &[OrderItem]) -> Result<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::Unavailable(format!("order {order_id} not inserted")))?;
        order.items.extend_from_slice(items);
        Ok(())
    }

    async fn insert_idempotency_record(
        &mut self,
        user_id: UserId,
        key: &IdempotencyKey,
        order_id: OrderId,
    ) -> Result<()> {
        let map_key = (user_id, key.as_str().to_string());
        if self.working.idempotency.contains_key(&map_key) {
            return Err(StoreError::DuplicateIdempotencyKey {
                user_id,
                key: key.as_str().to_string(),
            });
        }
        self.working.idempotency.insert(
            map_key,
            IdempotencyRecord {
                user_id,
                key: key.as_str().to_string(),
                order_id,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        Ok(self
            .working
            .carts
            .remove(&user_id)
            .map(|lines| lines.len() as u64)
            .unwrap_or(0))
    }

    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        expected: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.working.orders.get_mut(&order_id) {
            Some(order) if order.status == expected => {
                order.status = new_status;
                order.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self) -> Result<()> {
        let Self {
            mut guard,
            working,
            fail_on_commit,
        } = self;

        if fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit failed".to_string()));
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

fn to_units(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Unavailable(format!("quantity {quantity} out of range")))
}
