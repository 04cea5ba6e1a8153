//! Deduplication of retried checkout requests.

use common::{OrderId, UserId};
use domain::{IdempotencyKey, Order};
use order_store::{OrderStore, StoreError, StoreTransaction};

/// Maps `(user, idempotency key)` to the order it already produced.
#[derive(Clone)]
pub struct IdempotencyGuard<S> {
    store: S,
}

impl<S: OrderStore> IdempotencyGuard<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the order previously placed with this key, if any.
    pub async fn lookup(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        let Some(record) = self.store.find_idempotency_record(user_id, key).await? else {
            return Ok(None);
        };

        match self.store.get_order(record.order_id).await? {
            Some(order) => Ok(Some(order)),
            None => Err(StoreError::Decode(format!(
                "idempotency record points at missing order {}",
                record.order_id
            ))),
        }
    }

    /// Writes the record inside the transaction that creates the order.
    pub async fn record(
        &self,
        tx: &mut S::Tx,
        user_id: UserId,
        key: &IdempotencyKey,
        order_id: OrderId,
    ) -> Result<(), StoreError> {
        tx.insert_idempotency_record(user_id, key, order_id).await
    }
}
