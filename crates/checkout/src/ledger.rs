//! Stock ledger primitives.
//!
//! Every change to product stock goes through [`deduct`] or [`restore`].

use common::UserId;
use domain::{ProductId, StockSnapshotRow};
use order_store::{StoreError, StoreTransaction};

/// Outcome of a conditional stock deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deduction {
    Applied,
    /// Current stock is below the requested quantity; nothing was changed.
    Insufficient,
}

/// Reads the user's cart with current price and stock, locking each product
/// row until `tx` ends. Returns an empty list for an empty cart.
pub async fn lock_cart_for_checkout<T: StoreTransaction>(
    tx: &mut T,
    user_id: UserId,
) -> Result<Vec<StockSnapshotRow>, StoreError> {
    tx.lock_cart_lines(user_id).await
}

/// Decrements stock only if at least `quantity` units remain.
pub async fn deduct<T: StoreTransaction>(
    tx: &mut T,
    product_id: &ProductId,
    quantity: u32,
) -> Result<Deduction, StoreError> {
    if tx.decrement_stock_if_available(product_id, quantity).await? {
        Ok(Deduction::Applied)
    } else {
        Ok(Deduction::Insufficient)
    }
}

/// Puts `quantity` units back into stock.
pub async fn restore<T: StoreTransaction>(
    tx: &mut T,
    product_id: &ProductId,
    quantity: u32,
) -> Result<(), StoreError> {
    tx.increment_stock(product_id, quantity).await?;
    metrics::counter!("stock_restored_units_total").increment(u64::from(quantity));
    Ok(())
}
