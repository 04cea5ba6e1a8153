//! Order entity, its line items, and the rows checkout reads to build one.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::Serialize;

use super::{Money, OrderStatus, PaymentStatus, ProductId, ShippingAddress};
use crate::totals::Totals;

/// A line of a placed order.
///
/// `unit_price` is the price captured at checkout; later catalog price
/// changes never touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(product_id: impl Into<ProductId>, unit_price: Money, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            unit_price,
            quantity,
        }
    }
}

/// Current price and stock of one cart line, read under a row lock.
///
/// Only meaningful inside the transaction that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockSnapshotRow {
    pub product_id: ProductId,
    pub price: Money,
    pub stock: i32,
    pub requested_quantity: i32,
}

impl StockSnapshotRow {
    /// Returns true if the product has enough stock for the requested quantity.
    pub fn has_sufficient_stock(&self) -> bool {
        self.stock >= self.requested_quantity
    }
}

/// Everything needed to persist an order in the commit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub totals: Totals,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub placed_at: DateTime<Utc>,
}

/// A persisted order with its items.
///
/// Immutable after creation except for `status`, `payment_status`,
/// `payment_id` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    #[serde(flatten)]
    pub totals: Totals,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Returns the order total.
    pub fn total(&self) -> Money {
        self.totals.total()
    }

    /// Returns the number of units across all items.
    pub fn unit_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Returns a listing row for this order.
    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            id: self.id,
            user_id: self.user_id,
            status: self.status,
            total: self.total(),
            created_at: self.created_at,
        }
    }
}

impl From<NewOrder> for Order {
    fn from(new: NewOrder) -> Self {
        Self {
            id: new.id,
            user_id: new.user_id,
            status: new.status,
            payment_status: new.payment_status,
            payment_id: new.payment_id,
            totals: new.totals,
            shipping_address: new.shipping_address,
            items: new.items,
            created_at: new.placed_at,
            updated_at: new.placed_at,
        }
    }
}

/// Compact order row used by operator listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Money,
    pub created_at: DateTime<Utc>,
}
