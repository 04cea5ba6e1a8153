//! Read-side operations on placed orders.

use std::sync::Arc;

use common::OrderId;
use domain::{Actor, Order};
use order_store::{OrderPage, OrderQuery, OrderStore};

use crate::error::{CheckoutError, Result};
use crate::reply::Reply;
use crate::services::{DocumentHandle, InvoiceRenderer};

/// Order lookups with ownership checks.
pub struct OrderQueries<S> {
    store: S,
    invoices: Arc<dyn InvoiceRenderer>,
}

impl<S: OrderStore> OrderQueries<S> {
    pub fn new(store: S, invoices: Arc<dyn InvoiceRenderer>) -> Self {
        Self { store, invoices }
    }

    /// Returns an order with its items to its owner or an operator.
    #[tracing::instrument(skip_all, fields(%order_id))]
    pub async fn get_order(&self, actor: &Actor, order_id: OrderId) -> Reply<Order> {
        match self.owned_order(actor, order_id).await {
            Ok(order) => Reply::success("Order found", order),
            Err(err) => Reply::from_error(&err),
        }
    }

    /// Lists orders for operators, newest first.
    #[tracing::instrument(skip_all)]
    pub async fn list_orders(&self, actor: &Actor, query: &OrderQuery) -> Reply<OrderPage> {
        if !actor.is_operator() {
            return Reply::from_error(&CheckoutError::Auth("Forbidden".to_string()));
        }
        match self.store.list_orders(query).await {
            Ok(page) => Reply::success("Orders listed", page),
            Err(e) => {
                tracing::error!(error = %e, "order listing failed");
                Reply::from_error(&CheckoutError::server("Failed to list orders", e))
            }
        }
    }

    /// Renders the invoice of an order for its owner or an operator.
    #[tracing::instrument(skip_all, fields(%order_id))]
    pub async fn render_invoice(&self, actor: &Actor, order_id: OrderId) -> Reply<DocumentHandle> {
        let order = match self.owned_order(actor, order_id).await {
            Ok(order) => order,
            Err(err) => return Reply::from_error(&err),
        };
        match self.invoices.render(&order).await {
            Ok(document) => Reply::success("Invoice rendered", document),
            Err(e) => {
                tracing::error!(error = %e, "invoice rendering failed");
                Reply::ServerError {
                    message: "Failed to render invoice".to_string(),
                }
            }
        }
    }

    async fn owned_order(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "order lookup failed");
                CheckoutError::server("Failed to load order", e)
            })?
            .ok_or_else(|| CheckoutError::NotFound("Order not found".to_string()))?;

        if !actor.can_access(order.user_id) {
            return Err(CheckoutError::Auth("Forbidden".to_string()));
        }
        Ok(order)
    }
}
