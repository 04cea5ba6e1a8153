//! Operator-driven order status transitions.

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Actor, Order, OrderStatus};
use order_store::{OrderStore, StoreTransaction};

use crate::error::{CheckoutError, ErrorKind, Result};
use crate::ledger;
use crate::reply::Reply;

/// Applies status transitions, restoring stock when an unshipped order is
/// cancelled.
#[derive(Clone)]
pub struct OrderLifecycle<S> {
    store: S,
}

impl<S: OrderStore> OrderLifecycle<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Moves an order to `new_status`.
    ///
    /// Checks, in order: operator privilege, order existence, the transition
    /// table. The status update is conditional on the status the check was
    /// made against, so two operators racing on the same order cannot both
    /// succeed.
    #[tracing::instrument(skip_all, fields(%order_id, to = %new_status))]
    pub async fn transition(
        &self,
        actor: &Actor,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Reply<Order> {
        self.reply(self.try_transition(actor, order_id, new_status).await)
    }

    /// Like [`OrderLifecycle::transition`], taking the status by name.
    ///
    /// Unknown names and `payment_failed` are rejected as invalid statuses.
    pub async fn transition_by_name(
        &self,
        actor: &Actor,
        order_id: OrderId,
        status: &str,
    ) -> Reply<Order> {
        if !actor.is_operator() {
            return self.reply(Err(forbidden()));
        }
        match OrderStatus::parse_operator_target(status) {
            Ok(new_status) => self.transition(actor, order_id, new_status).await,
            Err(e) => self.reply(Err(e.into())),
        }
    }

    fn reply(&self, result: Result<Order>) -> Reply<Order> {
        match result {
            Ok(order) => Reply::success("Order status updated", order),
            Err(err) => {
                if err.kind() == ErrorKind::Server {
                    tracing::error!(error = ?err, "status transition failed");
                } else {
                    tracing::warn!(message = %err, "status transition rejected");
                }
                Reply::from_error(&err)
            }
        }
    }

    async fn try_transition(
        &self,
        actor: &Actor,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<Order> {
        if !actor.is_operator() {
            return Err(forbidden());
        }

        let order = self
            .store
            .get_order(order_id)
            .await
            .map_err(|e| CheckoutError::server("Failed to update order status", e))?
            .ok_or_else(|| CheckoutError::NotFound("Order not found".to_string()))?;

        order.status.transition_to(new_status)?;

        let now = Utc::now();
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| CheckoutError::server("Failed to update order status", e))?;

        match self.apply(&mut tx, &order, new_status, now).await {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| CheckoutError::server("Failed to update order status", e))?,
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "rollback of status transition failed");
                }
                return Err(err);
            }
        }

        metrics::counter!("order_status_transitions_total", "to" => new_status.as_str())
            .increment(1);
        tracing::info!(from = %order.status, by = %actor.user_id, "order status changed");

        Ok(Order {
            status: new_status,
            updated_at: now,
            ..order
        })
    }

    async fn apply(
        &self,
        tx: &mut S::Tx,
        order: &Order,
        new_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = tx
            .update_order_status(order.id, order.status, new_status, at)
            .await
            .map_err(|e| CheckoutError::server("Failed to update order status", e))?;
        if !updated {
            return Err(CheckoutError::Conflict(
                "Order status changed concurrently".to_string(),
            ));
        }

        if order.status.restores_stock_on(new_status) {
            for item in &order.items {
                ledger::restore(tx, &item.product_id, item.quantity)
                    .await
                    .map_err(|e| CheckoutError::server("Failed to update order status", e))?;
            }
            tracing::info!(units = order.unit_count(), "stock restored");
        }
        Ok(())
    }
}

fn forbidden() -> CheckoutError {
    CheckoutError::Auth("Forbidden".to_string())
}
