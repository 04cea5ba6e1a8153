//! Operational alerts for payments that need manual reconciliation.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::Money;
use serde::Serialize;

/// A payment was authorized, the order was not committed, and the refund failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationAlert {
    pub user_id: UserId,
    /// Id the order would have had.
    pub order_id: OrderId,
    pub payment_id: String,
    pub amount: Money,
    pub reason: String,
    pub raised_at: DateTime<Utc>,
}

/// Destination for reconciliation alerts.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: ReconciliationAlert);
}

/// Emits alerts as error-level events on the `reconciliation` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: ReconciliationAlert) {
        tracing::error!(
            target: "reconciliation",
            user_id = %alert.user_id,
            order_id = %alert.order_id,
            payment_id = %alert.payment_id,
            amount = %alert.amount,
            reason = %alert.reason,
            "authorized payment left without an order; refund failed"
        );
    }
}

/// Records alerts in memory for inspection by tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAlertSink {
    alerts: Arc<RwLock<Vec<ReconciliationAlert>>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<ReconciliationAlert> {
        self.alerts
            .read()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }
}

impl AlertSink for InMemoryAlertSink {
    fn raise(&self, alert: ReconciliationAlert) {
        if let Ok(mut alerts) = self.alerts.write() {
            alerts.push(alert);
        }
    }
}
