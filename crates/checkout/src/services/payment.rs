//! Payment gateway trait and simulated implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::UserId;
use domain::{IdempotencyKey, Money, PaymentMethod};
use thiserror::Error;

/// A request to authorize a charge.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub user_id: UserId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub currency: String,
    /// Together with `user_id`, lets the gateway deduplicate retried
    /// authorizations.
    pub idempotency_key: IdempotencyKey,
}

/// Business outcome of an authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Approved { payment_id: String },
    Declined { reason: Option<String> },
}

/// Transport or gateway-side failure. Distinct from a decline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown payment: {0}")]
    UnknownPayment(String),
}

/// Trait for payment gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorizes a charge. Retrying with the same idempotency key returns the
    /// original outcome instead of charging again.
    async fn authorize(&self, request: &PaymentRequest) -> Result<Authorization, GatewayError>;

    /// Refunds a previously approved payment. A refunded payment is never
    /// returned again for its idempotency key.
    async fn refund(&self, payment_id: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Default)]
struct SimulatedState {
    /// Approved payment id per (user, idempotency key).
    by_key: HashMap<(UserId, String), String>,
    /// Amount per approved payment id.
    payments: HashMap<String, Money>,
    refunded: Vec<String>,
    authorize_calls: usize,
    refund_attempts: usize,
    decline_reason: Option<String>,
    declining: bool,
    fail_on_authorize: bool,
    fail_on_refund: bool,
    latency: Duration,
}

/// Gateway stand-in that approves every positive amount.
///
/// Card payments get `pay_…` ids and cash-on-delivery gets `cod_…` ids.
/// Switches allow tests to force declines, transport failures, failed refunds
/// and slow responses.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedGateway {
    /// Creates a new simulated gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Declines every subsequent authorization with an optional reason.
    pub fn set_decline(&self, decline: bool, reason: Option<&str>) {
        let mut state = self.state();
        state.declining = decline;
        state.decline_reason = reason.map(str::to_string);
    }

    /// Makes authorizations fail with a transport error.
    pub fn set_fail_on_authorize(&self, fail: bool) {
        self.state().fail_on_authorize = fail;
    }

    /// Makes refunds fail with a transport error.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state().fail_on_refund = fail;
    }

    /// Delays every authorization by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Returns the number of authorize calls received.
    pub fn authorize_count(&self) -> usize {
        self.state().authorize_calls
    }

    /// Returns the number of refund calls received, successful or not.
    pub fn refund_attempts(&self) -> usize {
        self.state().refund_attempts
    }

    /// Returns the ids of successfully refunded payments.
    pub fn refunded_payments(&self) -> Vec<String> {
        self.state().refunded.clone()
    }

    /// Returns the number of distinct approved payments.
    pub fn payment_count(&self) -> usize {
        self.state().payments.len()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(&self, request: &PaymentRequest) -> Result<Authorization, GatewayError> {
        let latency = {
            let mut state = self.state();
            state.authorize_calls += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if state.fail_on_authorize {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        let dedup_key = (request.user_id, request.idempotency_key.as_str().to_string());
        if let Some(payment_id) = state.by_key.get(&dedup_key) {
            return Ok(Authorization::Approved {
                payment_id: payment_id.clone(),
            });
        }
        if state.declining {
            return Ok(Authorization::Declined {
                reason: state.decline_reason.clone(),
            });
        }
        if !request.amount.is_positive() {
            return Ok(Authorization::Declined {
                reason: Some("Invalid amount".to_string()),
            });
        }

        let payment_id = match &request.method {
            PaymentMethod::Card(card) => {
                tracing::debug!(card = %card.masked_number(), amount = %request.amount, "card authorized");
                format!("pay_{}", uuid::Uuid::new_v4().simple())
            }
            PaymentMethod::CashOnDelivery => format!("cod_{}", uuid::Uuid::new_v4().simple()),
        };
        state.by_key.insert(dedup_key, payment_id.clone());
        state.payments.insert(payment_id.clone(), request.amount);

        Ok(Authorization::Approved { payment_id })
    }

    async fn refund(&self, payment_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.refund_attempts += 1;

        if state.fail_on_refund {
            return Err(GatewayError::Unavailable("refund endpoint timed out".to_string()));
        }
        if !state.payments.contains_key(payment_id) {
            return Err(GatewayError::UnknownPayment(payment_id.to_string()));
        }
        if !state.refunded.iter().any(|id| id == payment_id) {
            state.refunded.push(payment_id.to_string());
        }
        state.by_key.retain(|_, id| id != payment_id);
        Ok(())
    }
}
