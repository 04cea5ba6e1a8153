//! Checkout tuning knobs.

use std::time::Duration;

use domain::IdempotencyKey;

/// Settings for the checkout orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// ISO currency code sent to the payment gateway.
    pub currency: String,

    /// Upper bound on a single authorization call.
    pub payment_timeout: Duration,

    /// Shortest accepted idempotency key.
    pub min_idempotency_key_len: usize,
}

impl CheckoutConfig {
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            payment_timeout: Duration::from_secs(10),
            min_idempotency_key_len: IdempotencyKey::DEFAULT_MIN_LEN,
        }
    }
}
