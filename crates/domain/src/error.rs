//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised when input or state violates a domain rule.
///
/// All variants describe caller-correctable problems; none of them carry
/// storage or transport details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The idempotency key is absent or too short.
    #[error("Missing idempotency key")]
    MissingIdempotencyKey,

    /// A required shipping address field is blank.
    #[error("Invalid address")]
    InvalidAddress { field: &'static str },

    /// The payment method is not one of the supported methods.
    #[error("Invalid payment method")]
    InvalidPaymentMethod { method: String },

    /// The status name is unknown or not accepted as a target.
    #[error("Invalid status")]
    InvalidStatus { status: String },

    /// The requested status is not reachable from the current one.
    #[error("Invalid transition")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A money computation exceeded the representable range.
    #[error("Amount out of range")]
    AmountOverflow,

    /// Stored totals do not add up.
    #[error("Order totals are inconsistent")]
    InconsistentTotals,
}
