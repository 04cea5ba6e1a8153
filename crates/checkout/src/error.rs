//! Checkout error types.

use domain::DomainError;
use order_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Stable, caller-visible classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "conflict_error")]
    Conflict,
    #[serde(rename = "payment_error")]
    Payment,
    #[serde(rename = "auth_error")]
    Auth,
    #[serde(rename = "not_found")]
    NotFound,
    #[serde(rename = "server_error")]
    Server,
}

impl ErrorKind {
    /// Returns the wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Conflict => "conflict_error",
            ErrorKind::Payment => "payment_error",
            ErrorKind::Auth => "auth_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Server => "server_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during checkout and order management.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Malformed input, empty cart or stock shortfall seen in the snapshot.
    #[error("{0}")]
    Validation(String),

    /// Stock or order status moved between the check and the write.
    #[error("{0}")]
    Conflict(String),

    /// The gateway declined, or the outcome of the charge is unknown.
    #[error("{message}")]
    Payment {
        message: String,
        /// True when the gateway never gave a definite answer.
        indeterminate: bool,
    },

    /// The actor is not allowed to perform the operation.
    #[error("{0}")]
    Auth(String),

    /// The order does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Data that should be impossible was found (e.g. a non-positive cart quantity).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unexpected store failure. The message is safe to show to callers.
    #[error("{message}")]
    Server {
        message: &'static str,
        #[source]
        source: StoreError,
    },
}

impl CheckoutError {
    /// Builds a definite payment rejection.
    pub fn declined(message: impl Into<String>) -> Self {
        CheckoutError::Payment {
            message: message.into(),
            indeterminate: false,
        }
    }

    /// Builds a payment error whose outcome at the gateway is unknown.
    pub fn payment_unknown(message: impl Into<String>) -> Self {
        CheckoutError::Payment {
            message: message.into(),
            indeterminate: true,
        }
    }

    /// Wraps a store failure behind a generic message.
    pub fn server(message: &'static str, source: StoreError) -> Self {
        CheckoutError::Server { message, source }
    }

    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::Validation(_) => ErrorKind::Validation,
            CheckoutError::Conflict(_) => ErrorKind::Conflict,
            CheckoutError::Payment { .. } => ErrorKind::Payment,
            CheckoutError::Auth(_) => ErrorKind::Auth,
            CheckoutError::NotFound(_) => ErrorKind::NotFound,
            CheckoutError::InvalidState(_) | CheckoutError::Server { .. } => ErrorKind::Server,
        }
    }

    /// Returns the message shown to callers. Never contains store details.
    pub fn public_message(&self) -> String {
        match self {
            CheckoutError::InvalidState(_) => "Checkout failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DomainError> for CheckoutError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::AmountOverflow | DomainError::InconsistentTotals => {
                CheckoutError::InvalidState(e.to_string())
            }
            other => CheckoutError::Validation(other.to_string()),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
