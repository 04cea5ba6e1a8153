//! Tagged result value returned by the inbound operations.

use serde::Serialize;

use crate::error::{CheckoutError, ErrorKind};

/// Outcome of an inbound operation.
///
/// Serialized with a `type` discriminator:
/// `{"type": "success", "message": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply<T> {
    Success { message: String, data: T },
    /// The request was a retry of one that already succeeded.
    Idempotent { message: String, data: T },
    ValidationError { message: String },
    ConflictError { message: String },
    PaymentError { message: String },
    AuthError { message: String },
    NotFound { message: String },
    ServerError { message: String },
}

impl<T> Reply<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Reply::Success {
            message: message.into(),
            data,
        }
    }

    pub fn idempotent(message: impl Into<String>, data: T) -> Self {
        Reply::Idempotent {
            message: message.into(),
            data,
        }
    }

    /// Converts an error into the matching failure variant.
    pub fn from_error(err: &CheckoutError) -> Self {
        let message = err.public_message();
        match err.kind() {
            ErrorKind::Validation => Reply::ValidationError { message },
            ErrorKind::Conflict => Reply::ConflictError { message },
            ErrorKind::Payment => Reply::PaymentError { message },
            ErrorKind::Auth => Reply::AuthError { message },
            ErrorKind::NotFound => Reply::NotFound { message },
            ErrorKind::Server => Reply::ServerError { message },
        }
    }

    /// Returns the error kind, or None for the success variants.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Reply::Success { .. } | Reply::Idempotent { .. } => None,
            Reply::ValidationError { .. } => Some(ErrorKind::Validation),
            Reply::ConflictError { .. } => Some(ErrorKind::Conflict),
            Reply::PaymentError { .. } => Some(ErrorKind::Payment),
            Reply::AuthError { .. } => Some(ErrorKind::Auth),
            Reply::NotFound { .. } => Some(ErrorKind::NotFound),
            Reply::ServerError { .. } => Some(ErrorKind::Server),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_kind().is_none()
    }

    pub fn message(&self) -> &str {
        match self {
            Reply::Success { message, .. }
            | Reply::Idempotent { message, .. }
            | Reply::ValidationError { message }
            | Reply::ConflictError { message }
            | Reply::PaymentError { message }
            | Reply::AuthError { message }
            | Reply::NotFound { message }
            | Reply::ServerError { message } => message,
        }
    }

    /// Returns the payload of a success variant.
    pub fn data(&self) -> Option<&T> {
        match self {
            Reply::Success { data, .. } | Reply::Idempotent { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Reply::Success { data, .. } | Reply::Idempotent { data, .. } => Some(data),
            _ => None,
        }
    }
}

impl<T> From<CheckoutError> for Reply<T> {
    fn from(err: CheckoutError) -> Self {
        Reply::from_error(&err)
    }
}
