//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::{ErrorKind, Reply};
use serde::Serialize;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller's identity headers are missing or malformed.
    #[error("{0}")]
    Unauthenticated(String),

    /// A request parameter could not be interpreted.
    #[error("{0}")]
    BadRequest(String),

    /// The pipeline rejected the operation.
    #[error("{message}")]
    Rejected { kind: ErrorKind, message: String },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected { kind, .. } => status_for(*kind),
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthenticated(_) => ErrorKind::Auth,
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Rejected { kind, .. } => *kind,
        }
    }
}

/// HTTP status for a pipeline error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Payment => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::Auth => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: ErrorKind,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: &message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Turns a pipeline reply into an HTTP response.
///
/// `success` is used for fresh results; idempotent replays always answer 200.
pub fn reply_response<T: Serialize>(reply: Reply<T>, success: StatusCode) -> Response {
    match reply.error_kind() {
        Some(kind) => ApiError::Rejected {
            kind,
            message: reply.message().to_string(),
        }
        .into_response(),
        None => {
            let status = if matches!(reply, Reply::Success { .. }) {
                success
            } else {
                StatusCode::OK
            };
            (status, Json(reply)).into_response()
        }
    }
}
