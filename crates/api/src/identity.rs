//! Caller identity supplied by the upstream authentication layer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;
use domain::{Actor, Role};
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller, read from `x-user-id` and `x-user-role`.
///
/// A missing role header means `customer`.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_id = header(parts, USER_ID_HEADER)?
            .ok_or_else(|| ApiError::Unauthenticated("Missing user identity".to_string()))?;
        let user_id = Uuid::parse_str(raw_id)
            .map(UserId::from_uuid)
            .map_err(|_| ApiError::Unauthenticated("Invalid user identity".to_string()))?;

        let role = match header(parts, USER_ROLE_HEADER)? {
            Some(raw) => raw
                .parse::<Role>()
                .map_err(|_| ApiError::Unauthenticated("Invalid user role".to_string()))?,
            None => Role::Customer,
        };

        Ok(Identity(Actor { user_id, role }))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::Unauthenticated(format!("Malformed {name} header")))
        })
        .transpose()
}
