//! Checkout validation endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use checkout::CheckoutRequest;
use order_store::OrderStore;

use crate::AppState;
use crate::error::reply_response;
use crate::identity::Identity;

/// POST /checkout/validate: dry-run a checkout against the caller's cart.
pub async fn validate<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(actor): Identity,
    Json(request): Json<CheckoutRequest>,
) -> Response {
    let reply = state
        .checkout
        .validate_checkout(actor.user_id, &request)
        .await;
    reply_response(reply, StatusCode::OK)
}
