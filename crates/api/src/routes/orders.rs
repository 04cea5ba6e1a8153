//! Customer-facing order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use checkout::CheckoutRequest;
use common::OrderId;
use order_store::OrderStore;
use uuid::Uuid;

use crate::AppState;
use crate::error::reply_response;
use crate::identity::Identity;

/// POST /orders: place an order for the caller's cart.
///
/// 201 for a new order, 200 when the idempotency key was already used.
pub async fn place<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(actor): Identity,
    Json(request): Json<CheckoutRequest>,
) -> Response {
    let reply = state.checkout.place_order(actor.user_id, &request).await;
    reply_response(reply, StatusCode::CREATED)
}

/// GET /orders/{id}: the order with its items.
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Response {
    let reply = state
        .queries
        .get_order(&actor, OrderId::from_uuid(id))
        .await;
    reply_response(reply, StatusCode::OK)
}

/// GET /orders/{id}/invoice: render the order's invoice.
pub async fn invoice<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Response {
    let reply = state
        .queries
        .render_invoice(&actor, OrderId::from_uuid(id))
        .await;
    reply_response(reply, StatusCode::OK)
}
