//! Operator endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{OrderId, UserId};
use domain::OrderStatus;
use order_store::{OrderQuery, OrderStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, reply_response};
use crate::identity::Identity;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub user_id: Option<Uuid>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListParams {
    fn into_query(self) -> Result<OrderQuery, ApiError> {
        let mut query = OrderQuery::new();
        if let Some(status) = self.status {
            let status = status
                .parse::<OrderStatus>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            query = query.status(status);
        }
        if let Some(user_id) = self.user_id {
            query = query.user(UserId::from_uuid(user_id));
        }
        query.page = self.page;
        query.limit = self.limit;
        Ok(query)
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// GET /admin/orders: page through all orders, newest first.
pub async fn list<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(actor): Identity,
    Query(params): Query<ListParams>,
) -> Response {
    let query = match params.into_query() {
        Ok(query) => query,
        Err(e) => return e.into_response(),
    };
    let reply = state.queries.list_orders(&actor, &query).await;
    reply_response(reply, StatusCode::OK)
}

/// PATCH /admin/orders/{id}/status: move an order through its lifecycle.
pub async fn update_status<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Response {
    let reply = state
        .lifecycle
        .transition_by_name(&actor, OrderId::from_uuid(id), &update.status)
        .await;
    reply_response(reply, StatusCode::OK)
}
