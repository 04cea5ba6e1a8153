//! HTTP API server for the order-placement pipeline.
//!
//! Thin axum layer over the checkout crate: identity comes from upstream
//! headers, every pipeline [`checkout::Reply`] maps onto an HTTP status, and
//! Prometheus metrics are exposed on `/metrics`.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use checkout::{
    CheckoutConfig, CheckoutOrchestrator, OrderLifecycle, OrderQueries, SimulatedGateway,
    TextInvoiceRenderer,
};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore + Clone + 'static> {
    pub checkout: CheckoutOrchestrator<S, SimulatedGateway>,
    pub lifecycle: OrderLifecycle<S>,
    pub queries: OrderQueries<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout/validate", post(routes::checkout::validate::<S>))
        .route("/orders", post(routes::orders::place::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/invoice", get(routes::orders::invoice::<S>))
        .route("/admin/orders", get(routes::admin::list::<S>))
        .route(
            "/admin/orders/{id}/status",
            patch(routes::admin::update_status::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the pipeline over `store` with the simulated payment gateway.
pub fn create_state<S: OrderStore + Clone + 'static>(
    store: S,
    config: CheckoutConfig,
) -> Arc<AppState<S>> {
    let invoices = Arc::new(TextInvoiceRenderer::new());

    let checkout = CheckoutOrchestrator::new(store.clone(), SimulatedGateway::new())
        .with_config(config)
        .with_invoice_renderer(invoices.clone());

    Arc::new(AppState {
        checkout,
        lifecycle: OrderLifecycle::new(store.clone()),
        queries: OrderQueries::new(store, invoices),
    })
}
