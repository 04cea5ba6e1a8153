//! Order placement: the checkout saga and the order lifecycle.
//!
//! [`CheckoutOrchestrator`] converts a cart into a paid order in two store
//! transactions around the payment authorization, refunding the payment if
//! the second transaction cannot commit. [`OrderLifecycle`] applies operator
//! status transitions and restores stock on cancellation. Every inbound
//! operation returns a tagged [`Reply`].

pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod lifecycle;
pub mod orchestrator;
pub mod queries;
pub mod reply;
pub mod services;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, ErrorKind};
pub use idempotency::IdempotencyGuard;
pub use ledger::Deduction;
pub use lifecycle::OrderLifecycle;
pub use orchestrator::{
    CheckoutOrchestrator, CheckoutPreview, CheckoutRequest, PlacedOrder, ValidationOutcome,
};
pub use queries::OrderQueries;
pub use reply::Reply;
pub use services::{
    AlertSink, Authorization, DocumentHandle, EffectError, GatewayError, InMemoryAlertSink,
    InMemoryNotifier, InvoiceRenderer, LogNotifier, Notifier, PaymentGateway, PaymentRequest,
    ReconciliationAlert, SimulatedGateway, TextInvoiceRenderer, TracingAlertSink,
};
