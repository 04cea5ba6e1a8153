//! External collaborators of the checkout saga and their in-memory stand-ins.

pub mod alerts;
pub mod invoice;
pub mod notification;
pub mod payment;

use thiserror::Error;

pub use alerts::{AlertSink, InMemoryAlertSink, ReconciliationAlert, TracingAlertSink};
pub use invoice::{DocumentHandle, InvoiceRenderer, TextInvoiceRenderer};
pub use notification::{InMemoryNotifier, LogNotifier, Notifier};
pub use payment::{Authorization, GatewayError, PaymentGateway, PaymentRequest, SimulatedGateway};

/// Failure of a best-effort post-commit effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("Invoice rendering failed: {0}")]
    Invoice(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}
