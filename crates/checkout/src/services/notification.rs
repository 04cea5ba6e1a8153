//! Order confirmation notifications.

use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use common::OrderId;

use super::EffectError;

/// Trait for sending order confirmations to customers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmed(&self, email: &str, order_id: OrderId) -> Result<(), EffectError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_confirmed(&self, email: &str, order_id: OrderId) -> Result<(), EffectError> {
        tracing::info!(%order_id, %email, "order confirmation sent");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct NotifierState {
    sent: Vec<(String, OrderId)>,
    fail: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<NotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, NotifierState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the notifier to fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.write().fail = fail;
    }

    /// Returns every `(email, order)` confirmation sent so far.
    pub fn sent(&self) -> Vec<(String, OrderId)> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn order_confirmed(&self, email: &str, order_id: OrderId) -> Result<(), EffectError> {
        let mut state = self.write();
        if state.fail {
            return Err(EffectError::Notification("mail relay unavailable".to_string()));
        }
        state.sent.push((email.to_string(), order_id));
        Ok(())
    }
}
