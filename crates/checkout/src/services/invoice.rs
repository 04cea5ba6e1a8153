//! Invoice rendering.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use serde::Serialize;

use super::EffectError;

/// Reference to a rendered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentHandle {
    pub uri: String,
    pub content_type: String,
}

/// Trait for turning an order into an invoice document.
#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(&self, order: &Order) -> Result<DocumentHandle, EffectError>;
}

#[derive(Debug, Default)]
struct InvoiceState {
    documents: HashMap<OrderId, String>,
    fail: bool,
}

/// Renders plain-text invoices and keeps them in memory.
#[derive(Debug, Clone, Default)]
pub struct TextInvoiceRenderer {
    state: Arc<RwLock<InvoiceState>>,
}

impl TextInvoiceRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InvoiceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InvoiceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the renderer to fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.write().fail = fail;
    }

    /// Returns the rendered text of an order's invoice.
    pub fn document(&self, order_id: OrderId) -> Option<String> {
        self.read().documents.get(&order_id).cloned()
    }

    /// Returns the number of invoices rendered.
    pub fn rendered_count(&self) -> usize {
        self.read().documents.len()
    }
}

fn render_text(order: &Order) -> String {
    let mut out = String::new();
    let address = &order.shipping_address;

    let _ = writeln!(out, "INVOICE {}", order.id);
    let _ = writeln!(out, "Date: {}", order.created_at.format("%Y-%m-%d"));
    let _ = writeln!(out, "Ship to: {}", address.name);
    let _ = writeln!(out, "         {}", address.line1);
    if let Some(line2) = address.line2.as_deref().filter(|l| !l.is_empty()) {
        let _ = writeln!(out, "         {line2}");
    }
    let _ = writeln!(out, "         {} {}", address.postal, address.city);
    let _ = writeln!(out, "         {}", address.country);
    let _ = writeln!(out);

    for item in &order.items {
        let line_total = item
            .unit_price
            .checked_multiply(item.quantity)
            .map(|m| m.to_string())
            .unwrap_or_else(|_| "-".to_string());
        let _ = writeln!(
            out,
            "{:<16} {:>4} x {:>10} = {:>10}",
            item.product_id.as_str(),
            item.quantity,
            item.unit_price.to_string(),
            line_total
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Subtotal: {}", order.totals.subtotal());
    let _ = writeln!(out, "Tax:      {}", order.totals.tax());
    let _ = writeln!(out, "Shipping: {}", order.totals.shipping());
    let _ = writeln!(out, "Total:    {}", order.totals.total());
    out
}

#[async_trait]
impl InvoiceRenderer for TextInvoiceRenderer {
    async fn render(&self, order: &Order) -> Result<DocumentHandle, EffectError> {
        let mut state = self.write();
        if state.fail {
            return Err(EffectError::Invoice("renderer unavailable".to_string()));
        }

        state.documents.insert(order.id, render_text(order));
        Ok(DocumentHandle {
            uri: format!("memory://invoices/{}.txt", order.id),
            content_type: "text/plain".to_string(),
        })
    }
}
