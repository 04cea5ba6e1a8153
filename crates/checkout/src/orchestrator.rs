//! Checkout orchestrator: turns a cart into a paid order.
//!
//! The saga runs in this order:
//! 1. Validate the request and look up the idempotency key
//! 2. Transaction A: lock the cart lines, check stock, compute totals, commit
//! 3. Authorize the payment, outside any transaction
//! 4. Transaction B: conditionally deduct stock, write order, items and
//!    idempotency record, clear the cart, commit
//! 5. Spawn invoice rendering and the confirmation notification
//!
//! If Transaction B fails after an approved authorization, the payment is
//! refunded. A refund that also fails raises a [`ReconciliationAlert`].
//! Either way the authorization is spent: a retry with the same idempotency
//! key asks the gateway for a fresh one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{
    IdempotencyKey, Money, NewOrder, Order, OrderItem, OrderStatus, PaymentInput, PaymentMethod,
    PaymentStatus, ProductId, ShippingAddress, Totals, TotalsCalculator,
};
use order_store::{OrderStore, StoreError, StoreTransaction};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, ErrorKind, Result};
use crate::idempotency::IdempotencyGuard;
use crate::ledger::{self, Deduction};
use crate::reply::Reply;
use crate::services::{
    AlertSink, Authorization, InvoiceRenderer, LogNotifier, Notifier, PaymentGateway,
    PaymentRequest, ReconciliationAlert, TextInvoiceRenderer, TracingAlertSink,
};

const EMPTY_CART: &str = "Cart is empty";
const STOCK_CHANGED: &str = "Stock changed; order not placed";
const PAYMENT_UNKNOWN: &str =
    "Payment could not be confirmed; retry with the same idempotency key";

/// Checkout input as submitted by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutRequest {
    #[serde(alias = "address")]
    pub shipping_address: ShippingAddress,
    pub payment: PaymentInput,
    #[serde(alias = "idempotencyKey")]
    pub idempotency_key: String,
}

/// What the customer would be charged if they placed the order now.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutPreview {
    pub shipping_address: ShippingAddress,
    pub payment_method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_card: Option<String>,
    pub items: Vec<OrderItem>,
    #[serde(flatten)]
    pub totals: Totals,
}

/// Payload of a successful `validate_checkout`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ValidationOutcome {
    /// The request is valid and the cart can be checked out.
    Ready(CheckoutPreview),
    /// The idempotency key was already used; this is the order it produced.
    AlreadyPlaced(Box<Order>),
}

/// Payload of a successful `place_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub total: Money,
}

impl From<&Order> for PlacedOrder {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            total: order.total(),
        }
    }
}

enum Placement {
    Created(PlacedOrder),
    Replayed(PlacedOrder),
}

struct ValidCheckout {
    address: ShippingAddress,
    method: PaymentMethod,
    key: IdempotencyKey,
}

struct CartSnapshot {
    items: Vec<OrderItem>,
    totals: Totals,
}

/// Why Transaction B did not commit.
enum CommitFailure {
    StockChanged(ProductId),
    DuplicateKey,
    Store(StoreError),
}

impl From<StoreError> for CommitFailure {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdempotencyKey { .. } => CommitFailure::DuplicateKey,
            other => CommitFailure::Store(other),
        }
    }
}

/// Drives the checkout saga.
pub struct CheckoutOrchestrator<S, P>
where
    S: OrderStore,
    P: PaymentGateway,
{
    store: S,
    guard: IdempotencyGuard<S>,
    gateway: P,
    invoices: Arc<dyn InvoiceRenderer>,
    notifier: Arc<dyn Notifier>,
    alerts: Arc<dyn AlertSink>,
    totals: TotalsCalculator,
    config: CheckoutConfig,
    side_effects: Mutex<JoinSet<()>>,
    compensated: Mutex<Compensations>,
}

/// Authorizations that were refunded, or whose refund was attempted.
#[derive(Default)]
struct Compensations {
    attempts: HashMap<(UserId, IdempotencyKey), u32>,
    payments: HashSet<String>,
}

impl<S, P> CheckoutOrchestrator<S, P>
where
    S: OrderStore + Clone + 'static,
    P: PaymentGateway,
{
    /// Creates an orchestrator with default collaborators and configuration.
    pub fn new(store: S, gateway: P) -> Self {
        Self {
            guard: IdempotencyGuard::new(store.clone()),
            store,
            gateway,
            invoices: Arc::new(TextInvoiceRenderer::new()),
            notifier: Arc::new(LogNotifier),
            alerts: Arc::new(TracingAlertSink),
            totals: TotalsCalculator::default(),
            config: CheckoutConfig::default(),
            side_effects: Mutex::new(JoinSet::new()),
            compensated: Mutex::new(Compensations::default()),
        }
    }

    pub fn with_config(mut self, config: CheckoutConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_totals(mut self, totals: TotalsCalculator) -> Self {
        self.totals = totals;
        self
    }

    pub fn with_invoice_renderer(mut self, invoices: Arc<dyn InvoiceRenderer>) -> Self {
        self.invoices = invoices;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub fn gateway(&self) -> &P {
        &self.gateway
    }

    /// Checks a checkout request without charging or writing anything.
    ///
    /// Returns `idempotent` with the existing order if the key was already
    /// used, otherwise `success` with a priced preview of the cart.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub async fn validate_checkout(
        &self,
        user_id: UserId,
        request: &CheckoutRequest,
    ) -> Reply<ValidationOutcome> {
        match self.try_validate(user_id, request).await {
            Ok(ValidationOutcome::AlreadyPlaced(order)) => Reply::idempotent(
                "Order already placed",
                ValidationOutcome::AlreadyPlaced(order),
            ),
            Ok(preview) => Reply::success("Checkout is valid", preview),
            Err(err) => {
                log_rejection(&err);
                Reply::from_error(&err)
            }
        }
    }

    /// Places an order for everything in the user's cart.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub async fn place_order(&self, user_id: UserId, request: &CheckoutRequest) -> Reply<PlacedOrder> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();

        let reply = match self.try_place_order(user_id, request).await {
            Ok(Placement::Created(placed)) => {
                metrics::counter!("checkout_completed_total").increment(1);
                tracing::info!(order_id = %placed.order_id, total = %placed.total, "order placed");
                Reply::success("Order placed", placed)
            }
            Ok(Placement::Replayed(placed)) => {
                metrics::counter!("checkout_idempotent_replays_total").increment(1);
                tracing::info!(order_id = %placed.order_id, "idempotent replay");
                Reply::idempotent("Order already placed", placed)
            }
            Err(err) => {
                metrics::counter!("checkout_rejected_total", "kind" => err.kind().as_str())
                    .increment(1);
                log_rejection(&err);
                Reply::from_error(&err)
            }
        };

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        reply
    }

    /// Waits until every spawned post-commit task has finished.
    pub async fn wait_for_side_effects(&self) {
        let mut pending = match self.side_effects.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "post-commit task aborted");
            }
        }
    }

    fn parse_key(&self, request: &CheckoutRequest) -> Result<IdempotencyKey> {
        Ok(IdempotencyKey::parse(
            &request.idempotency_key,
            self.config.min_idempotency_key_len,
        )?)
    }

    /// Address and payment-method checks; runs after the idempotency lookup.
    fn validate_request(
        &self,
        request: &CheckoutRequest,
        key: IdempotencyKey,
    ) -> Result<ValidCheckout> {
        request.shipping_address.validate()?;
        let method = PaymentMethod::try_from(&request.payment)?;

        Ok(ValidCheckout {
            address: request.shipping_address.clone(),
            method,
            key,
        })
    }

    async fn lookup_existing(&self, user_id: UserId, key: &IdempotencyKey) -> Result<Option<Order>> {
        self.guard
            .lookup(user_id, key)
            .await
            .map_err(|e| CheckoutError::server("Checkout failed", e))
    }

    async fn try_validate(
        &self,
        user_id: UserId,
        request: &CheckoutRequest,
    ) -> Result<ValidationOutcome> {
        let key = self.parse_key(request)?;
        if let Some(existing) = self.lookup_existing(user_id, &key).await? {
            return Ok(ValidationOutcome::AlreadyPlaced(Box::new(existing)));
        }
        let checkout = self.validate_request(request, key)?;

        // Read-only pass over the cart; nothing is kept.
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| CheckoutError::server("Checkout failed", e))?;
        let snapshot = self.read_snapshot(&mut tx, user_id).await;
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, "rollback of validation read failed");
        }
        let snapshot =
            snapshot?.ok_or_else(|| CheckoutError::Validation(EMPTY_CART.to_string()))?;

        let masked_card = match &checkout.method {
            PaymentMethod::Card(card) => Some(card.masked_number()),
            PaymentMethod::CashOnDelivery => None,
        };
        Ok(ValidationOutcome::Ready(CheckoutPreview {
            shipping_address: checkout.address,
            payment_method: checkout.method.as_str(),
            masked_card,
            items: snapshot.items,
            totals: snapshot.totals,
        }))
    }

    async fn try_place_order(&self, user_id: UserId, request: &CheckoutRequest) -> Result<Placement> {
        let key = self.parse_key(request)?;

        tracing::info!(step = "idempotency_check", "checkout step started");
        if let Some(existing) = self.lookup_existing(user_id, &key).await? {
            return Ok(Placement::Replayed(PlacedOrder::from(&existing)));
        }

        tracing::info!(step = "validate", "checkout step started");
        let checkout = self.validate_request(request, key)?;

        tracing::info!(step = "snapshot", "checkout step started");
        let Some(snapshot) = self.snapshot_cart(user_id).await? else {
            // A concurrent request with the same key may have just consumed the cart.
            if let Some(existing) = self.lookup_existing(user_id, &checkout.key).await? {
                return Ok(Placement::Replayed(PlacedOrder::from(&existing)));
            }
            return Err(CheckoutError::Validation(EMPTY_CART.to_string()));
        };

        tracing::info!(step = "authorize_payment", amount = %snapshot.totals.total(), "checkout step started");
        let payment_id = self.authorize(user_id, &checkout, snapshot.totals.total()).await?;

        let new_order = NewOrder {
            id: OrderId::new(),
            user_id,
            status: OrderStatus::Paid,
            payment_status: PaymentStatus::Paid,
            payment_id: Some(payment_id.clone()),
            totals: snapshot.totals,
            shipping_address: checkout.address,
            items: snapshot.items,
            placed_at: Utc::now(),
        };

        tracing::info!(step = "commit", order_id = %new_order.id, "checkout step started");
        if let Err(failure) = self.commit_order(&new_order, &checkout.key).await {
            return self
                .compensate(&new_order, &payment_id, &checkout.key, failure)
                .await;
        }

        let placed = PlacedOrder {
            order_id: new_order.id,
            total: new_order.totals.total(),
        };
        self.spawn_side_effects(Order::from(new_order));
        Ok(Placement::Created(placed))
    }

    /// Transaction A. Returns None for an empty cart.
    async fn snapshot_cart(&self, user_id: UserId) -> Result<Option<CartSnapshot>> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| CheckoutError::server("Checkout failed", e))?;

        match self.read_snapshot(&mut tx, user_id).await {
            Ok(snapshot) => {
                tx.commit()
                    .await
                    .map_err(|e| CheckoutError::server("Checkout failed", e))?;
                Ok(snapshot)
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "rollback of snapshot transaction failed");
                }
                Err(err)
            }
        }
    }

    async fn read_snapshot(&self, tx: &mut S::Tx, user_id: UserId) -> Result<Option<CartSnapshot>> {
        let rows = ledger::lock_cart_for_checkout(tx, user_id)
            .await
            .map_err(|e| CheckoutError::server("Checkout failed", e))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let quantity = u32::try_from(row.requested_quantity)
                .ok()
                .filter(|q| *q > 0)
                .ok_or_else(|| {
                    CheckoutError::InvalidState(format!(
                        "cart quantity {} for product {}",
                        row.requested_quantity, row.product_id
                    ))
                })?;
            if !row.has_sufficient_stock() {
                return Err(CheckoutError::Validation(format!(
                    "Insufficient stock for product {}",
                    row.product_id
                )));
            }
            items.push(OrderItem::new(row.product_id, row.price, quantity));
        }

        let totals = self
            .totals
            .compute(items.iter().map(|item| (item.unit_price, item.quantity)))?;
        Ok(Some(CartSnapshot { items, totals }))
    }

    async fn authorize(
        &self,
        user_id: UserId,
        checkout: &ValidCheckout,
        amount: Money,
    ) -> Result<String> {
        let request = PaymentRequest {
            user_id,
            method: checkout.method.clone(),
            amount,
            currency: self.config.currency.clone(),
            idempotency_key: self.payment_key(user_id, &checkout.key)?,
        };

        let outcome =
            tokio::time::timeout(self.config.payment_timeout, self.gateway.authorize(&request))
                .await;

        match outcome {
            Ok(Ok(Authorization::Approved { payment_id }))
                if self.compensations().payments.contains(&payment_id) =>
            {
                tracing::warn!(%payment_id, "gateway returned an already compensated payment");
                Err(CheckoutError::payment_unknown(PAYMENT_UNKNOWN))
            }
            Ok(Ok(Authorization::Approved { payment_id })) => Ok(payment_id),
            Ok(Ok(Authorization::Declined { reason })) => Err(CheckoutError::declined(
                reason.unwrap_or_else(|| "Payment declined".to_string()),
            )),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "payment gateway failed; outcome unknown");
                Err(CheckoutError::payment_unknown(PAYMENT_UNKNOWN))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.payment_timeout.as_millis() as u64,
                    "payment authorization timed out; outcome unknown"
                );
                Err(CheckoutError::payment_unknown(PAYMENT_UNKNOWN))
            }
        }
    }

    /// Key sent to the gateway. Starts as the checkout key and moves on to a
    /// new attempt suffix after every compensation.
    fn payment_key(&self, user_id: UserId, key: &IdempotencyKey) -> Result<IdempotencyKey> {
        let attempt = self
            .compensations()
            .attempts
            .get(&(user_id, key.clone()))
            .copied()
            .unwrap_or(0);
        if attempt == 0 {
            return Ok(key.clone());
        }
        Ok(IdempotencyKey::parse(&format!("{key}#{attempt}"), 0)?)
    }

    fn compensations(&self) -> MutexGuard<'_, Compensations> {
        self.compensated.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_compensated(&self, user_id: UserId, key: &IdempotencyKey, payment_id: &str) {
        let mut compensations = self.compensations();
        *compensations.attempts.entry((user_id, key.clone())).or_insert(0) += 1;
        compensations.payments.insert(payment_id.to_string());
    }

    /// Transaction B.
    async fn commit_order(
        &self,
        order: &NewOrder,
        key: &IdempotencyKey,
    ) -> std::result::Result<(), CommitFailure> {
        let mut tx = self.store.begin().await?;

        match self.write_order(&mut tx, order, key).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(failure) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "rollback of commit transaction failed");
                }
                Err(failure)
            }
        }
    }

    async fn write_order(
        &self,
        tx: &mut S::Tx,
        order: &NewOrder,
        key: &IdempotencyKey,
    ) -> std::result::Result<(), CommitFailure> {
        tx.insert_order(order).await?;
        tx.insert_order_items(order.id, &order.items).await?;
        // Claim the key before touching stock: a same-key loser shares the
        // winner's payment and must resolve as a replay, never a refund.
        self.guard.record(tx, order.user_id, key, order.id).await?;

        for item in &order.items {
            if ledger::deduct(tx, &item.product_id, item.quantity).await? == Deduction::Insufficient {
                return Err(CommitFailure::StockChanged(item.product_id.clone()));
            }
        }

        tx.clear_cart(order.user_id).await?;
        Ok(())
    }

    /// Handles a failed Transaction B after the payment was approved.
    async fn compensate(
        &self,
        order: &NewOrder,
        payment_id: &str,
        key: &IdempotencyKey,
        failure: CommitFailure,
    ) -> Result<Placement> {
        match failure {
            CommitFailure::StockChanged(product_id) => {
                tracing::warn!(%product_id, "stock changed between snapshot and commit");
                self.refund_or_alert(order, payment_id, key, "stock changed before commit")
                    .await;
                Err(CheckoutError::Conflict(STOCK_CHANGED.to_string()))
            }
            CommitFailure::DuplicateKey => {
                // A concurrent request with the same key committed first.
                match self.guard.lookup(order.user_id, key).await {
                    Ok(Some(winner)) => {
                        if winner.payment_id.as_deref() != Some(payment_id) {
                            self.refund_or_alert(order, payment_id, key, "lost idempotency race")
                                .await;
                        }
                        Ok(Placement::Replayed(PlacedOrder::from(&winner)))
                    }
                    Ok(None) => {
                        self.refund_or_alert(order, payment_id, key, "idempotency record vanished")
                            .await;
                        Err(CheckoutError::server(
                            "Failed to place order",
                            StoreError::Unavailable("idempotency record not readable".to_string()),
                        ))
                    }
                    Err(e) => {
                        // The winner's payment may be this very authorization; leave it alone.
                        Err(CheckoutError::server("Failed to place order", e))
                    }
                }
            }
            CommitFailure::Store(e) => {
                tracing::error!(error = %e, order_id = %order.id, "commit transaction failed");
                self.refund_or_alert(order, payment_id, key, "order commit failed")
                    .await;
                Err(CheckoutError::server("Failed to place order", e))
            }
        }
    }

    /// Best-effort refund. Never fails; an unsuccessful refund raises an alert.
    async fn refund_or_alert(
        &self,
        order: &NewOrder,
        payment_id: &str,
        key: &IdempotencyKey,
        reason: &str,
    ) {
        self.mark_compensated(order.user_id, key, payment_id);
        match self.gateway.refund(payment_id).await {
            Ok(()) => {
                metrics::counter!("payment_refunds_total", "outcome" => "refunded").increment(1);
                tracing::info!(%payment_id, reason, "payment refunded");
            }
            Err(e) => {
                metrics::counter!("payment_refunds_total", "outcome" => "failed").increment(1);
                metrics::counter!("checkout_reconciliation_alerts_total").increment(1);
                self.alerts.raise(ReconciliationAlert {
                    user_id: order.user_id,
                    order_id: order.id,
                    payment_id: payment_id.to_string(),
                    amount: order.totals.total(),
                    reason: format!("{reason}; refund failed: {e}"),
                    raised_at: Utc::now(),
                });
            }
        }
    }

    fn spawn_side_effects(&self, order: Order) {
        let store = self.store.clone();
        let invoices = self.invoices.clone();
        let notifier = self.notifier.clone();
        let span = tracing::info_span!("post_commit", order_id = %order.id);

        let task = async move {
            match invoices.render(&order).await {
                Ok(document) => tracing::info!(uri = %document.uri, "invoice rendered"),
                Err(e) => {
                    metrics::counter!("post_commit_failures_total", "effect" => "invoice")
                        .increment(1);
                    tracing::warn!(error = %e, "invoice rendering failed");
                }
            }

            let email = match store.customer_email(order.user_id).await {
                Ok(email) => email,
                Err(e) => {
                    metrics::counter!("post_commit_failures_total", "effect" => "notification")
                        .increment(1);
                    tracing::warn!(error = %e, "customer email lookup failed");
                    return;
                }
            };
            let Some(email) = email else {
                tracing::debug!("no email on file; confirmation skipped");
                return;
            };
            if let Err(e) = notifier.order_confirmed(&email, order.id).await {
                metrics::counter!("post_commit_failures_total", "effect" => "notification")
                    .increment(1);
                tracing::warn!(error = %e, "order confirmation failed");
            }
        }
        .instrument(span);

        let mut set = match self.side_effects.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }
}

fn log_rejection(err: &CheckoutError) {
    match err.kind() {
        ErrorKind::Server => tracing::error!(error = ?err, "checkout failed"),
        kind => tracing::warn!(kind = %kind, message = %err, "checkout rejected"),
    }
}
