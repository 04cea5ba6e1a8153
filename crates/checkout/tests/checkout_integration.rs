//! Integration tests for the checkout saga and the order lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checkout::{
    Authorization, CheckoutConfig, CheckoutOrchestrator, CheckoutRequest, ErrorKind,
    GatewayError, InMemoryAlertSink, InMemoryNotifier, OrderLifecycle, OrderQueries,
    PaymentGateway, PaymentRequest, PlacedOrder, Reply, SimulatedGateway, TextInvoiceRenderer,
    ValidationOutcome,
};
use chrono::Utc;
use common::{OrderId, UserId};
use domain::{
    Actor, Money, NewOrder, OrderItem, OrderStatus, PaymentInput, PaymentStatus, ProductId,
    ShippingAddress, Totals, TotalsCalculator,
};
use order_store::{InMemoryOrderStore, OrderQuery, OrderStore, StoreTransaction};

type TestOrchestrator = CheckoutOrchestrator<InMemoryOrderStore, SimulatedGateway>;

struct TestHarness {
    orchestrator: Arc<TestOrchestrator>,
    lifecycle: OrderLifecycle<InMemoryOrderStore>,
    queries: OrderQueries<InMemoryOrderStore>,
    store: InMemoryOrderStore,
    gateway: SimulatedGateway,
    invoices: TextInvoiceRenderer,
    notifier: InMemoryNotifier,
    alerts: InMemoryAlertSink,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryOrderStore::new();
        let gateway = SimulatedGateway::new();
        let invoices = TextInvoiceRenderer::new();
        let notifier = InMemoryNotifier::new();
        let alerts = InMemoryAlertSink::new();

        let orchestrator = CheckoutOrchestrator::new(store.clone(), gateway.clone())
            .with_invoice_renderer(Arc::new(invoices.clone()))
            .with_notifier(Arc::new(notifier.clone()))
            .with_alert_sink(Arc::new(alerts.clone()));

        Self {
            orchestrator: Arc::new(orchestrator),
            lifecycle: OrderLifecycle::new(store.clone()),
            queries: OrderQueries::new(store.clone(), Arc::new(invoices.clone())),
            store,
            gateway,
            invoices,
            notifier,
            alerts,
        }
    }

    /// Seeds product SKU-001 at $10.00 with the given stock.
    async fn seed_widget(&self, stock: i32) -> ProductId {
        let sku = ProductId::new("SKU-001");
        self.store
            .put_product(sku.clone(), Money::from_cents(1000), stock)
            .await;
        sku
    }

    async fn customer_with_cart(&self, lines: &[(&str, i32)]) -> UserId {
        let user = UserId::new();
        for (product, quantity) in lines {
            self.store.add_to_cart(user, *product, *quantity).await;
        }
        user
    }
}

fn address() -> ShippingAddress {
    ShippingAddress {
        name: "Ada Lovelace".to_string(),
        line1: "1 Analytical Way".to_string(),
        line2: Some("Flat 2".to_string()),
        city: "London".to_string(),
        postal: "N1 9GU".to_string(),
        country: "UK".to_string(),
    }
}

fn card() -> PaymentInput {
    PaymentInput {
        method: "card".to_string(),
        card_number: Some("4242 4242 4242 4242".to_string()),
        expiry: Some("12/30".to_string()),
        cvv: Some("123".to_string()),
    }
}

fn request(key: &str) -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: address(),
        payment: card(),
        idempotency_key: key.to_string(),
    }
}

fn placed(reply: &Reply<PlacedOrder>) -> PlacedOrder {
    match reply {
        Reply::Success { data, .. } | Reply::Idempotent { data, .. } => *data,
        other => panic!("expected order, got {other:?}"),
    }
}

/// Store disturbance applied while the payment is in flight, i.e. between
/// Transaction A and Transaction B.
#[derive(Clone)]
enum Interference {
    FailCommit,
    Reprice(ProductId, Money),
    DrainStock(ProductId),
}

/// Simulated gateway that applies an [`Interference`] after its first
/// authorization and records every idempotency key it is sent.
struct InterferingGateway {
    inner: SimulatedGateway,
    store: InMemoryOrderStore,
    interference: Interference,
    fired: AtomicBool,
    keys: Mutex<Vec<String>>,
}

impl InterferingGateway {
    fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for InterferingGateway {
    async fn authorize(&self, request: &PaymentRequest) -> Result<Authorization, GatewayError> {
        self.keys
            .lock()
            .unwrap()
            .push(request.idempotency_key.as_str().to_string());
        let outcome = self.inner.authorize(request).await;
        if self.fired.swap(true, Ordering::SeqCst) {
            return outcome;
        }
        match &self.interference {
            Interference::FailCommit => self.store.set_fail_on_commit(true),
            Interference::Reprice(sku, price) => self.store.set_price(sku, *price).await,
            Interference::DrainStock(sku) => {
                self.store.put_product(sku.clone(), Money::from_cents(1000), 0).await
            }
        }
        outcome
    }

    async fn refund(&self, payment_id: &str) -> Result<(), GatewayError> {
        self.inner.refund(payment_id).await
    }
}

fn interfering(
    store: &InMemoryOrderStore,
    gateway: &SimulatedGateway,
    alerts: &InMemoryAlertSink,
    interference: Interference,
) -> CheckoutOrchestrator<InMemoryOrderStore, InterferingGateway> {
    CheckoutOrchestrator::new(
        store.clone(),
        InterferingGateway {
            inner: gateway.clone(),
            store: store.clone(),
            interference,
            fired: AtomicBool::new(false),
            keys: Mutex::new(Vec::new()),
        },
    )
    .with_alert_sink(Arc::new(alerts.clone()))
}

// -- Scenarios --

#[tokio::test]
async fn test_scenario_a_happy_path() {
    let h = TestHarness::new();
    let sku = h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;

    assert!(matches!(reply, Reply::Success { .. }), "{reply:?}");
    let placed = placed(&reply);
    assert_eq!(placed.total, Money::from_cents(2000));
    assert_eq!(h.store.stock_of(&sku).await, Some(3));
    assert!(h.store.cart_of(user).await.is_empty());

    let order = h.store.get_order(placed.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert!(order.payment_id.as_deref().unwrap().starts_with("pay_"));
    assert_eq!(order.items, vec![OrderItem::new("SKU-001", Money::from_cents(1000), 2)]);
    assert_eq!(order.shipping_address, address());
}

#[tokio::test]
async fn test_scenario_b_retry_with_same_key_is_idempotent() {
    let h = TestHarness::new();
    let sku = h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;

    let first = h.orchestrator.place_order(user, &request("order-key-0001")).await;
    let second = h.orchestrator.place_order(user, &request("order-key-0001")).await;

    assert!(matches!(second, Reply::Idempotent { .. }), "{second:?}");
    assert_eq!(placed(&first), placed(&second));
    assert_eq!(h.store.stock_of(&sku).await, Some(3));
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(h.store.idempotency_record_count().await, 1);
    assert_eq!(h.gateway.authorize_count(), 1);
}

#[tokio::test]
async fn test_scenario_c_empty_cart() {
    let h = TestHarness::new();
    let user = UserId::new();

    let validated = h
        .orchestrator
        .validate_checkout(user, &request("order-key-0001"))
        .await;
    assert_eq!(validated.error_kind(), Some(ErrorKind::Validation));
    assert_eq!(validated.message(), "Cart is empty");

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;
    assert_eq!(reply.error_kind(), Some(ErrorKind::Validation));
    assert_eq!(reply.message(), "Cart is empty");
    assert_eq!(h.gateway.authorize_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scenario_d_last_unit_sold_once() {
    let h = TestHarness::new();
    let sku = h.seed_widget(1).await;
    let alice = h.customer_with_cart(&[("SKU-001", 1)]).await;
    let bob = h.customer_with_cart(&[("SKU-001", 1)]).await;

    let o1 = h.orchestrator.clone();
    let o2 = h.orchestrator.clone();
    let t1 = tokio::spawn(async move { o1.place_order(alice, &request("alice-key-0001")).await });
    let t2 = tokio::spawn(async move { o2.place_order(bob, &request("bob-key-00001")).await });
    let replies = [t1.await.unwrap(), t2.await.unwrap()];

    let successes = replies.iter().filter(|r| r.is_success()).count();
    assert_eq!(successes, 1, "{replies:?}");
    let failure = replies.iter().find(|r| !r.is_success()).unwrap();
    assert!(matches!(
        failure.error_kind(),
        Some(ErrorKind::Conflict) | Some(ErrorKind::Validation)
    ));
    assert_eq!(h.store.stock_of(&sku).await, Some(0));
    assert_eq!(h.store.order_count().await, 1);

    // A loser that got as far as the payment was refunded.
    if failure.error_kind() == Some(ErrorKind::Conflict) {
        assert_eq!(h.gateway.refunded_payments().len(), 1);
    }
}

#[tokio::test]
async fn test_scenario_e_decline_touches_nothing() {
    let h = TestHarness::new();
    let sku = h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;
    h.gateway.set_decline(true, Some("Insufficient funds"));

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(
        reply,
        Reply::PaymentError {
            message: "Insufficient funds".to_string()
        }
    );
    assert_eq!(h.store.stock_of(&sku).await, Some(5));
    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.store.cart_of(user).await.len(), 1);
}

#[tokio::test]
async fn test_decline_without_reason_uses_generic_message() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 1)]).await;
    h.gateway.set_decline(true, None);

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;
    assert_eq!(reply.message(), "Payment declined");
}

#[tokio::test]
async fn test_scenario_f_cancel_paid_order_restores_stock() {
    let h = TestHarness::new();
    let sku = h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;
    let order_id = placed(&h.orchestrator.place_order(user, &request("order-key-0001")).await).order_id;
    assert_eq!(h.store.stock_of(&sku).await, Some(3));

    let admin = Actor::admin(UserId::new());
    let reply = h
        .lifecycle
        .transition(&admin, order_id, OrderStatus::Cancelled)
        .await;

    let order = reply.into_data().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.updated_at >= order.created_at);
    assert_eq!(h.store.stock_of(&sku).await, Some(5));
}

#[tokio::test]
async fn test_scenario_f_shipped_order_cannot_be_cancelled() {
    let h = TestHarness::new();
    let sku = h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;
    let order_id = placed(&h.orchestrator.place_order(user, &request("order-key-0001")).await).order_id;
    let admin = Actor::admin(UserId::new());

    let shipped = h
        .lifecycle
        .transition(&admin, order_id, OrderStatus::Shipped)
        .await;
    assert!(shipped.is_success());

    let cancelled = h
        .lifecycle
        .transition(&admin, order_id, OrderStatus::Cancelled)
        .await;
    assert_eq!(
        cancelled,
        Reply::ValidationError {
            message: "Invalid transition".to_string()
        }
    );
    assert_eq!(h.store.stock_of(&sku).await, Some(3));
}

// -- Properties --

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_oversell_under_contention() {
    let h = TestHarness::new();
    let sku = h.seed_widget(10).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let user = h.customer_with_cart(&[("SKU-001", 3)]).await;
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .place_order(user, &request(&format!("contention-key-{i:04}")))
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        let reply = handle.await.unwrap();
        if reply.is_success() {
            successes += 1;
        } else {
            assert!(matches!(
                reply.error_kind(),
                Some(ErrorKind::Conflict) | Some(ErrorKind::Validation)
            ));
        }
    }

    let remaining = h.store.stock_of(&sku).await.unwrap();
    assert!(remaining >= 0);
    assert_eq!(successes * 3 + remaining, 10);
    assert_eq!(successes, 3);
    assert_eq!(h.store.order_count().await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_with_same_key_create_one_order() {
    let h = TestHarness::new();
    let sku = h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;

    let o1 = h.orchestrator.clone();
    let o2 = h.orchestrator.clone();
    let t1 = tokio::spawn(async move { o1.place_order(user, &request("shared-key-0001")).await });
    let t2 = tokio::spawn(async move { o2.place_order(user, &request("shared-key-0001")).await });
    let first = t1.await.unwrap();
    let second = t2.await.unwrap();

    assert_eq!(placed(&first).order_id, placed(&second).order_id);
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(h.store.idempotency_record_count().await, 1);
    assert_eq!(h.store.stock_of(&sku).await, Some(3));
    assert_eq!(h.gateway.payment_count(), 1);
    assert!(h.gateway.refunded_payments().is_empty());
}

#[tokio::test]
async fn test_commit_failure_leaves_nothing_and_refunds() {
    let store = InMemoryOrderStore::new();
    let gateway = SimulatedGateway::new();
    let alerts = InMemoryAlertSink::new();
    let sku = ProductId::new("SKU-001");
    store.put_product(sku.clone(), Money::from_cents(1000), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, sku.clone(), 2).await;

    let orchestrator = interfering(&store, &gateway, &alerts, Interference::FailCommit);
    let reply = orchestrator.place_order(user, &request("order-key-0001")).await;
    store.set_fail_on_commit(false);

    assert_eq!(
        reply,
        Reply::ServerError {
            message: "Failed to place order".to_string()
        }
    );
    assert_eq!(store.order_count().await, 0);
    assert_eq!(store.idempotency_record_count().await, 0);
    assert_eq!(store.stock_of(&sku).await, Some(5));
    assert_eq!(store.cart_of(user).await.len(), 1);
    assert_eq!(gateway.refund_attempts(), 1);
    assert_eq!(gateway.refunded_payments().len(), 1);
    assert!(alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_failed_refund_raises_reconciliation_alert() {
    let store = InMemoryOrderStore::new();
    let gateway = SimulatedGateway::new();
    let alerts = InMemoryAlertSink::new();
    store
        .put_product("SKU-001", Money::from_cents(1000), 5)
        .await;
    let user = UserId::new();
    store.add_to_cart(user, "SKU-001", 2).await;
    gateway.set_fail_on_refund(true);

    let orchestrator = interfering(&store, &gateway, &alerts, Interference::FailCommit);
    let reply = orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(reply.error_kind(), Some(ErrorKind::Server));
    assert_eq!(gateway.refund_attempts(), 1);

    let raised = alerts.alerts();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].user_id, user);
    assert_eq!(raised[0].amount, Money::from_cents(2000));
    assert!(raised[0].payment_id.starts_with("pay_"));
    assert!(raised[0].reason.contains("refund failed"));
}

#[tokio::test]
async fn test_stock_change_during_payment_is_a_conflict() {
    let store = InMemoryOrderStore::new();
    let gateway = SimulatedGateway::new();
    let alerts = InMemoryAlertSink::new();
    let sku = ProductId::new("SKU-001");
    store.put_product(sku.clone(), Money::from_cents(1000), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, sku.clone(), 2).await;

    let orchestrator = interfering(&store, &gateway, &alerts, Interference::DrainStock(sku.clone()));
    let reply = orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(
        reply,
        Reply::ConflictError {
            message: "Stock changed; order not placed".to_string()
        }
    );
    assert_eq!(store.order_count().await, 0);
    assert_eq!(store.stock_of(&sku).await, Some(0));
    assert_eq!(gateway.refunded_payments().len(), 1);
}

#[tokio::test]
async fn test_retry_after_stock_conflict_is_paid_by_a_fresh_payment() {
    let store = InMemoryOrderStore::new();
    let gateway = SimulatedGateway::new();
    let alerts = InMemoryAlertSink::new();
    let sku = ProductId::new("SKU-001");
    store.put_product(sku.clone(), Money::from_cents(1000), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, sku.clone(), 2).await;

    let orchestrator = interfering(&store, &gateway, &alerts, Interference::DrainStock(sku.clone()));
    let conflict = orchestrator.place_order(user, &request("order-key-0001")).await;
    assert_eq!(conflict.error_kind(), Some(ErrorKind::Conflict));
    let refunded = gateway.refunded_payments();
    assert_eq!(refunded.len(), 1);

    store.put_product(sku.clone(), Money::from_cents(1000), 5).await;
    let retry = orchestrator.place_order(user, &request("order-key-0001")).await;
    assert!(matches!(retry, Reply::Success { .. }), "{retry:?}");

    let order = store.get_order(placed(&retry).order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    let payment_id = order.payment_id.unwrap();
    assert!(!gateway.refunded_payments().contains(&payment_id));
    assert_ne!(payment_id, refunded[0]);
    assert_eq!(gateway.payment_count(), 2);
    assert_eq!(store.stock_of(&sku).await, Some(3));

    let keys = orchestrator.gateway().keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], "order-key-0001");
    assert_ne!(keys[0], keys[1]);
}

#[tokio::test]
async fn test_retry_after_commit_failure_is_paid_by_a_fresh_payment() {
    let store = InMemoryOrderStore::new();
    let gateway = SimulatedGateway::new();
    let alerts = InMemoryAlertSink::new();
    store.put_product("SKU-001", Money::from_cents(1000), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, "SKU-001", 1).await;

    let orchestrator = interfering(&store, &gateway, &alerts, Interference::FailCommit);
    let failed = orchestrator.place_order(user, &request("order-key-0001")).await;
    assert_eq!(failed.error_kind(), Some(ErrorKind::Server));
    store.set_fail_on_commit(false);

    let retry = orchestrator.place_order(user, &request("order-key-0001")).await;
    let order = store.get_order(placed(&retry).order_id).await.unwrap().unwrap();
    assert!(!gateway.refunded_payments().contains(&order.payment_id.unwrap()));
}

/// Gateway that answers every authorization with the same payment, the way a
/// gateway replays its stored response for a repeated idempotency key.
struct ReplayingGateway {
    store: InMemoryOrderStore,
    drained: AtomicBool,
}

#[async_trait]
impl PaymentGateway for ReplayingGateway {
    async fn authorize(&self, _request: &PaymentRequest) -> Result<Authorization, GatewayError> {
        if !self.drained.swap(true, Ordering::SeqCst) {
            self.store.put_product("SKU-001", Money::from_cents(1000), 0).await;
        }
        Ok(Authorization::Approved {
            payment_id: "pay_replayed".to_string(),
        })
    }

    async fn refund(&self, _payment_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_refunded_payment_is_never_attached_to_an_order() {
    let store = InMemoryOrderStore::new();
    store.put_product("SKU-001", Money::from_cents(1000), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, "SKU-001", 1).await;
    let orchestrator = CheckoutOrchestrator::new(
        store.clone(),
        ReplayingGateway {
            store: store.clone(),
            drained: AtomicBool::new(false),
        },
    );

    let conflict = orchestrator.place_order(user, &request("order-key-0001")).await;
    assert_eq!(conflict.error_kind(), Some(ErrorKind::Conflict));

    store.put_product("SKU-001", Money::from_cents(1000), 5).await;
    let retry = orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(retry.error_kind(), Some(ErrorKind::Payment));
    assert_eq!(store.order_count().await, 0);
    assert_eq!(store.stock_of(&ProductId::new("SKU-001")).await, Some(5));
}

#[tokio::test]
async fn test_order_keeps_snapshot_prices() {
    let store = InMemoryOrderStore::new();
    let gateway = SimulatedGateway::new();
    let alerts = InMemoryAlertSink::new();
    let sku = ProductId::new("SKU-001");
    store.put_product(sku.clone(), Money::from_cents(1000), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, sku.clone(), 2).await;

    let orchestrator = interfering(
        &store,
        &gateway,
        &alerts,
        Interference::Reprice(sku.clone(), Money::from_cents(9999)),
    );
    let reply = orchestrator.place_order(user, &request("order-key-0001")).await;

    let order = store.get_order(placed(&reply).order_id).await.unwrap().unwrap();
    assert_eq!(order.items[0].unit_price, Money::from_cents(1000));
    assert_eq!(order.total(), Money::from_cents(2000));

    // Later catalog changes do not touch the placed order either.
    store.set_price(&sku, Money::from_cents(1)).await;
    let reloaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(reloaded.items, order.items);
}

#[tokio::test]
async fn test_totals_follow_charge_policies() {
    let store = InMemoryOrderStore::new();
    store.put_product("SKU-001", Money::from_cents(1000), 5).await;
    store.put_product("SKU-002", Money::from_cents(250), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, "SKU-001", 2).await;
    store.add_to_cart(user, "SKU-002", 3).await;

    let totals = TotalsCalculator::new(
        |subtotal: Money| Money::from_cents(subtotal.cents() / 10),
        |_: Money| Money::from_cents(500),
    );
    let orchestrator =
        CheckoutOrchestrator::new(store.clone(), SimulatedGateway::new()).with_totals(totals);

    let reply = orchestrator.place_order(user, &request("order-key-0001")).await;
    let order = store.get_order(placed(&reply).order_id).await.unwrap().unwrap();

    assert_eq!(order.totals.subtotal(), Money::from_cents(2750));
    assert_eq!(order.totals.tax(), Money::from_cents(275));
    assert_eq!(order.totals.shipping(), Money::from_cents(500));
    assert_eq!(
        order.total(),
        order.totals.subtotal() + order.totals.tax() + order.totals.shipping()
    );
}

// -- Failure handling around the gateway --

#[tokio::test]
async fn test_gateway_timeout_is_an_indeterminate_payment_error() {
    let store = InMemoryOrderStore::new();
    let gateway = SimulatedGateway::new();
    store.put_product("SKU-001", Money::from_cents(1000), 5).await;
    let user = UserId::new();
    store.add_to_cart(user, "SKU-001", 1).await;
    gateway.set_latency(Duration::from_millis(500));

    let orchestrator = CheckoutOrchestrator::new(store.clone(), gateway.clone()).with_config(
        CheckoutConfig::default().with_payment_timeout(Duration::from_millis(20)),
    );
    let reply = orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(reply.error_kind(), Some(ErrorKind::Payment));
    assert_ne!(reply.message(), "Payment declined");
    assert_eq!(store.stock_of(&ProductId::new("SKU-001")).await, Some(5));
    assert_eq!(store.order_count().await, 0);
}

#[tokio::test]
async fn test_gateway_error_is_a_payment_error() {
    let h = TestHarness::new();
    let sku = h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 1)]).await;
    h.gateway.set_fail_on_authorize(true);

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(reply.error_kind(), Some(ErrorKind::Payment));
    assert_eq!(h.store.stock_of(&sku).await, Some(5));

    // Once the gateway recovers, the same key goes through.
    h.gateway.set_fail_on_authorize(false);
    let retry = h.orchestrator.place_order(user, &request("order-key-0001")).await;
    assert!(matches!(retry, Reply::Success { .. }));
}

// -- Validation --

#[tokio::test]
async fn test_insufficient_stock_detected_in_snapshot() {
    let h = TestHarness::new();
    h.seed_widget(1).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(
        reply,
        Reply::ValidationError {
            message: "Insufficient stock for product SKU-001".to_string()
        }
    );
    assert_eq!(h.gateway.authorize_count(), 0);
}

#[tokio::test]
async fn test_non_positive_cart_quantity_is_a_server_defect() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 0)]).await;

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;

    assert_eq!(
        reply,
        Reply::ServerError {
            message: "Checkout failed".to_string()
        }
    );
    assert_eq!(h.gateway.authorize_count(), 0);
}

#[tokio::test]
async fn test_request_validation_messages_and_order() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 1)]).await;

    let mut bad_key = request("short");
    bad_key.shipping_address.city.clear();
    let reply = h.orchestrator.place_order(user, &bad_key).await;
    assert_eq!(reply.message(), "Missing idempotency key");

    let mut bad_address = request("order-key-0001");
    bad_address.shipping_address.postal = "   ".to_string();
    bad_address.payment.method = "bitcoin".to_string();
    let reply = h.orchestrator.place_order(user, &bad_address).await;
    assert_eq!(reply.message(), "Invalid address");

    let mut bad_method = request("order-key-0001");
    bad_method.payment.method = "bitcoin".to_string();
    let reply = h.orchestrator.place_order(user, &bad_method).await;
    assert_eq!(reply.message(), "Invalid payment method");
    assert_eq!(reply.error_kind(), Some(ErrorKind::Validation));
}

#[tokio::test]
async fn test_replay_wins_over_later_validation() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 1)]).await;
    let first = h.orchestrator.place_order(user, &request("order-key-0001")).await;

    let mut sloppy_retry = request("order-key-0001");
    sloppy_retry.shipping_address.city.clear();
    sloppy_retry.payment.method = "bitcoin".to_string();
    let second = h.orchestrator.place_order(user, &sloppy_retry).await;

    assert!(matches!(second, Reply::Idempotent { .. }), "{second:?}");
    assert_eq!(placed(&first), placed(&second));
}

#[tokio::test]
async fn test_validate_checkout_previews_then_reports_idempotent() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 2)]).await;

    let mut cod = request("order-key-0001");
    cod.payment = PaymentInput {
        method: "cod".to_string(),
        ..PaymentInput::default()
    };

    let preview = h.orchestrator.validate_checkout(user, &cod).await;
    match preview {
        Reply::Success {
            data: ValidationOutcome::Ready(preview),
            ..
        } => {
            assert_eq!(preview.payment_method, "cod");
            assert_eq!(preview.totals.total(), Money::from_cents(2000));
            assert!(preview.masked_card.is_none());
        }
        other => panic!("expected preview, got {other:?}"),
    }
    // Validation never charges or writes.
    assert_eq!(h.gateway.authorize_count(), 0);
    assert_eq!(h.store.cart_of(user).await.len(), 1);

    let order_id = placed(&h.orchestrator.place_order(user, &cod).await).order_id;
    let again = h.orchestrator.validate_checkout(user, &cod).await;
    match again {
        Reply::Idempotent {
            data: ValidationOutcome::AlreadyPlaced(order),
            ..
        } => assert_eq!(order.id, order_id),
        other => panic!("expected idempotent, got {other:?}"),
    }
}

#[tokio::test]
async fn test_card_is_masked_in_preview() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 1)]).await;

    let reply = h
        .orchestrator
        .validate_checkout(user, &request("order-key-0001"))
        .await;
    let Some(ValidationOutcome::Ready(preview)) = reply.into_data() else {
        panic!("expected preview");
    };
    assert_eq!(preview.masked_card.as_deref(), Some("**** **** **** 4242"));
}

// -- Post-commit side effects --

#[tokio::test]
async fn test_invoice_and_confirmation_sent_after_commit() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 1)]).await;
    h.store.register_customer(user, "ada@example.com").await;

    let order_id = placed(&h.orchestrator.place_order(user, &request("order-key-0001")).await).order_id;
    h.orchestrator.wait_for_side_effects().await;

    assert!(h.invoices.document(order_id).is_some());
    assert_eq!(h.notifier.sent(), vec![("ada@example.com".to_string(), order_id)]);
}

#[tokio::test]
async fn test_side_effect_failures_do_not_affect_the_order() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let user = h.customer_with_cart(&[("SKU-001", 1)]).await;
    h.store.register_customer(user, "ada@example.com").await;
    h.invoices.set_fail(true);
    h.notifier.set_fail(true);

    let reply = h.orchestrator.place_order(user, &request("order-key-0001")).await;
    h.orchestrator.wait_for_side_effects().await;

    assert!(matches!(reply, Reply::Success { .. }));
    assert_eq!(h.store.order_count().await, 1);
    assert!(h.notifier.sent().is_empty());
}

// -- Lifecycle --

async fn insert_pending_order(store: &InMemoryOrderStore, quantity: u32) -> OrderId {
    let order = NewOrder {
        id: OrderId::new(),
        user_id: UserId::new(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_id: None,
        totals: Totals::new(
            Money::from_cents(1000 * i64::from(quantity)),
            Money::zero(),
            Money::zero(),
        )
        .unwrap(),
        shipping_address: address(),
        items: vec![OrderItem::new("SKU-001", Money::from_cents(1000), quantity)],
        placed_at: Utc::now(),
    };
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.insert_order_items(order.id, &order.items).await.unwrap();
    tx.commit().await.unwrap();
    order.id
}

#[tokio::test]
async fn test_cancel_pending_order_restores_stock() {
    let h = TestHarness::new();
    let sku = h.seed_widget(0).await;
    let order_id = insert_pending_order(&h.store, 4).await;

    let reply = h
        .lifecycle
        .transition(&Actor::admin(UserId::new()), order_id, OrderStatus::Cancelled)
        .await;

    assert!(reply.is_success());
    assert_eq!(h.store.stock_of(&sku).await, Some(4));
}

#[tokio::test]
async fn test_full_lifecycle_without_stock_changes() {
    let h = TestHarness::new();
    let sku = h.seed_widget(0).await;
    let order_id = insert_pending_order(&h.store, 1).await;
    let admin = Actor::admin(UserId::new());

    for status in [OrderStatus::Paid, OrderStatus::Shipped, OrderStatus::Delivered] {
        let reply = h.lifecycle.transition(&admin, order_id, status).await;
        assert_eq!(reply.into_data().unwrap().status, status);
    }
    assert_eq!(h.store.stock_of(&sku).await, Some(0));

    for status in [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    ] {
        let reply = h.lifecycle.transition(&admin, order_id, status).await;
        assert_eq!(reply.error_kind(), Some(ErrorKind::Validation));
    }
}

#[tokio::test]
async fn test_lifecycle_requires_operator() {
    let h = TestHarness::new();
    h.seed_widget(0).await;
    let order_id = insert_pending_order(&h.store, 1).await;

    let reply = h
        .lifecycle
        .transition(&Actor::customer(UserId::new()), order_id, OrderStatus::Cancelled)
        .await;
    assert_eq!(
        reply,
        Reply::AuthError {
            message: "Forbidden".to_string()
        }
    );

    let by_name = h
        .lifecycle
        .transition_by_name(&Actor::customer(UserId::new()), order_id, "nonsense")
        .await;
    assert_eq!(by_name.error_kind(), Some(ErrorKind::Auth));
}

#[tokio::test]
async fn test_lifecycle_unknown_order_and_status() {
    let h = TestHarness::new();
    let admin = Actor::admin(UserId::new());

    let missing = h
        .lifecycle
        .transition(&admin, OrderId::new(), OrderStatus::Shipped)
        .await;
    assert_eq!(
        missing,
        Reply::NotFound {
            message: "Order not found".to_string()
        }
    );

    let order_id = insert_pending_order(&h.store, 1).await;
    for name in ["refunded", "payment_failed"] {
        let reply = h.lifecycle.transition_by_name(&admin, order_id, name).await;
        assert_eq!(reply.message(), "Invalid status");
    }
    let ok = h.lifecycle.transition_by_name(&admin, order_id, "paid").await;
    assert!(ok.is_success());
}

// -- Queries --

#[tokio::test]
async fn test_order_access_rules() {
    let h = TestHarness::new();
    h.seed_widget(5).await;
    let owner = h.customer_with_cart(&[("SKU-001", 1)]).await;
    let order_id = placed(&h.orchestrator.place_order(owner, &request("order-key-0001")).await).order_id;

    let own = h.queries.get_order(&Actor::customer(owner), order_id).await;
    assert_eq!(own.into_data().unwrap().items.len(), 1);

    let stranger = h
        .queries
        .get_order(&Actor::customer(UserId::new()), order_id)
        .await;
    assert_eq!(stranger.error_kind(), Some(ErrorKind::Auth));

    let admin = h.queries.get_order(&Actor::admin(UserId::new()), order_id).await;
    assert!(admin.is_success());

    let missing = h.queries.get_order(&Actor::customer(owner), OrderId::new()).await;
    assert_eq!(missing.message(), "Order not found");

    let invoice = h
        .queries
        .render_invoice(&Actor::customer(owner), order_id)
        .await;
    assert!(invoice.into_data().unwrap().uri.contains(&order_id.to_string()));
}

#[tokio::test]
async fn test_listing_is_operator_only() {
    let h = TestHarness::new();
    h.seed_widget(10).await;
    for i in 0..3 {
        let user = h.customer_with_cart(&[("SKU-001", 1)]).await;
        h.orchestrator
            .place_order(user, &request(&format!("listing-key-{i:04}")))
            .await;
    }

    let denied = h
        .queries
        .list_orders(&Actor::customer(UserId::new()), &OrderQuery::new())
        .await;
    assert_eq!(denied.error_kind(), Some(ErrorKind::Auth));

    let page = h
        .queries
        .list_orders(&Actor::admin(UserId::new()), &OrderQuery::new().page(1, 2))
        .await
        .into_data()
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
}
