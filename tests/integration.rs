use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use courier_relay::api::{HostNotifier, OrderApi};
use courier_relay::bus::EventBus;
use courier_relay::engine::{ClaimOutcome, LifecycleEngine, VerifyOutcome};
use courier_relay::error::{ApiError, RelayError};
use courier_relay::models::order::{
    DeliveryType, GroupOrderRef, RiderOrder, ShopDetails, TrackingStatus,
};
use courier_relay::models::session::{RiderProfile, SessionContext};
use courier_relay::observability::metrics::Metrics;
use courier_relay::push::{PushAdapter, PushMessage};
use courier_relay::resident::ResidentProcess;
use courier_relay::stream::transport::{StreamConnection, StreamTransport};
use courier_relay::stream::{ReconnectPolicy, StreamAdapter};

struct FakeApi {
    orders: Mutex<Vec<RiderOrder>>,
    list_calls: AtomicUsize,
}

impl FakeApi {
    fn new(orders: Vec<RiderOrder>) -> Arc<Self> {
        Arc::new(Self {
            orders: Mutex::new(orders),
            list_calls: AtomicUsize::new(0),
        })
    }

    fn set_orders(&self, orders: Vec<RiderOrder>) {
        *self.orders.lock().unwrap() = orders;
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderApi for FakeApi {
    async fn list_orders(&self) -> Result<Vec<RiderOrder>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.orders.lock().unwrap().clone())
    }

    async fn rider_detail(&self, rider_id: &str) -> Result<RiderProfile, ApiError> {
        Ok(RiderProfile {
            rider_id: rider_id.to_string(),
            name: "Asha".to_string(),
            depot_address: "Depot 4, Ring Road".to_string(),
            phone: "555-0106".to_string(),
        })
    }

    async fn assign_pickup(&self, _group_order_id: &str, _claimant_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn assign_delivery(&self, _order_key: &str, _claimant_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn verify_pickup(&self, _group_order_id: &str, _code: &str) -> Result<u16, ApiError> {
        Ok(200)
    }

    async fn verify_admin_drop(&self, _group_order_id: &str, _code: &str) -> Result<u16, ApiError> {
        Ok(200)
    }

    async fn verify_admin_pickup(&self, _order_key: &str, _code: &str) -> Result<u16, ApiError> {
        Ok(200)
    }

    async fn verify_shop_drop(&self, _group_order_id: &str, _code: &str) -> Result<u16, ApiError> {
        Ok(200)
    }

    async fn complete_transit(&self, _order_key: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn register_token(&self, _claimant_id: &str, _token: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn invalidate_token(&self, _claimant_id: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

struct RecordingNotifier {
    shown: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            shown: Mutex::new(Vec::new()),
        })
    }

    fn bodies(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostNotifier for RecordingNotifier {
    async fn notify(&self, _title: &str, body: &str) {
        self.shown.lock().unwrap().push(body.to_string());
    }
}

struct TestConnection {
    frames: mpsc::UnboundedReceiver<Result<String, RelayError>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StreamConnection for TestConnection {
    async fn send(&mut self, text: String) -> Result<(), RelayError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        self.frames.recv().await
    }

    async fn ping(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

struct ScriptedTransport {
    connections: Mutex<VecDeque<TestConnection>>,
}

impl ScriptedTransport {
    fn refusing_all() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(VecDeque::new()),
        })
    }

    fn with_connection(conn: TestConnection) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(VecDeque::from([conn])),
        })
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, RelayError> {
        match self.connections.lock().unwrap().pop_front() {
            Some(conn) => Ok(Box::new(conn)),
            None => Err(RelayError::Transport("connection refused".to_string())),
        }
    }
}

fn pickup_order(key: &str) -> RiderOrder {
    RiderOrder {
        order_key: key.to_string(),
        delivery_type: DeliveryType::Pickup,
        rider_id: None,
        is_pickup_verified: false,
        is_drop_verified: false,
        is_completed: false,
        payment_amount: Decimal::new(4250, 2),
        created_at: Utc::now(),
        shop_details: Some(ShopDetails {
            shop_name: "Corner Pharmacy".to_string(),
            dealer_name: "R. Mehta".to_string(),
            address: "14 Hill Road".to_string(),
            phone: "555-0182".to_string(),
        }),
        group_order_ids: vec![GroupOrderRef {
            group_order_id: format!("grp-{key}"),
            tracking_status: TrackingStatus::InternalTracking,
        }],
        grouped_orders: Vec::new(),
    }
}

fn order_frame_json(order: &RiderOrder) -> String {
    serde_json::json!({
        "message": "New group order created",
        "data": order,
    })
    .to_string()
}

struct Harness {
    api: Arc<FakeApi>,
    notifier: Arc<RecordingNotifier>,
    metrics: Arc<Metrics>,
    engine: Arc<LifecycleEngine>,
    resident: ResidentProcess,
    frame_tx: mpsc::UnboundedSender<Result<String, RelayError>>,
    push_tx: mpsc::Sender<PushMessage>,
}

async fn start_harness(transport_refuses: bool, orders: Vec<RiderOrder>) -> Harness {
    let api = FakeApi::new(orders);
    let notifier = RecordingNotifier::new();
    let metrics = Arc::new(Metrics::new());
    let bus = EventBus::new(64);
    let shutdown = CancellationToken::new();

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let transport = if transport_refuses {
        ScriptedTransport::refusing_all()
    } else {
        ScriptedTransport::with_connection(TestConnection {
            frames: frame_rx,
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    };

    let stream = StreamAdapter::new(
        transport,
        bus.clone(),
        "riders".to_string(),
        ReconnectPolicy::default(),
        Duration::from_secs(30),
        metrics.clone(),
        shutdown.clone(),
    );

    let engine = LifecycleEngine::new(
        api.clone(),
        SessionContext::new("rider-9"),
        Duration::from_secs(5),
        Duration::from_millis(2_000),
        metrics.clone(),
    );

    let (push_tx, push_rx) = mpsc::channel(16);
    let push = PushAdapter::new(
        bus.clone(),
        notifier.clone(),
        metrics.clone(),
        shutdown.clone(),
    );

    let resident = ResidentProcess::start(
        &bus,
        stream,
        push,
        push_rx,
        engine.clone(),
        notifier.clone(),
        shutdown,
    )
    .await;

    Harness {
        api,
        notifier,
        metrics,
        engine,
        resident,
        frame_tx,
        push_tx,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn stream_frame_drives_a_reconciliation_into_the_snapshot() {
    let harness = start_harness(false, Vec::new()).await;
    let mut watched = harness.engine.watch_orders();
    assert!(watched.borrow_and_update().is_empty());

    // The backend now has the order; the frame announces it.
    let order = pickup_order("ord-42");
    harness.api.set_orders(vec![order.clone()]);
    harness
        .frame_tx
        .send(Ok(order_frame_json(&order)))
        .unwrap();

    watched.changed().await.unwrap();
    let snapshot = watched.borrow_and_update().clone();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].order_key, "ord-42");

    harness.resident.shutdown().await;
}

#[tokio::test]
async fn stream_and_push_duplicates_reconcile_once() {
    let harness = start_harness(false, Vec::new()).await;

    let order = pickup_order("ord-42");
    harness.api.set_orders(vec![order.clone()]);

    // Both channels announce the same change: the stream adapter's first
    // event and the push adapter's first event share sequence 0.
    harness
        .frame_tx
        .send(Ok(order_frame_json(&order)))
        .unwrap();
    harness
        .push_tx
        .send(PushMessage::Data(HashMap::from([
            ("order_key".to_string(), "ord-42".to_string()),
            ("operation".to_string(), "create".to_string()),
        ])))
        .await
        .unwrap();

    let metrics = harness.metrics.clone();
    wait_until(move || metrics.dedup_suppressed_total.get() == 1).await;
    assert_eq!(harness.api.list_calls(), 1);

    harness.resident.shutdown().await;
}

#[tokio::test]
async fn malformed_push_payload_never_reaches_the_engine() {
    let harness = start_harness(false, Vec::new()).await;

    harness
        .push_tx
        .send(PushMessage::Data(HashMap::from([(
            "operation".to_string(),
            "update".to_string(),
        )])))
        .await
        .unwrap();
    harness
        .push_tx
        .send(PushMessage::Data(HashMap::from([
            ("order_key".to_string(), "ord-9".to_string()),
            ("operation".to_string(), "update".to_string()),
        ])))
        .await
        .unwrap();

    // Only the well-formed payload triggers work.
    let api = harness.api.clone();
    wait_until(move || api.list_calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.api.list_calls(), 1);

    harness.resident.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnect_budget_surfaces_a_host_alert() {
    let harness = start_harness(true, Vec::new()).await;

    let notifier = harness.notifier.clone();
    wait_until(move || {
        notifier
            .bodies()
            .iter()
            .any(|body| body == "Connection to dispatch lost")
    })
    .await;

    harness.resident.shutdown().await;
}

#[tokio::test]
async fn shutdown_posts_lifecycle_notifications() {
    let harness = start_harness(false, Vec::new()).await;
    let notifier = harness.notifier.clone();

    assert!(
        notifier
            .bodies()
            .iter()
            .any(|body| body == "Running in background")
    );

    harness.resident.shutdown().await;
    assert!(notifier.bodies().iter().any(|body| body == "Stopped"));
}

#[tokio::test]
async fn verified_pickup_flow_reaches_server_truth() {
    let order = pickup_order("ord-7");
    let harness = start_harness(false, vec![order.clone()]).await;

    harness.engine.refresh().await;
    assert_eq!(
        harness.engine.claim("ord-7").await,
        ClaimOutcome::Requested
    );

    // Server-side state after a successful pickup verification.
    let mut verified = order.clone();
    verified.rider_id = Some("rider-9".to_string());
    verified.is_pickup_verified = true;
    for group_ref in &mut verified.group_order_ids {
        group_ref.tracking_status = TrackingStatus::OrderPlacedForPickup;
    }
    harness.api.set_orders(vec![verified]);

    let outcome = harness.engine.verify("ord-7", "1234", None).await;
    assert_eq!(outcome, VerifyOutcome::Verified);

    let snapshot = harness.engine.orders();
    assert!(snapshot[0].is_pickup_verified);
    assert_eq!(
        snapshot[0].group_order_ids[0].tracking_status,
        TrackingStatus::OrderPlacedForPickup
    );

    harness.resident.shutdown().await;
}
