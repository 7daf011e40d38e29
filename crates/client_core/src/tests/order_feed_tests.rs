use super::*;
use std::sync::atomic::AtomicUsize;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::{OrderId, VendorId};
use tokio::{
    net::TcpListener,
    time::{sleep, timeout, Instant},
};

struct TestSessionStore {
    vendor_id: Mutex<Option<VendorId>>,
    fail_reads: Mutex<bool>,
}

impl TestSessionStore {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            vendor_id: Mutex::new(None),
            fail_reads: Mutex::new(false),
        })
    }

    fn with_vendor(vendor_id: VendorId) -> Arc<Self> {
        Arc::new(Self {
            vendor_id: Mutex::new(Some(vendor_id)),
            fail_reads: Mutex::new(false),
        })
    }

    async fn clear(&self) {
        *self.vendor_id.lock().await = None;
    }

    async fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().await = fail;
    }
}

#[async_trait]
impl SessionStore for TestSessionStore {
    async fn vendor_id(&self) -> Result<Option<VendorId>> {
        if *self.fail_reads.lock().await {
            return Err(anyhow!("session store unavailable"));
        }
        Ok(*self.vendor_id.lock().await)
    }

    async fn set_vendor_id(&self, vendor_id: VendorId) -> Result<()> {
        *self.vendor_id.lock().await = Some(vendor_id);
        Ok(())
    }

    async fn clear_vendor_id(&self) -> Result<()> {
        *self.vendor_id.lock().await = None;
        Ok(())
    }
}

#[derive(Clone)]
enum OrdersReply {
    Orders(Value),
    OrdersAfter(Duration, Value),
    Fail,
}

#[derive(Clone)]
struct OrdersServerState {
    hits: Arc<AtomicUsize>,
    script: Arc<Mutex<Vec<OrdersReply>>>,
    default_reply: OrdersReply,
}

impl OrdersServerState {
    fn returning(body: Value) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            script: Arc::new(Mutex::new(Vec::new())),
            default_reply: OrdersReply::Orders(body),
        }
    }

    fn scripted(script: Vec<OrdersReply>, default_reply: OrdersReply) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            script: Arc::new(Mutex::new(script)),
            default_reply,
        }
    }
}

async fn handle_orders(State(state): State<OrdersServerState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let reply = {
        let mut script = state.script.lock().await;
        if script.is_empty() {
            state.default_reply.clone()
        } else {
            script.remove(0)
        }
    };
    match reply {
        OrdersReply::Orders(body) => Json(body).into_response(),
        OrdersReply::OrdersAfter(delay, body) => {
            sleep(delay).await;
            Json(body).into_response()
        }
        OrdersReply::Fail => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn spawn_orders_server(state: OrdersServerState) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/Orders/vendor/:vendor_id", get(handle_orders))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn sample_orders_json() -> Value {
    json!([{ "id": 1, "status": "NEW", "totalAmount": 250 }])
}

fn sample_orders() -> Vec<OrderRecord> {
    vec![OrderRecord {
        id: OrderId(1),
        status: "NEW".to_string(),
        total_amount: 250.0,
    }]
}

async fn next_event(rx: &mut broadcast::Receiver<FeedEvent>) -> FeedEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within deadline")
        .expect("event channel open")
}

async fn wait_for_snapshot(rx: &mut broadcast::Receiver<FeedEvent>) -> Vec<OrderRecord> {
    loop {
        if let FeedEvent::SnapshotReplaced { orders } = next_event(rx).await {
            return orders;
        }
    }
}

async fn wait_for_failure(rx: &mut broadcast::Receiver<FeedEvent>) -> String {
    loop {
        if let FeedEvent::FetchFailed { reason } = next_event(rx).await {
            return reason;
        }
    }
}

#[tokio::test]
async fn toggle_on_without_session_stays_offline_and_makes_no_requests() {
    let state = OrdersServerState::returning(sample_orders_json());
    let hits = state.hits.clone();
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::empty(),
        Duration::from_millis(20),
    );
    let mut rx = feed.subscribe();

    let online = feed.set_online(true).await.expect("toggle on");
    assert!(!online);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    let snapshot = feed.state().await;
    assert!(!snapshot.online);
    assert!(!snapshot.loading);
    assert!(snapshot.orders.is_empty());
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn going_online_fetches_immediately_and_replaces_snapshot() {
    let state = OrdersServerState::returning(sample_orders_json());
    let hits = state.hits.clone();
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_secs(30),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));
    match next_event(&mut rx).await {
        FeedEvent::OnlineChanged(true) => {}
        other => panic!("unexpected event: {other:?}"),
    }
    let orders = wait_for_snapshot(&mut rx).await;
    assert_eq!(orders, sample_orders());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let snapshot = feed.state().await;
    assert!(snapshot.online);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.orders, sample_orders());
}

#[tokio::test]
async fn polling_repeats_until_taken_offline() {
    let state = OrdersServerState::returning(sample_orders_json());
    let hits = state.hits.clone();
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_millis(25),
    );

    assert!(feed.set_online(true).await.expect("toggle on"));
    sleep(Duration::from_millis(150)).await;
    assert!(hits.load(Ordering::SeqCst) >= 3);

    assert!(!feed.set_online(false).await.expect("toggle off"));
    sleep(Duration::from_millis(50)).await;
    let frozen = hits.load(Ordering::SeqCst);
    sleep(Duration::from_millis(120)).await;
    assert_eq!(hits.load(Ordering::SeqCst), frozen);
    assert!(!feed.state().await.online);
}

#[tokio::test]
async fn failed_fetch_keeps_previous_snapshot_and_clears_loading() {
    let state = OrdersServerState::scripted(
        vec![OrdersReply::Orders(sample_orders_json())],
        OrdersReply::Fail,
    );
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_millis(100),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));
    let orders = wait_for_snapshot(&mut rx).await;
    assert_eq!(orders, sample_orders());

    let reason = wait_for_failure(&mut rx).await;
    assert!(!reason.is_empty());

    let snapshot = feed.state().await;
    assert!(snapshot.online);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.orders, sample_orders());
}

#[tokio::test]
async fn session_store_failure_mid_poll_is_absorbed() {
    let state = OrdersServerState::returning(sample_orders_json());
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let session = TestSessionStore::with_vendor(VendorId(1));
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        session.clone(),
        Duration::from_millis(50),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));
    wait_for_snapshot(&mut rx).await;

    session.set_fail_reads(true).await;
    let reason = wait_for_failure(&mut rx).await;
    assert!(reason.contains("session store unavailable"));

    let snapshot = feed.state().await;
    assert!(snapshot.online);
    assert_eq!(snapshot.orders, sample_orders());
}

#[tokio::test]
async fn stale_response_never_overwrites_newer_snapshot() {
    let stale_json = json!([
        { "id": 1, "status": "NEW", "totalAmount": 250 },
        { "id": 2, "status": "NEW", "totalAmount": 90 }
    ]);
    let fresh_json = json!([{ "id": 3, "status": "ACCEPTED", "totalAmount": 120 }]);
    let stale_records = vec![
        OrderRecord {
            id: OrderId(1),
            status: "NEW".to_string(),
            total_amount: 250.0,
        },
        OrderRecord {
            id: OrderId(2),
            status: "NEW".to_string(),
            total_amount: 90.0,
        },
    ];
    let fresh_records = vec![OrderRecord {
        id: OrderId(3),
        status: "ACCEPTED".to_string(),
        total_amount: 120.0,
    }];

    let state = OrdersServerState::scripted(
        vec![OrdersReply::OrdersAfter(
            Duration::from_millis(250),
            stale_json,
        )],
        OrdersReply::Orders(fresh_json),
    );
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_millis(50),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));

    let mut snapshots = Vec::new();
    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(FeedEvent::SnapshotReplaced { orders })) => snapshots.push(orders),
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }
    feed.shutdown().await;

    assert!(snapshots.iter().any(|orders| *orders == fresh_records));
    assert!(
        snapshots.iter().all(|orders| *orders != stale_records),
        "a slow first fetch must not overwrite newer results"
    );
    assert_eq!(feed.state().await.orders, fresh_records);
}

#[tokio::test]
async fn toggling_off_mid_fetch_discards_the_result() {
    let state = OrdersServerState::scripted(
        vec![OrdersReply::OrdersAfter(
            Duration::from_millis(200),
            sample_orders_json(),
        )],
        OrdersReply::Orders(sample_orders_json()),
    );
    let hits = state.hits.clone();
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_secs(30),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));
    sleep(Duration::from_millis(50)).await;
    assert!(feed.state().await.loading);
    assert!(!feed.set_online(false).await.expect("toggle off"));

    sleep(Duration::from_millis(300)).await;
    let snapshot = feed.state().await;
    assert!(!snapshot.online);
    assert!(!snapshot.loading);
    assert!(snapshot.orders.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let mut saw_snapshot = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, FeedEvent::SnapshotReplaced { .. }) {
            saw_snapshot = true;
        }
    }
    assert!(!saw_snapshot);
}

#[tokio::test]
async fn dropping_the_feed_mid_fetch_applies_nothing() {
    let state = OrdersServerState::scripted(
        vec![OrdersReply::OrdersAfter(
            Duration::from_millis(200),
            sample_orders_json(),
        )],
        OrdersReply::Orders(sample_orders_json()),
    );
    let hits = state.hits.clone();
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_secs(30),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));
    sleep(Duration::from_millis(50)).await;
    drop(feed);

    let saw_snapshot = timeout(Duration::from_millis(400), async {
        loop {
            match rx.recv().await {
                Ok(FeedEvent::SnapshotReplaced { .. }) => break true,
                Ok(_) => {}
                Err(_) => break false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(
        !saw_snapshot,
        "snapshot must not apply after the feed is dropped"
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_toggles_never_stack_timers() {
    let state = OrdersServerState::returning(sample_orders_json());
    let hits = state.hits.clone();
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_secs(30),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("on"));
    wait_for_snapshot(&mut rx).await;
    assert!(feed.set_online(true).await.expect("redundant on"));
    assert!(!feed.set_online(false).await.expect("off"));
    assert!(feed.set_online(true).await.expect("on again"));
    wait_for_snapshot(&mut rx).await;

    sleep(Duration::from_millis(150)).await;
    // one immediate fetch per arm, nothing from stacked or leftover timers
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn loading_tracks_the_in_flight_fetch() {
    let state = OrdersServerState::scripted(
        vec![OrdersReply::OrdersAfter(
            Duration::from_millis(150),
            sample_orders_json(),
        )],
        OrdersReply::Orders(sample_orders_json()),
    );
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        TestSessionStore::with_vendor(VendorId(1)),
        Duration::from_secs(30),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));
    sleep(Duration::from_millis(50)).await;
    assert!(feed.state().await.loading);

    wait_for_snapshot(&mut rx).await;
    assert!(!feed.state().await.loading);
}

#[tokio::test]
async fn session_removed_while_online_stops_requests() {
    let state = OrdersServerState::returning(sample_orders_json());
    let hits = state.hits.clone();
    let server_url = spawn_orders_server(state).await.expect("spawn server");
    let session = TestSessionStore::with_vendor(VendorId(1));
    let feed = OrderFeed::with_poll_period(
        ApiClient::new(&server_url),
        session.clone(),
        Duration::from_millis(40),
    );
    let mut rx = feed.subscribe();

    assert!(feed.set_online(true).await.expect("toggle on"));
    wait_for_snapshot(&mut rx).await;

    session.clear().await;
    sleep(Duration::from_millis(60)).await;
    let frozen = hits.load(Ordering::SeqCst);
    sleep(Duration::from_millis(160)).await;

    assert_eq!(hits.load(Ordering::SeqCst), frozen);
    let snapshot = feed.state().await;
    assert!(snapshot.online);
    assert_eq!(snapshot.orders, sample_orders());
}

#[tokio::test]
async fn toggle_on_with_failing_session_store_propagates_error() {
    let session = TestSessionStore::empty();
    session.set_fail_reads(true).await;
    let feed = OrderFeed::with_poll_period(
        ApiClient::new("http://127.0.0.1:9"),
        session,
        Duration::from_millis(30),
    );

    let err = feed.set_online(true).await.expect_err("store failure");
    assert!(err.to_string().contains("session store unavailable"));
    assert!(!feed.state().await.online);
}
