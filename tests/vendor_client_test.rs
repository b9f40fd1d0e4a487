//! Vendor client tests against in-process mock vendors.
//!
//! The mocks are plain axum servers on ephemeral ports, so these tests run
//! without any external infrastructure.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use dispatch_core::services::breaker::CircuitState;
use dispatch_core::services::vendor::{
    CallStatus, VendorClient, VendorConfig, ASYNC_VENDOR, SYNC_VENDOR,
};

#[derive(Clone, Default)]
struct Captured {
    hits: Arc<AtomicU32>,
    last: Arc<Mutex<Option<(HeaderMap, Value)>>>,
}

async fn capture_handler(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    captured.hits.fetch_add(1, Ordering::SeqCst);
    *captured.last.lock().await = Some((headers, body.clone()));
    Json(json!({"ack": true, "echo": body}))
}

async fn failing_handler(State(captured): State<Captured>) -> (StatusCode, Json<Value>) {
    captured.hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "vendor exploded"})),
    )
}

async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock vendor");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn vendor_config(name: &str, base: &str, is_async: bool) -> VendorConfig {
    VendorConfig {
        name: name.to_string(),
        url: format!("{base}/process"),
        rate_limit_per_minute: 600,
        is_async,
        timeout_ms: 2000,
    }
}

#[tokio::test]
async fn sync_call_merges_request_fields_and_returns_data() {
    let captured = Captured::default();
    let base = spawn_mock(
        Router::new()
            .route("/process", post(capture_handler))
            .with_state(captured.clone()),
    )
    .await;

    let client = VendorClient::new(
        "http://localhost:8080",
        vec![vendor_config(SYNC_VENDOR, &base, false)],
    );

    let request_id = Uuid::new_v4();
    let outcome = client
        .call(SYNC_VENDOR, &json!({"type": "sync", "n": 42}), request_id)
        .await
        .expect("known vendor");

    assert_eq!(outcome.status, CallStatus::Success);
    assert!(!outcome.is_async);
    assert!(outcome.error.is_none());
    let data = outcome.data.expect("sync vendors return data");
    assert_eq!(data["ack"], true);

    let (headers, body) = captured.last.lock().await.clone().expect("vendor was hit");
    assert_eq!(
        headers.get("x-request-id").unwrap().to_str().unwrap(),
        request_id.to_string()
    );
    assert_eq!(body["requestId"], request_id.to_string());
    assert_eq!(body["n"], 42);
    assert!(body.get("timestamp").is_some());
    assert!(body.get("webhookUrl").is_none());
}

#[tokio::test]
async fn async_call_sends_webhook_url_and_reports_is_async() {
    let captured = Captured::default();
    let base = spawn_mock(
        Router::new()
            .route("/process", post(capture_handler))
            .with_state(captured.clone()),
    )
    .await;

    let client = VendorClient::new(
        "http://api.example:9000",
        vec![vendor_config(ASYNC_VENDOR, &base, true)],
    );

    let outcome = client
        .call(ASYNC_VENDOR, &json!({"type": "async"}), Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(outcome.status, CallStatus::Success);
    assert!(outcome.is_async);

    let (_, body) = captured.last.lock().await.clone().unwrap();
    assert_eq!(
        body["webhookUrl"],
        format!("http://api.example:9000/vendor-webhook/{ASYNC_VENDOR}")
    );
}

#[tokio::test]
async fn non_2xx_response_becomes_an_error_outcome() {
    let captured = Captured::default();
    let base = spawn_mock(
        Router::new()
            .route("/process", post(failing_handler))
            .with_state(captured.clone()),
    )
    .await;

    let client = VendorClient::new(
        "http://localhost:8080",
        vec![vendor_config(SYNC_VENDOR, &base, false)],
    );

    let outcome = client
        .call(SYNC_VENDOR, &json!({"a": 1}), Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(outcome.status, CallStatus::Error);
    assert!(outcome.data.is_none());
    let error = outcome.error.unwrap();
    assert!(
        error.contains("HTTP request failed"),
        "unexpected error text: {error}"
    );
    assert_eq!(captured.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_failures_open_the_circuit_and_stop_hitting_the_vendor() {
    let captured = Captured::default();
    let base = spawn_mock(
        Router::new()
            .route("/process", post(failing_handler))
            .with_state(captured.clone()),
    )
    .await;

    let client = VendorClient::new(
        "http://localhost:8080",
        vec![vendor_config(SYNC_VENDOR, &base, false)],
    );

    // Default breaker trips after 5 consecutive failures.
    for _ in 0..5 {
        let outcome = client
            .call(SYNC_VENDOR, &json!({"a": 1}), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome.status, CallStatus::Error);
    }
    assert_eq!(captured.hits.load(Ordering::SeqCst), 5);
    assert_eq!(
        client.breaker(SYNC_VENDOR).unwrap().state().await,
        CircuitState::Open
    );

    // Calls now fail fast without reaching the vendor.
    let outcome = client
        .call(SYNC_VENDOR, &json!({"a": 1}), Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(outcome.status, CallStatus::Error);
    assert!(outcome.error.unwrap().contains("open"));
    assert_eq!(captured.hits.load(Ordering::SeqCst), 5);

    // Manual close restores traffic to the vendor.
    client.breaker(SYNC_VENDOR).unwrap().force_close().await;
    let _ = client
        .call(SYNC_VENDOR, &json!({"a": 1}), Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(captured.hits.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn slow_vendor_times_out_into_an_error_outcome() {
    let base = spawn_mock(Router::new().route(
        "/process",
        post(|| async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Json(json!({"late": true}))
        }),
    ))
    .await;

    let mut config = vendor_config(SYNC_VENDOR, &base, false);
    config.timeout_ms = 200;
    let client = VendorClient::new("http://localhost:8080", vec![config]);

    let outcome = client
        .call(SYNC_VENDOR, &json!({"a": 1}), Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(outcome.status, CallStatus::Error);
    let error = outcome.error.unwrap();
    assert!(error.contains("timed out"), "unexpected error text: {error}");
}

#[tokio::test]
async fn health_check_all_reports_per_vendor_reachability() {
    let base = spawn_mock(
        Router::new().route("/health", get(|| async { Json(json!({"status": "ok"})) })),
    )
    .await;

    let healthy = vendor_config(SYNC_VENDOR, &base, false);
    let unreachable = vendor_config(ASYNC_VENDOR, "http://127.0.0.1:1", true);

    let client = VendorClient::new("http://localhost:8080", vec![healthy, unreachable]);
    let results = client.health_check_all().await;

    assert_eq!(results[SYNC_VENDOR], true);
    assert_eq!(results[ASYNC_VENDOR], false);
}
