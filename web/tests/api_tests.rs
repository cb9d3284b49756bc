//! HTTP contract of the stock routes, over in-memory backends.

#![allow(clippy::unwrap_used)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use stockline_core::item::ItemId;
use stockline_core::lock::{DistributedLock, LockKey};
use stockline_core::quantity::Quantity;
use stockline_core::stock::StockSource;
use stockline_runtime::metrics::PrometheusMetrics;
use stockline_runtime::{EngineConfig, InventoryEngine, StockBackends, StockHealthProbe};
use stockline_testing::{
    InMemoryDistributedLock, InMemoryReconciliationLog, InMemoryStockCounter,
    InMemoryStockRecordStore, fixtures, mocks::test_clock,
};
use stockline_web::handlers::stock::{
    BatchResponse, LineStatus, StockItemResponse, StockResponse,
};
use stockline_web::{AppState, CORRELATION_ID_HEADER, router};

struct TestApp {
    server: TestServer,
    records: InMemoryStockRecordStore,
    locks: InMemoryDistributedLock,
    counter: InMemoryStockCounter,
}

/// Items 1..=3 in group 10 and item 4 in group 20, 5 units each.
fn app_with(metrics: Option<PrometheusMetrics>) -> TestApp {
    stockline_testing::init_test_tracing();
    let records = InMemoryStockRecordStore::new();
    let locks = InMemoryDistributedLock::new();
    let counter = InMemoryStockCounter::new();
    for id in 1..=3 {
        records.seed(fixtures::stock_item(id, 10, 5));
    }
    records.seed(fixtures::stock_item(4, 20, 5));

    let backends = StockBackends::new(
        Arc::new(records.clone()),
        Arc::new(locks.clone()),
        Arc::new(counter.clone()),
        Arc::new(InMemoryReconciliationLog::new()),
    );
    let config = EngineConfig::builder()
        .wait_timeout(Duration::from_millis(50))
        .build();
    let engine = InventoryEngine::new(backends.clone(), Arc::new(test_clock()), config);

    let mut state = AppState::new(Arc::new(engine), Arc::new(StockHealthProbe::new(backends, 100)));
    if let Some(metrics) = metrics {
        state = state.with_metrics(metrics);
    }

    TestApp {
        server: TestServer::new(router(state)).unwrap(),
        records,
        locks,
        counter,
    }
}

fn app() -> TestApp {
    app_with(None)
}

#[tokio::test]
async fn get_unknown_item_is_404() {
    let app = app();

    let response = app.server.get("/api/v1/stocks/99").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_item_id_is_400() {
    let app = app();

    let response = app.server.get("/api/v1/stocks/not-a-number").await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn set_then_get_reads_the_new_level() {
    let app = app();

    let response = app
        .server
        .post("/api/v1/stocks/1")
        .json(&json!({ "quantity": 50 }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let item: StockItemResponse = response.json();
    assert_eq!(item.available, Quantity::new(50));

    let response = app.server.get("/api/v1/stocks/1").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let stock: StockResponse = response.json();
    assert_eq!(stock.item_id, ItemId::new(1));
    assert_eq!(stock.available, Quantity::new(50));
    assert_eq!(stock.source, StockSource::Counter);
}

#[tokio::test]
async fn negative_quantity_is_422() {
    let app = app();

    let response = app
        .server
        .post("/api/v1/stocks/1")
        .json(&json!({ "quantity": -1 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_QUANTITY");
    assert_eq!(app.records.get(ItemId::new(1)).unwrap().available, Quantity::new(5));
}

#[tokio::test]
async fn malformed_body_is_400() {
    let app = app();

    let response = app
        .server
        .post("/api/v1/stocks/1")
        .json(&json!({ "qty": "lots" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn held_lock_is_423() {
    let app = app();
    let lease = app
        .locks
        .acquire(&LockKey::stock(ItemId::new(2)), Duration::from_secs(10), Duration::ZERO)
        .await
        .unwrap();

    let response = app
        .server
        .post("/api/v1/stocks/2")
        .json(&json!({ "quantity": 9 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::LOCKED);
    let body: Value = response.json();
    assert_eq!(body["code"], "LOCKED");
    app.locks.release(&lease).await.unwrap();
}

#[tokio::test]
async fn lock_outage_is_503() {
    let app = app();
    app.locks.set_unavailable(true);

    let response = app
        .server
        .post("/api/v1/stocks/1")
        .json(&json!({ "quantity": 9 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn batch_is_200_with_per_line_results() {
    let app = app();
    let lease = app
        .locks
        .acquire(&LockKey::stock(ItemId::new(3)), Duration::from_secs(10), Duration::ZERO)
        .await
        .unwrap();

    let response = app
        .server
        .put("/api/v1/groups/10/stocks")
        .json(&json!([
            { "itemId": 1, "quantity": 7 },
            { "itemId": 2, "quantity": -4 },
            { "itemId": 3, "quantity": 1 },
            { "itemId": 4, "quantity": 1 },
            { "itemId": 77, "quantity": 1 },
        ]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let batch: BatchResponse = response.json();
    let statuses: Vec<_> = batch.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            LineStatus::Committed,
            LineStatus::Rejected,
            LineStatus::Rejected,
            LineStatus::Rejected,
            LineStatus::Rejected,
        ]
    );

    let raw: Value = serde_json::to_value(&batch).unwrap();
    assert_eq!(raw["results"][0]["available"], 7);
    assert_eq!(raw["results"][1]["reason"], "INVALID_QUANTITY");
    assert_eq!(raw["results"][2]["reason"], "LOCKED");
    assert_eq!(raw["results"][3]["reason"], "NOT_FOUND");
    assert_eq!(raw["results"][4]["reason"], "NOT_FOUND");

    assert_eq!(app.records.get(ItemId::new(1)).unwrap().available, Quantity::new(7));
    assert_eq!(app.records.get(ItemId::new(4)).unwrap().available, Quantity::new(5));
    app.locks.release(&lease).await.unwrap();
}

#[tokio::test]
async fn responses_echo_correlation_id() {
    let app = app();
    let id = "6f1c9b3e-0d7a-4c55-9a3e-2b8f1f0c7d11";

    let response = app
        .server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-correlation-id"),
            HeaderValue::from_static(id),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(CORRELATION_ID_HEADER), id);
}

#[tokio::test]
async fn readiness_degrades_but_stays_up_without_counter() {
    let app = app();
    app.counter.set_unavailable(true);

    let response = app.server.get("/health/ready").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let report: Value = response.json();
    assert_eq!(report["status"], "degraded");
}

#[tokio::test]
async fn readiness_fails_without_record_store() {
    let app = app();
    app.records.set_unavailable(true);

    let response = app.server.get("/health/ready").await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let report: Value = response.json();
    assert_eq!(report["status"], "unhealthy");
}

#[tokio::test]
async fn metrics_route_needs_an_exporter() {
    let without = app();
    assert_eq!(
        without.server.get("/metrics").await.status_code(),
        StatusCode::NOT_FOUND
    );

    let with = app_with(Some(PrometheusMetrics::detached()));
    let response = with.server.get("/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(
        response
            .header("content-type")
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
}
