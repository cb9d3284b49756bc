//! Liveness, readiness, and metrics exposition.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use stockline_runtime::HealthReport;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// `GET /health`: the process is up. Backends are not touched.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// `GET /health/ready`: probes every backend.
///
/// `200` while healthy or degraded, `503` once mutations would fail closed.
/// The body is the full [`HealthReport`]:
///
/// ```json
/// {
///   "status": "degraded",
///   "components": [{ "component": "counter", "status": "degraded", "detail": "..." }],
///   "pendingMarkers": 0,
///   "checkedAt": "2025-01-01T00:00:00Z"
/// }
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.check().await;
    let code = if report.status.is_ready() {
        StatusCode::OK
    } else {
        tracing::warn!(status = %report.status, "Readiness probe failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// `GET /metrics`: Prometheus text format, `404` when no exporter is installed.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics.render(),
    )
        .into_response()
}
