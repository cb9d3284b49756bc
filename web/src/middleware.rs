//! Per-request telemetry.
//!
//! [`track_request`] stamps every request with a correlation id, runs it
//! inside a span carrying that id, and records request count and latency.
//! Metrics are labelled by the matched route template (`/api/v1/stocks/:item_id`)
//! so item ids never become label values.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/v1/stocks/:item_id", get(get_stock))
//!     .layer(axum::middleware::from_fn(track_request));
//! ```

use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation id, inbound and outbound.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

const UNMATCHED_ROUTE: &str = "unmatched";

/// Caller-supplied id when it parses as a UUID.
fn inbound_correlation_id(headers: &HeaderMap) -> Option<Uuid> {
    let raw = headers.get(CORRELATION_ID_HEADER)?.to_str().ok()?;
    Uuid::parse_str(raw.trim()).ok()
}

/// Middleware body; mount with `axum::middleware::from_fn(track_request)`.
pub async fn track_request(mut request: Request, next: Next) -> Response {
    let correlation_id = inbound_correlation_id(request.headers()).unwrap_or_else(Uuid::new_v4);
    request.extensions_mut().insert(correlation_id);

    let method = request.method().as_str().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
        .to_owned();

    let span = tracing::info_span!(
        "http_request",
        %correlation_id,
        method = %method,
        route = %route,
        status = tracing::field::Empty,
    );

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let status = response.status().as_u16();
    span.record("status", status);

    metrics::counter!(
        "http_requests_total",
        "method" => method,
        "route" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("http_request_duration_seconds", "route" => route)
        .record(started.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}
