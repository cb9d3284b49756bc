//! Axum HTTP boundary for Stockline.
//!
//! Thin translation between HTTP and the [`InventoryEngine`]: handlers parse
//! the request, call exactly one engine operation, and map the result. All
//! locking, validation, and consistency rules live in the engine.
//!
//! # Routes
//!
//! | Route | Engine call |
//! |---|---|
//! | `GET /api/v1/stocks/:item_id` | `get_stock` |
//! | `POST /api/v1/stocks/:item_id` | `set_stock` |
//! | `PUT /api/v1/groups/:group_id/stocks` | `batch_set_stock` |
//! | `GET /health`, `GET /health/ready` | liveness, backend readiness |
//! | `GET /metrics` | Prometheus exposition |
//!
//! # Example
//!
//! ```ignore
//! use stockline_web::{AppState, router};
//!
//! let state = AppState::new(engine, health).with_metrics(metrics);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router(state)).await?;
//! ```
//!
//! [`InventoryEngine`]: stockline_runtime::InventoryEngine

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, put},
};
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{ApiJson, CorrelationId, IdPath};
pub use middleware::{CORRELATION_ID_HEADER, track_request};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the full router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/stocks/:item_id",
            get(handlers::get_stock).post(handlers::set_stock),
        )
        .route(
            "/api/v1/groups/:group_id/stocks",
            put(handlers::batch_set_stock),
        )
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_request))
        .with_state(state)
}
