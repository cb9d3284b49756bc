//! Application state for Axum handlers.

use std::sync::Arc;
use stockline_runtime::metrics::PrometheusMetrics;
use stockline_runtime::{InventoryEngine, StockHealthProbe};

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone: every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// The inventory engine all stock routes delegate to.
    pub engine: Arc<InventoryEngine>,
    /// Backend probe behind the readiness route.
    pub health: Arc<StockHealthProbe>,
    /// Exporter behind `/metrics`; the route answers 404 without one.
    pub metrics: Option<PrometheusMetrics>,
}

impl AppState {
    /// Create state without a metrics exporter.
    #[must_use]
    pub const fn new(engine: Arc<InventoryEngine>, health: Arc<StockHealthProbe>) -> Self {
        Self {
            engine,
            health,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: PrometheusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
