//! Prometheus metrics for the inventory subsystem.
//!
//! Covers:
//! - Stock mutations (outcome, latency, lock contention, version retries)
//! - Counter write-through (drift, failures) and advisory reads
//! - Reconciliation markers and sweeps
//! - Circuit breaker state and backend retries
//!
//! # Example
//!
//! ```rust,no_run
//! use stockline_runtime::metrics::PrometheusMetrics;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::install()?;
//!
//! // Serve this from a /metrics route
//! let body = metrics.render();
//! # Ok(())
//! # }
//! ```

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Exporter setup failure.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Bucket configuration was rejected.
    #[error("invalid histogram buckets: {0}")]
    Build(String),
    /// A global recorder is already installed.
    #[error("recorder not installed: {0}")]
    Install(String),
}

/// Latency buckets in seconds: lock waits run up to the 5s default wait
/// timeout, durable commits are bounded by half the lease.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0,
];

/// Installed Prometheus recorder.
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: PrometheusHandle,
}

impl PrometheusMetrics {
    /// Register descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is already installed.
    pub fn install() -> Result<Self, MetricsError> {
        register_metrics();

        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    /// Build a recorder without installing it globally.
    ///
    /// Nothing is recorded through the `metrics` macros; rendering yields an
    /// empty exposition. Useful where the global recorder is owned elsewhere.
    #[must_use]
    pub fn detached() -> Self {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        Self { handle }
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

/// Describe every metric the workspace emits.
pub fn register_metrics() {
    // Mutations
    describe_counter!(
        "stock_mutations_total",
        "Stock mutations by operation and outcome"
    );
    describe_histogram!(
        "stock_mutation_duration_seconds",
        "Time from lock request to lock release for one mutation"
    );
    describe_counter!(
        "stock_lock_contended_total",
        "Mutations rejected because the item lock stayed busy"
    );
    describe_counter!(
        "stock_conflict_retries_total",
        "Durable writes retried after a version conflict"
    );

    // Counter
    describe_counter!(
        "stock_counter_drift_total",
        "Write-throughs where the counter disagreed with the committed record"
    );
    describe_counter!(
        "stock_counter_write_failures_total",
        "Write-throughs that could not update the counter"
    );
    describe_counter!("stock_reads_total", "Advisory stock reads by source");
    describe_counter!(
        "stock_read_repairs_total",
        "Counter entries restored from the durable record on read"
    );

    // Reconciliation
    describe_counter!(
        "stock_reconciliation_markers_total",
        "Uncommitted-mutation markers recorded, by reason"
    );
    describe_counter!(
        "stock_reconciliation_markers_resolved_total",
        "Markers resolved by the reconciliation sweep"
    );
    describe_counter!(
        "stock_reconciliation_items_total",
        "Items visited by the reconciliation sweep, by result"
    );
    describe_histogram!(
        "stock_reconciliation_pass_duration_seconds",
        "Time taken by one reconciliation pass"
    );

    // HTTP
    describe_counter!(
        "http_requests_total",
        "HTTP requests by method, route and status"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request latency by route"
    );

    // Resilience
    describe_gauge!(
        "stock_read_breaker_state",
        "Counter read breaker: 0 closed, 1 half-open, 2 open"
    );
    describe_counter!(
        "stock_read_breaker_rejections_total",
        "Counter reads short-circuited to the record"
    );
    describe_counter!(
        "stock_backend_retries_total",
        "Transient backend failures by what happened next: retried, recovered, gave_up"
    );
}

/// Mutation metrics recorder.
pub struct MutationMetrics;

impl MutationMetrics {
    /// Record one finished mutation.
    pub fn record(operation: &'static str, outcome: &'static str, duration: Duration) {
        counter!("stock_mutations_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("stock_mutation_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record a lock wait that timed out.
    pub fn record_contended() {
        counter!("stock_lock_contended_total").increment(1);
    }

    /// Record a version-conflict retry.
    pub fn record_conflict_retry() {
        counter!("stock_conflict_retries_total").increment(1);
    }
}

/// Counter metrics recorder.
pub struct CounterMetrics;

impl CounterMetrics {
    /// Record a write-through that found a diverged counter.
    pub fn record_drift() {
        counter!("stock_counter_drift_total").increment(1);
    }

    /// Record a write-through that failed.
    pub fn record_write_failure() {
        counter!("stock_counter_write_failures_total").increment(1);
    }

    /// Record an advisory read and where it was answered.
    pub fn record_read(source: &'static str) {
        counter!("stock_reads_total", "source" => source).increment(1);
    }

    /// Record a read-path repair.
    pub fn record_repair() {
        counter!("stock_read_repairs_total").increment(1);
    }
}

/// Reconciliation metrics recorder.
pub struct ReconciliationMetrics;

impl ReconciliationMetrics {
    /// Record a marker written by the engine.
    pub fn record_marker(reason: &'static str) {
        counter!("stock_reconciliation_markers_total", "reason" => reason).increment(1);
    }

    /// Record one item visited by a sweep.
    pub fn record_item(result: &'static str) {
        counter!("stock_reconciliation_items_total", "result" => result).increment(1);
    }

    /// Record a finished pass.
    pub fn record_pass(kind: &'static str, duration: Duration) {
        histogram!("stock_reconciliation_pass_duration_seconds", "kind" => kind)
            .record(duration.as_secs_f64());
    }
}

/// Read breaker metrics recorder.
pub struct CircuitBreakerMetrics;

impl CircuitBreakerMetrics {
    /// Set the state gauge of breaker `name`.
    pub fn record_state(name: &'static str, state: f64) {
        gauge!("stock_read_breaker_state", "breaker" => name).set(state);
    }

    /// Count a call rejected while open.
    pub fn record_rejection(name: &'static str) {
        counter!("stock_read_breaker_rejections_total", "breaker" => name).increment(1);
    }
}

/// Backend retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// A transient failure that will be retried.
    pub fn record_attempt() {
        counter!("stock_backend_retries_total", "result" => "retried").increment(1);
    }

    /// A call that succeeded after at least one retry.
    pub fn record_success() {
        counter!("stock_backend_retries_total", "result" => "recovered").increment(1);
    }

    /// A call still failing when retries ran out.
    pub fn record_exhausted() {
        counter!("stock_backend_retries_total", "result" => "gave_up").increment(1);
    }
}
