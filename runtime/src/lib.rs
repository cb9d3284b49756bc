//! # Stockline Runtime
//!
//! The inventory engine and everything that keeps its counter honest.
//!
//! ## Core Components
//!
//! - **`InventoryEngine`**: lock-guarded decrement, increment, set, and batch updates,
//!   plus advisory reads with counter fallback
//! - **`ReconciliationSweep`**: periodic counter repair from the durable record
//! - **Resilience**: retry decorators for the counter and lock backends, and a
//!   circuit breaker for counter reads
//! - **Observability**: Prometheus metrics and backend health checks
//!
//! ## Example
//!
//! ```ignore
//! use stockline_runtime::{EngineConfig, InventoryEngine, StockBackends};
//!
//! let backends = StockBackends::new(records, locks, counter, markers);
//! let engine = InventoryEngine::new(backends, Arc::new(SystemClock), EngineConfig::default());
//!
//! engine.decrement(item_id, 2).await?;
//! let snapshot = engine.get_stock(item_id).await?;
//! ```

/// Shared handles to the backing stores
pub mod backends;

/// Per-item results of a group update
pub mod batch;

/// Circuit breaker for advisory reads
pub mod circuit_breaker;

/// The inventory mutation engine
pub mod engine;

/// Backend health checks
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// Counter reconciliation sweep
pub mod reconcile;

/// Retry decorators for backends
pub mod resilient;

/// Retry logic with exponential backoff
pub mod retry;

pub use backends::StockBackends;
pub use batch::{BatchItemResult, ItemOutcome, RejectReason};
pub use engine::{EngineConfig, InventoryEngine};
pub use health::{Component, ComponentHealth, HealthReport, HealthStatus, StockHealthProbe};
pub use reconcile::{ItemReconciliation, ReconciliationSweep, SweepConfig, SweepReport};
pub use resilient::{RetryingCounter, RetryingLock};
pub use retry::RetryPolicy;
