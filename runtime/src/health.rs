//! Readiness probing of the stock backends.
//!
//! Each backend maps to one [`Component`]. Severity follows what the engine
//! can still do without it: reads survive a counter outage by falling back
//! to records, while mutations fail closed without locks or records.

use crate::backends::StockBackends;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use stockline_core::counter::CounterKey;
use stockline_core::item::ItemId;
use stockline_core::lock::LockError;

/// Severity, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving normally.
    Healthy,
    /// Serving, with reduced guarantees or a reconciliation backlog.
    Degraded,
    /// Mutations cannot be served.
    Unhealthy,
}

impl HealthStatus {
    /// Whether the service should receive traffic.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Backend probed by [`StockHealthProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Durable stock records.
    Records,
    /// Distributed per-item locks.
    Locks,
    /// Fast stock counter.
    Counter,
    /// Reconciliation marker log.
    Reconciliation,
}

/// Outcome of probing one component.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    /// Component probed.
    pub component: Component,
    /// Its severity.
    pub status: HealthStatus,
    /// Backend error or reason for degradation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    const fn up(component: Component) -> Self {
        Self {
            component,
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    fn down(component: Component, status: HealthStatus, detail: impl fmt::Display) -> Self {
        Self {
            component,
            status,
            detail: Some(detail.to_string()),
        }
    }
}

/// Probe results with the overall severity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Worst component severity.
    pub status: HealthStatus,
    /// One entry per component, in probe order.
    pub components: Vec<ComponentHealth>,
    /// Unresolved reconciliation markers, when the log answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_markers: Option<u64>,
    /// When the probe ran.
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Assemble a report; the overall status is the worst component status.
    #[must_use]
    pub fn from_components(components: Vec<ComponentHealth>, pending_markers: Option<u64>) -> Self {
        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            components,
            pending_markers,
            checked_at: chrono::Utc::now(),
        }
    }

    /// Severity reported for `component`, if it was probed.
    #[must_use]
    pub fn status_of(&self, component: Component) -> Option<HealthStatus> {
        self.components
            .iter()
            .find(|c| c.component == component)
            .map(|c| c.status)
    }
}

const PROBE_LEASE: Duration = Duration::from_secs(1);
const PROBE_ITEM: ItemId = ItemId::new(0);

/// Probes every backend the engine depends on.
#[derive(Debug, Clone)]
pub struct StockHealthProbe {
    backends: StockBackends,
    marker_backlog_threshold: u64,
}

impl StockHealthProbe {
    /// More than `marker_backlog_threshold` pending markers reports degraded.
    #[must_use]
    pub const fn new(backends: StockBackends, marker_backlog_threshold: u64) -> Self {
        Self {
            backends,
            marker_backlog_threshold,
        }
    }

    /// Probe all components.
    pub async fn check(&self) -> HealthReport {
        let (markers, pending) = self.probe_markers().await;
        let components = vec![
            self.probe_records().await,
            self.probe_locks().await,
            self.probe_counter().await,
            markers,
        ];
        HealthReport::from_components(components, pending)
    }

    async fn probe_records(&self) -> ComponentHealth {
        match self.backends.gateway.list_page(None, 1).await {
            Ok(_) => ComponentHealth::up(Component::Records),
            Err(err) => ComponentHealth::down(Component::Records, HealthStatus::Unhealthy, err),
        }
    }

    /// A busy probe key still proves the lock service answers.
    async fn probe_locks(&self) -> ComponentHealth {
        let gateway = &self.backends.gateway;
        match gateway.acquire(PROBE_ITEM, PROBE_LEASE, Duration::ZERO).await {
            Ok(held) => {
                if let Err(err) = gateway.release(held).await {
                    tracing::debug!(error = %err, "Probe lease release failed");
                }
                ComponentHealth::up(Component::Locks)
            },
            Err(LockError::Unavailable { .. }) => ComponentHealth::up(Component::Locks),
            Err(err) => ComponentHealth::down(Component::Locks, HealthStatus::Unhealthy, err),
        }
    }

    async fn probe_counter(&self) -> ComponentHealth {
        let key = CounterKey::from_raw("stock:health");
        match self.backends.counter.get_value(&key).await {
            Ok(_) => ComponentHealth::up(Component::Counter),
            Err(err) => ComponentHealth::down(Component::Counter, HealthStatus::Degraded, err),
        }
    }

    async fn probe_markers(&self) -> (ComponentHealth, Option<u64>) {
        match self.backends.markers.count_pending().await {
            Ok(pending) if pending > self.marker_backlog_threshold => (
                ComponentHealth::down(
                    Component::Reconciliation,
                    HealthStatus::Degraded,
                    format_args!("{pending} pending markers"),
                ),
                Some(pending),
            ),
            Ok(pending) => (ComponentHealth::up(Component::Reconciliation), Some(pending)),
            Err(err) => (
                ComponentHealth::down(Component::Reconciliation, HealthStatus::Unhealthy, err),
                None,
            ),
        }
    }
}
