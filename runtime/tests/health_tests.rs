//! Health probe behaviour per backend.

#![allow(clippy::unwrap_used)]

mod common;

use common::Harness;
use stockline_core::item::ItemId;
use stockline_core::reconciliation::{MarkerReason, ReconciliationLog};
use stockline_runtime::{Component, HealthStatus, StockHealthProbe};

fn probe(h: &Harness, backlog: u64) -> StockHealthProbe {
    StockHealthProbe::new(h.backends(), backlog)
}

#[tokio::test]
async fn all_backends_up_is_healthy() {
    let h = Harness::new().with_item(1, 1);
    let report = probe(&h, 10).check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.components.len(), 4);
    assert_eq!(report.pending_markers, Some(0));
}

#[tokio::test]
async fn counter_outage_only_degrades() {
    let h = Harness::new();
    h.counter.set_unavailable(true);

    let report = probe(&h, 10).check().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.status_of(Component::Counter), Some(HealthStatus::Degraded));
}

#[tokio::test]
async fn lock_outage_is_unhealthy() {
    let h = Harness::new();
    h.locks.set_unavailable(true);

    let report = probe(&h, 10).check().await;

    assert!(!report.status.is_ready());
    assert_eq!(report.status_of(Component::Locks), Some(HealthStatus::Unhealthy));
}

#[tokio::test]
async fn record_outage_is_unhealthy() {
    let h = Harness::new();
    h.records.set_unavailable(true);

    let report = probe(&h, 10).check().await;

    assert_eq!(report.status_of(Component::Records), Some(HealthStatus::Unhealthy));
}

#[tokio::test]
async fn marker_backlog_degrades() {
    let h = Harness::new();
    for id in 1..=3 {
        h.markers
            .record(ItemId::new(id), None, MarkerReason::CommitTimeout)
            .await
            .unwrap();
    }

    let report = probe(&h, 2).check().await;

    assert_eq!(
        report.status_of(Component::Reconciliation),
        Some(HealthStatus::Degraded)
    );
    assert_eq!(report.pending_markers, Some(3));
}
