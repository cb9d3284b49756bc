//! Reconciliation sweep: heals counter drift from the durable record.
//!
//! Two passes, both under the item lock so they never interleave with a
//! mutation of the same item:
//!
//! - **Marker drain**: items with an unresolved uncommitted-write marker
//!   (commit timeout, lost lease, failed write-through) are reconciled first,
//!   and their markers resolved.
//! - **Full pass**: every record, in keyset pages, so drift nobody noticed is
//!   bounded by the pass interval.
//!
//! The durable record is authoritative; the counter is always overwritten with it.

use crate::backends::StockBackends;
use crate::metrics::ReconciliationMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stockline_core::counter::CounterKey;
use stockline_core::error::StockError;
use stockline_core::item::ItemId;
use stockline_core::lock::LockError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Sweep tuning.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Lease held while reconciling one item.
    pub lease_duration: Duration,
    /// Busy items are skipped after this wait and retried next pass.
    pub wait_timeout: Duration,
    /// Records per keyset page in a full pass.
    pub page_size: u32,
    /// Markers drained per tick.
    pub marker_batch: u32,
    /// Time between ticks.
    pub interval: Duration,
    /// Run a full pass every this many ticks (markers drain every tick).
    pub full_pass_every: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(5),
            wait_timeout: Duration::from_millis(100),
            page_size: 500,
            marker_batch: 100,
            interval: Duration::from_secs(60),
            full_pass_every: 10,
        }
    }
}

/// What reconciling one item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemReconciliation {
    /// Counter already matched the record (it was rewritten anyway to refresh the TTL).
    Unchanged,
    /// Counter was missing or different and now matches the record.
    Repaired {
        /// Counter value before the repair.
        previous: Option<i64>,
        /// Committed value now in the counter.
        current: i64,
    },
    /// Item lock was busy; try again later.
    Skipped,
    /// No durable record exists.
    NotFound,
}

impl ItemReconciliation {
    const fn label(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Repaired { .. } => "repaired",
            Self::Skipped => "skipped",
            Self::NotFound => "not_found",
        }
    }
}

/// Tally of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items examined.
    pub scanned: u64,
    /// Items whose counter was corrected.
    pub repaired: u64,
    /// Items whose counter already matched.
    pub unchanged: u64,
    /// Items skipped because they were locked.
    pub skipped: u64,
    /// Items with no durable record.
    pub missing: u64,
    /// Items that failed with a backend error.
    pub failed: u64,
}

impl SweepReport {
    fn tally(&mut self, outcome: &Result<ItemReconciliation, StockError>) {
        self.scanned += 1;
        match outcome {
            Ok(ItemReconciliation::Unchanged) => self.unchanged += 1,
            Ok(ItemReconciliation::Repaired { .. }) => self.repaired += 1,
            Ok(ItemReconciliation::Skipped) => self.skipped += 1,
            Ok(ItemReconciliation::NotFound) => self.missing += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Periodic counter repair.
#[derive(Debug, Clone)]
pub struct ReconciliationSweep {
    backends: StockBackends,
    config: SweepConfig,
}

impl ReconciliationSweep {
    /// Create a sweep over the given stores.
    #[must_use]
    pub const fn new(backends: StockBackends, config: SweepConfig) -> Self {
        Self { backends, config }
    }

    /// Reconcile one item: lock, read the record, overwrite the counter, release.
    ///
    /// Idempotent: running it twice with no mutation in between leaves the
    /// counter unchanged the second time.
    ///
    /// # Errors
    ///
    /// [`StockError::LockService`], [`StockError::RecordStore`], or
    /// [`StockError::CounterStore`] on backend failure.
    pub async fn reconcile_item(&self, item_id: ItemId) -> Result<ItemReconciliation, StockError> {
        let gateway = &self.backends.gateway;
        let held = match gateway
            .acquire(item_id, self.config.lease_duration, self.config.wait_timeout)
            .await
        {
            Ok(held) => held,
            Err(LockError::Unavailable { .. }) => {
                let outcome = ItemReconciliation::Skipped;
                ReconciliationMetrics::record_item(outcome.label());
                return Ok(outcome);
            },
            Err(err) => return Err(StockError::LockService(err.to_string())),
        };

        let outcome = self.reconcile_held(item_id).await;

        if let Err(err) = gateway.release(held).await {
            tracing::warn!(%item_id, error = %err, "Sweep lease release failed");
        }

        if let Ok(outcome) = &outcome {
            ReconciliationMetrics::record_item(outcome.label());
            if let ItemReconciliation::Repaired { previous, current } = outcome {
                tracing::info!(%item_id, ?previous, current, "Counter reconciled");
            }
        }
        outcome
    }

    async fn reconcile_held(&self, item_id: ItemId) -> Result<ItemReconciliation, StockError> {
        let Some(item) = self
            .backends
            .gateway
            .load(item_id)
            .await
            .map_err(|err| StockError::RecordStore(err.to_string()))?
        else {
            return Ok(ItemReconciliation::NotFound);
        };

        let key = CounterKey::stock(item_id);
        let counter = &self.backends.counter;
        let current = i64::from(item.available);
        let previous = match counter.get_value(&key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(%item_id, error = %err, "Counter read failed during sweep");
                None
            },
        };
        counter
            .set_value(&key, current)
            .await
            .map_err(|err| StockError::CounterStore(err.to_string()))?;

        Ok(if previous == Some(current) {
            ItemReconciliation::Unchanged
        } else {
            ItemReconciliation::Repaired { previous, current }
        })
    }

    /// Reconcile items with unresolved markers and resolve those markers.
    ///
    /// Markers for skipped or failed items stay pending.
    ///
    /// # Errors
    ///
    /// [`StockError::RecordStore`] if the marker log cannot be read.
    pub async fn drain_markers(&self) -> Result<SweepReport, StockError> {
        let markers = self
            .backends
            .markers
            .pending(self.config.marker_batch)
            .await
            .map_err(|err| StockError::RecordStore(err.to_string()))?;

        let mut report = SweepReport::default();
        for marker in markers {
            let outcome = self.reconcile_item(marker.item_id).await;
            report.tally(&outcome);
            match outcome {
                Ok(ItemReconciliation::Skipped) => {},
                Ok(_) => {
                    if let Err(err) = self.backends.markers.resolve(marker.id).await {
                        tracing::warn!(marker_id = marker.id, error = %err, "Failed to resolve marker");
                    }
                },
                Err(err) => {
                    tracing::warn!(
                        item_id = %marker.item_id,
                        reason = marker.reason.as_str(),
                        error = %err,
                        "Marker reconciliation failed"
                    );
                },
            }
        }
        Ok(report)
    }

    /// Reconcile every record in keyset pages.
    ///
    /// # Errors
    ///
    /// [`StockError::RecordStore`] if a page cannot be read. Per-item failures
    /// are counted, not returned.
    pub async fn full_pass(&self) -> Result<SweepReport, StockError> {
        let started = Instant::now();
        let mut report = SweepReport::default();
        let mut after = None;

        loop {
            let page = self
                .backends
                .gateway
                .list_page(after, self.config.page_size)
                .await
                .map_err(|err| StockError::RecordStore(err.to_string()))?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.item_id);

            for item in &page {
                let outcome = self.reconcile_item(item.item_id).await;
                if let Err(err) = &outcome {
                    tracing::warn!(item_id = %item.item_id, error = %err, "Item reconciliation failed");
                }
                report.tally(&outcome);
            }

            if page.len() < self.config.page_size as usize {
                break;
            }
        }

        ReconciliationMetrics::record_pass("full", started.elapsed());
        tracing::info!(
            scanned = report.scanned,
            repaired = report.repaired,
            skipped = report.skipped,
            failed = report.failed,
            "Full reconciliation pass finished"
        );
        Ok(report)
    }

    async fn tick(&self, tick: u64) {
        let started = Instant::now();
        match self.drain_markers().await {
            Ok(report) if report.scanned > 0 => {
                ReconciliationMetrics::record_pass("markers", started.elapsed());
                tracing::info!(
                    scanned = report.scanned,
                    repaired = report.repaired,
                    skipped = report.skipped,
                    "Marker drain finished"
                );
            },
            Ok(_) => {},
            Err(err) => tracing::error!(error = %err, "Marker drain failed"),
        }

        let every = u64::from(self.config.full_pass_every.max(1));
        if tick % every == 0 {
            if let Err(err) = self.full_pass().await {
                tracing::error!(error = %err, "Full reconciliation pass failed");
            }
        }
    }

    /// Run the sweep on its interval until `shutdown` fires.
    #[must_use]
    pub fn spawn_periodic(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick: u64 = 0;

            tracing::info!(interval = ?self.config.interval, "Reconciliation sweep started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick(tick).await;
                        tick = tick.wrapping_add(1);
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Reconciliation sweep stopping");
                        break;
                    }
                }
            }
        })
    }
}
