//! In-memory marker log.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use stockline_core::BoxFuture;
use stockline_core::item::ItemId;
use stockline_core::lock::LeaseToken;
use stockline_core::reconciliation::{
    MarkerReason, ReconciliationError, ReconciliationLog, UncommittedMarker,
};

#[derive(Debug, Default)]
struct Entries {
    next_id: i64,
    markers: Vec<(UncommittedMarker, bool)>,
}

/// `Vec`-backed [`ReconciliationLog`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReconciliationLog {
    entries: Arc<Mutex<Entries>>,
}

impl InMemoryReconciliationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every marker ever recorded, resolved or not.
    #[must_use]
    pub fn all(&self) -> Vec<UncommittedMarker> {
        self.entries
            .lock()
            .map(|e| e.markers.iter().map(|(m, _)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Unresolved reasons recorded for one item, oldest first.
    #[must_use]
    pub fn pending_reasons(&self, item_id: ItemId) -> Vec<MarkerReason> {
        self.entries
            .lock()
            .map(|e| {
                e.markers
                    .iter()
                    .filter(|(m, resolved)| !resolved && m.item_id == item_id)
                    .map(|(m, _)| m.reason)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, Entries>, ReconciliationError> {
        self.entries
            .lock()
            .map_err(|_| ReconciliationError::Storage("Mutex lock failed".into()))
    }
}

impl ReconciliationLog for InMemoryReconciliationLog {
    fn record(
        &self,
        item_id: ItemId,
        lease_token: Option<&LeaseToken>,
        reason: MarkerReason,
    ) -> BoxFuture<'_, Result<i64, ReconciliationError>> {
        let lease_token = lease_token.cloned();
        Box::pin(async move {
            let mut entries = self.guard()?;
            entries.next_id += 1;
            let id = entries.next_id;
            entries.markers.push((
                UncommittedMarker {
                    id,
                    item_id,
                    lease_token,
                    reason,
                    created_at: Utc::now(),
                },
                false,
            ));
            Ok(id)
        })
    }

    fn pending(
        &self,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<UncommittedMarker>, ReconciliationError>> {
        Box::pin(async move {
            Ok(self
                .guard()?
                .markers
                .iter()
                .filter(|(_, resolved)| !resolved)
                .take(limit as usize)
                .map(|(m, _)| m.clone())
                .collect())
        })
    }

    fn resolve(&self, marker_id: i64) -> BoxFuture<'_, Result<(), ReconciliationError>> {
        Box::pin(async move {
            if let Some((_, resolved)) = self
                .guard()?
                .markers
                .iter_mut()
                .find(|(m, _)| m.id == marker_id)
            {
                *resolved = true;
            }
            Ok(())
        })
    }

    fn count_pending(&self) -> BoxFuture<'_, Result<u64, ReconciliationError>> {
        Box::pin(async move {
            Ok(self
                .guard()?
                .markers
                .iter()
                .filter(|(_, resolved)| !resolved)
                .count() as u64)
        })
    }
}
