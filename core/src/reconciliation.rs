//! Durable "uncommitted mutation" markers.
//!
//! The engine records a marker whenever it cannot confirm that the counter
//! matches the durable record: a durable write that timed out, a lease lost
//! mid-mutation, or a counter write-through that failed. The reconciliation
//! sweep drains these markers and rewrites the counter from the record.
//!
//! A bulk reservation whose compensating increment failed is marked too. The
//! sweep only re-syncs the counter for it; the resolved row stays behind as
//! the durable trace of a reservation that was never returned.

use crate::BoxFuture;
use crate::item::ItemId;
use crate::lock::LeaseToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a marker was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerReason {
    /// Durable write outcome unknown (timed out).
    CommitTimeout,
    /// Lease expired or changed hands during the mutation.
    LeaseLost,
    /// Durable write committed but the counter was not updated.
    CounterWriteFailed,
    /// A bulk reservation line could not be returned after a later line failed.
    RollbackFailed,
}

impl MarkerReason {
    /// Convert reason to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CommitTimeout => "commit_timeout",
            Self::LeaseLost => "lease_lost",
            Self::CounterWriteFailed => "counter_write_failed",
            Self::RollbackFailed => "rollback_failed",
        }
    }

    /// Parse reason from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known reason.
    pub fn parse(s: &str) -> Result<Self, ReconciliationError> {
        match s {
            "commit_timeout" => Ok(Self::CommitTimeout),
            "lease_lost" => Ok(Self::LeaseLost),
            "counter_write_failed" => Ok(Self::CounterWriteFailed),
            "rollback_failed" => Ok(Self::RollbackFailed),
            _ => Err(ReconciliationError::Storage(format!(
                "Invalid marker reason: {s}"
            ))),
        }
    }
}

/// A pending reconciliation request for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedMarker {
    /// Marker id.
    pub id: i64,
    /// Item whose counter is suspect.
    pub item_id: ItemId,
    /// Token of the lease that was held, if any.
    pub lease_token: Option<LeaseToken>,
    /// Why the marker was written.
    pub reason: MarkerReason,
    /// When the marker was written.
    pub created_at: DateTime<Utc>,
}

/// Errors from the marker log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationError {
    /// Storage failure.
    #[error("Reconciliation log error: {0}")]
    Storage(String),
}

/// Durable marker log.
pub trait ReconciliationLog: Send + Sync {
    /// Append a marker. Returns its id.
    ///
    /// # Errors
    ///
    /// [`ReconciliationError::Storage`] on storage failure.
    fn record(
        &self,
        item_id: ItemId,
        lease_token: Option<&LeaseToken>,
        reason: MarkerReason,
    ) -> BoxFuture<'_, Result<i64, ReconciliationError>>;

    /// Oldest unresolved markers, at most `limit`.
    ///
    /// # Errors
    ///
    /// [`ReconciliationError::Storage`] on storage failure.
    fn pending(&self, limit: u32)
    -> BoxFuture<'_, Result<Vec<UncommittedMarker>, ReconciliationError>>;

    /// Mark a marker resolved. Resolving twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`ReconciliationError::Storage`] on storage failure.
    fn resolve(&self, marker_id: i64) -> BoxFuture<'_, Result<(), ReconciliationError>>;

    /// Number of unresolved markers.
    ///
    /// # Errors
    ///
    /// [`ReconciliationError::Storage`] on storage failure.
    fn count_pending(&self) -> BoxFuture<'_, Result<u64, ReconciliationError>>;
}
