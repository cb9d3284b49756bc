//! Durable log of writes that need reconciliation.
//!
//! Rows are appended when a durable write timed out with an unknown outcome,
//! when a lease lapsed before release, or when the counter write-through
//! failed. The reconciliation sweep drains them oldest first and marks them
//! resolved; resolved rows are kept for incident review.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stockline_core::BoxFuture;
use stockline_core::item::ItemId;
use stockline_core::lock::LeaseToken;
use stockline_core::reconciliation::{
    MarkerReason, ReconciliationError, ReconciliationLog, UncommittedMarker,
};

type MarkerRow = (i64, i64, Option<String>, String, DateTime<Utc>);

/// `PostgreSQL`-backed [`ReconciliationLog`] over `stock_reconciliation_markers`.
///
/// # Example
///
/// ```no_run
/// use stockline_postgres::PostgresReconciliationLog;
/// use stockline_core::reconciliation::ReconciliationLog;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let log = PostgresReconciliationLog::new(pool);
///
/// let pending = log.pending(100).await?;
/// println!("Pending markers: {}", pending.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresReconciliationLog {
    pool: PgPool,
}

impl PostgresReconciliationLog {
    /// Create a new log with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert a database row to an `UncommittedMarker`.
    fn row_to_marker(row: MarkerRow) -> Result<UncommittedMarker, ReconciliationError> {
        let (id, item_id, lease_token, reason, created_at) = row;
        Ok(UncommittedMarker {
            id,
            item_id: ItemId::new(item_id),
            lease_token: lease_token.map(LeaseToken::from_string),
            reason: MarkerReason::parse(&reason)?,
            created_at,
        })
    }
}

fn storage_error(e: sqlx::Error) -> ReconciliationError {
    ReconciliationError::Storage(e.to_string())
}

impl ReconciliationLog for PostgresReconciliationLog {
    fn record(
        &self,
        item_id: ItemId,
        lease_token: Option<&LeaseToken>,
        reason: MarkerReason,
    ) -> BoxFuture<'_, Result<i64, ReconciliationError>> {
        let lease_token = lease_token.map(|t| t.as_str().to_string());
        Box::pin(async move {
            let id: (i64,) = sqlx::query_as(
                r"
                INSERT INTO stock_reconciliation_markers (item_id, lease_token, reason)
                VALUES ($1, $2, $3)
                RETURNING id
                ",
            )
            .bind(item_id.value())
            .bind(lease_token.as_deref())
            .bind(reason.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

            tracing::warn!(
                marker_id = id.0,
                %item_id,
                reason = reason.as_str(),
                "Reconciliation marker recorded"
            );
            Ok(id.0)
        })
    }

    fn pending(
        &self,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<UncommittedMarker>, ReconciliationError>> {
        Box::pin(async move {
            let rows: Vec<MarkerRow> = sqlx::query_as(
                r"
                SELECT id, item_id, lease_token, reason, created_at
                FROM stock_reconciliation_markers
                WHERE resolved_at IS NULL
                ORDER BY id ASC
                LIMIT $1
                ",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

            rows.into_iter().map(Self::row_to_marker).collect()
        })
    }

    fn resolve(&self, marker_id: i64) -> BoxFuture<'_, Result<(), ReconciliationError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE stock_reconciliation_markers
                SET resolved_at = NOW()
                WHERE id = $1 AND resolved_at IS NULL
                ",
            )
            .bind(marker_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

            if result.rows_affected() > 0 {
                tracing::info!(marker_id, "Reconciliation marker resolved");
                metrics::counter!("stock_reconciliation_markers_resolved_total").increment(1);
            }
            Ok(())
        })
    }

    fn count_pending(&self) -> BoxFuture<'_, Result<u64, ReconciliationError>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*)
                FROM stock_reconciliation_markers
                WHERE resolved_at IS NULL
                ",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

            Ok(u64::try_from(count).unwrap_or(0))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn maps_rows_to_markers() {
        let marker = PostgresReconciliationLog::row_to_marker((
            3,
            9,
            Some("lease-1".to_string()),
            "commit_timeout".to_string(),
            DateTime::<Utc>::UNIX_EPOCH,
        ))
        .unwrap();

        assert_eq!(marker.item_id, ItemId::new(9));
        assert_eq!(marker.reason, MarkerReason::CommitTimeout);
        assert_eq!(marker.lease_token, Some(LeaseToken::from_string("lease-1")));
    }

    #[test]
    fn unknown_reasons_are_storage_errors() {
        let result = PostgresReconciliationLog::row_to_marker((
            1,
            1,
            None,
            "gremlins".to_string(),
            DateTime::<Utc>::UNIX_EPOCH,
        ));
        assert!(result.is_err());
    }
}
