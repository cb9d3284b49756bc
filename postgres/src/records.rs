//! `PostgreSQL` store for authoritative stock records.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stockline_core::BoxFuture;
use stockline_core::gateway::HeldLease;
use stockline_core::item::{GroupId, ItemId};
use stockline_core::quantity::Quantity;
use stockline_core::record::{RecordError, StockRecordStore};
use stockline_core::stock::{StockItem, Version};

type StockRow = (i64, i64, i32, i32, i64, DateTime<Utc>, DateTime<Utc>);

const COLUMNS: &str = "item_id, group_id, available, reserved, version, created_at, updated_at";

/// Stock records in the `stock_items` table.
///
/// Writes are compare-and-set on `version`: the `UPDATE` only matches the row
/// the caller read, so a write that lost a race changes nothing and reports
/// [`RecordError::Conflict`].
///
/// # Example
///
/// ```no_run
/// use stockline_postgres::PostgresStockRecordStore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// stockline_postgres::migrate(&pool).await?;
/// let records = PostgresStockRecordStore::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresStockRecordStore {
    pool: PgPool,
}

impl PostgresStockRecordStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(e: sqlx::Error) -> RecordError {
    RecordError::Database(e.to_string())
}

fn row_to_item(row: StockRow) -> Result<StockItem, RecordError> {
    let (item_id, group_id, available, reserved, version, created_at, updated_at) = row;
    let quantity = |column: &str, raw: i32| {
        u32::try_from(raw)
            .map(Quantity::new)
            .map_err(|_| RecordError::Database(format!("Negative {column} for item {item_id}: {raw}")))
    };
    let version = u64::try_from(version)
        .map(Version::new)
        .map_err(|_| RecordError::Database(format!("Negative version for item {item_id}")))?;

    Ok(StockItem {
        item_id: ItemId::new(item_id),
        group_id: GroupId::new(group_id),
        available: quantity("available", available)?,
        reserved: quantity("reserved", reserved)?,
        version,
        created_at,
        updated_at,
    })
}

fn to_column(item_id: ItemId, qty: Quantity) -> Result<i32, RecordError> {
    i32::try_from(qty.value())
        .map_err(|_| RecordError::Database(format!("Quantity out of range for item {item_id}: {qty}")))
}

fn version_column(version: Version) -> Result<i64, RecordError> {
    i64::try_from(version.value())
        .map_err(|_| RecordError::Database(format!("Version out of range: {version}")))
}

impl StockRecordStore for PostgresStockRecordStore {
    fn load(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<StockItem>, RecordError>> {
        Box::pin(async move {
            let row: Option<StockRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM stock_items WHERE item_id = $1"
            ))
            .bind(item_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.map(row_to_item).transpose()
        })
    }

    fn load_group(&self, group_id: GroupId) -> BoxFuture<'_, Result<Vec<StockItem>, RecordError>> {
        Box::pin(async move {
            let rows: Vec<StockRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM stock_items WHERE group_id = $1 ORDER BY item_id"
            ))
            .bind(group_id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.into_iter().map(row_to_item).collect()
        })
    }

    fn list_page(
        &self,
        after: Option<ItemId>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<StockItem>, RecordError>> {
        Box::pin(async move {
            let rows: Vec<StockRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM stock_items WHERE item_id > $1 ORDER BY item_id LIMIT $2"
            ))
            .bind(after.map_or(i64::MIN, ItemId::value))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.into_iter().map(row_to_item).collect()
        })
    }

    fn create(&self, item: &StockItem) -> BoxFuture<'_, Result<StockItem, RecordError>> {
        let item = item.clone();
        Box::pin(async move {
            let row: Option<StockRow> = sqlx::query_as(&format!(
                r"
                INSERT INTO stock_items ({COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (item_id) DO NOTHING
                RETURNING {COLUMNS}
                "
            ))
            .bind(item.item_id.value())
            .bind(item.group_id.value())
            .bind(to_column(item.item_id, item.available)?)
            .bind(to_column(item.item_id, item.reserved)?)
            .bind(version_column(item.version)?)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            let Some(row) = row else {
                return Err(RecordError::AlreadyExists {
                    item_id: item.item_id,
                });
            };
            tracing::debug!(item_id = %item.item_id, "Stock record inserted");
            row_to_item(row)
        })
    }

    fn write(
        &self,
        lease: &HeldLease,
        next: &StockItem,
        expected: Version,
    ) -> BoxFuture<'_, Result<StockItem, RecordError>> {
        let next = next.clone();
        let token = lease.token().clone();
        Box::pin(async move {
            if next.version != expected.next() {
                return Err(RecordError::Database(format!(
                    "version must advance from {expected} to {}",
                    expected.next()
                )));
            }

            let row: Option<StockRow> = sqlx::query_as(&format!(
                r"
                UPDATE stock_items
                SET available = $3, reserved = $4, version = $5, updated_at = $6
                WHERE item_id = $1 AND version = $2
                RETURNING {COLUMNS}
                "
            ))
            .bind(next.item_id.value())
            .bind(version_column(expected)?)
            .bind(to_column(next.item_id, next.available)?)
            .bind(to_column(next.item_id, next.reserved)?)
            .bind(version_column(next.version)?)
            .bind(next.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            if let Some(row) = row {
                tracing::debug!(
                    item_id = %next.item_id,
                    version = %next.version,
                    lease_token = %token,
                    "Stock record written"
                );
                return row_to_item(row);
            }

            let actual: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM stock_items WHERE item_id = $1")
                    .bind(next.item_id.value())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?;

            match actual {
                None => Err(RecordError::NotFound {
                    item_id: next.item_id,
                }),
                Some((version,)) => Err(RecordError::Conflict {
                    item_id: next.item_id,
                    expected,
                    actual: u64::try_from(version).ok().map(Version::new),
                }),
            }
        })
    }
}
