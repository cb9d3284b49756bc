//! `PostgreSQL` persistence for Stockline.
//!
//! This crate provides the durable side of the inventory subsystem:
//!
//! - [`PostgresStockRecordStore`]: authoritative stock records with
//!   version-checked writes
//! - [`PostgresReconciliationLog`]: markers for writes whose counter state is unknown
//! - [`migrate`]: embedded schema migrations
//!
//! # Example
//!
//! ```ignore
//! use stockline_postgres::{PostgresReconciliationLog, PostgresStockRecordStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::PgPool::connect("postgres://localhost/stockline").await?;
//!     stockline_postgres::migrate(&pool).await?;
//!     let records = PostgresStockRecordStore::new(pool.clone());
//!     let markers = PostgresReconciliationLog::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod reconciliation_log;
mod records;

pub use reconciliation_log::PostgresReconciliationLog;
pub use records::PostgresStockRecordStore;

/// Run the embedded schema migrations.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if a migration fails.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
