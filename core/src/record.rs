//! Durable stock record store: the source of truth.
//!
//! The only mutating method, [`StockRecordStore::write`], takes a
//! [`HeldLease`], which only [`crate::gateway::StockGateway`] can produce.
//! Creation is exempt: a new record has no concurrent writers yet.

use crate::BoxFuture;
use crate::gateway::HeldLease;
use crate::item::{GroupId, ItemId};
use crate::stock::{StockItem, Version};
use thiserror::Error;

/// Errors from the durable record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// No record for the item.
    #[error("Stock record not found: {item_id}")]
    NotFound {
        /// Missing item.
        item_id: ItemId,
    },

    /// The stored version moved since the record was read.
    #[error("Version conflict on item {item_id}: expected {expected}, found {actual:?}")]
    Conflict {
        /// Item being written.
        item_id: ItemId,
        /// Version the write was based on.
        expected: Version,
        /// Version found in storage, when known.
        actual: Option<Version>,
    },

    /// Creation of a record that already exists.
    #[error("Stock record already exists: {item_id}")]
    AlreadyExists {
        /// Existing item.
        item_id: ItemId,
    },

    /// Write attempted for an item other than the one the lease covers.
    #[error("Lease covers item {leased}, write targeted item {written}")]
    WrongLease {
        /// Item the lease was granted for.
        leased: ItemId,
        /// Item the write targeted.
        written: ItemId,
    },

    /// Database connection or query failure.
    #[error("Database error: {0}")]
    Database(String),
}

/// Durable stock records.
///
/// # Dyn Compatibility
///
/// Methods return [`BoxFuture`] so the gateway can hold `Arc<dyn StockRecordStore>`.
pub trait StockRecordStore: Send + Sync {
    /// Read one record.
    ///
    /// # Errors
    ///
    /// [`RecordError::Database`] on storage failure. A missing record is `Ok(None)`.
    fn load(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<StockItem>, RecordError>>;

    /// Read every record of a product group, ordered by item id.
    ///
    /// # Errors
    ///
    /// [`RecordError::Database`] on storage failure.
    fn load_group(&self, group_id: GroupId) -> BoxFuture<'_, Result<Vec<StockItem>, RecordError>>;

    /// Keyset page of records ordered by item id, starting after `after`.
    ///
    /// # Errors
    ///
    /// [`RecordError::Database`] on storage failure.
    fn list_page(
        &self,
        after: Option<ItemId>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<StockItem>, RecordError>>;

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// - [`RecordError::AlreadyExists`] if the item already has a record.
    /// - [`RecordError::Database`] on storage failure.
    fn create(&self, item: &StockItem) -> BoxFuture<'_, Result<StockItem, RecordError>>;

    /// Replace the record with `next` if its stored version still equals `expected`.
    ///
    /// `next.version` must be `expected.next()`. Returns the stored record.
    ///
    /// # Errors
    ///
    /// - [`RecordError::Conflict`] if the stored version differs from `expected`.
    /// - [`RecordError::NotFound`] if the record vanished.
    /// - [`RecordError::Database`] on storage failure.
    fn write(
        &self,
        lease: &HeldLease,
        next: &StockItem,
        expected: Version,
    ) -> BoxFuture<'_, Result<StockItem, RecordError>>;
}
