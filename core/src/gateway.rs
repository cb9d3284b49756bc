//! Lease-gated access to the durable stock records.
//!
//! [`HeldLease`] has no public constructor. The only way to obtain one is
//! [`StockGateway::acquire`], and [`StockRecordStore::write`] demands one, so
//! every durable stock write in the process happens under the item lock.

use crate::item::{GroupId, ItemId};
use crate::lock::{DistributedLock, Lease, LeaseToken, LockError, LockKey};
use crate::record::{RecordError, StockRecordStore};
use crate::stock::{StockItem, Version};
use std::sync::Arc;
use std::time::Duration;

/// Proof that the caller holds the lock on one item.
#[derive(Debug)]
pub struct HeldLease {
    item_id: ItemId,
    lease: Lease,
}

impl HeldLease {
    pub(crate) const fn new(item_id: ItemId, lease: Lease) -> Self {
        Self { item_id, lease }
    }

    /// Item the lease covers.
    #[must_use]
    pub const fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// Owner token.
    #[must_use]
    pub const fn token(&self) -> &LeaseToken {
        self.lease.token()
    }

    /// Underlying lease.
    #[must_use]
    pub const fn lease(&self) -> &Lease {
        &self.lease
    }
}

/// The single owner of the durable store and the lock service inside the engine.
#[derive(Clone)]
pub struct StockGateway {
    records: Arc<dyn StockRecordStore>,
    locks: Arc<dyn DistributedLock>,
}

impl StockGateway {
    /// Wrap a record store and a lock service.
    #[must_use]
    pub fn new(records: Arc<dyn StockRecordStore>, locks: Arc<dyn DistributedLock>) -> Self {
        Self { records, locks }
    }

    /// Take the item lock.
    ///
    /// # Errors
    ///
    /// Propagates [`LockError::Unavailable`] and [`LockError::Backend`].
    pub async fn acquire(
        &self,
        item_id: ItemId,
        lease_for: Duration,
        wait: Duration,
    ) -> Result<HeldLease, LockError> {
        let lease = self
            .locks
            .acquire(&LockKey::stock(item_id), lease_for, wait)
            .await?;
        Ok(HeldLease::new(item_id, lease))
    }

    /// Prove ownership and push the deadline out.
    ///
    /// # Errors
    ///
    /// [`LockError::Expired`] if the lease lapsed; `held` is left unchanged.
    pub async fn extend(&self, held: &mut HeldLease, lease_for: Duration) -> Result<(), LockError> {
        held.lease = self.locks.extend(&held.lease, lease_for).await?;
        Ok(())
    }

    /// Give the lock back.
    ///
    /// # Errors
    ///
    /// [`LockError::NotOwner`] if the lease lapsed and is gone or held by someone else.
    pub async fn release(&self, held: HeldLease) -> Result<(), LockError> {
        self.locks.release(&held.lease).await
    }

    /// Read one record.
    ///
    /// # Errors
    ///
    /// [`RecordError::Database`] on storage failure.
    pub async fn load(&self, item_id: ItemId) -> Result<Option<StockItem>, RecordError> {
        self.records.load(item_id).await
    }

    /// Read a product group.
    ///
    /// # Errors
    ///
    /// [`RecordError::Database`] on storage failure.
    pub async fn load_group(&self, group_id: GroupId) -> Result<Vec<StockItem>, RecordError> {
        self.records.load_group(group_id).await
    }

    /// Keyset page of records.
    ///
    /// # Errors
    ///
    /// [`RecordError::Database`] on storage failure.
    pub async fn list_page(
        &self,
        after: Option<ItemId>,
        limit: u32,
    ) -> Result<Vec<StockItem>, RecordError> {
        self.records.list_page(after, limit).await
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// [`RecordError::AlreadyExists`] or [`RecordError::Database`].
    pub async fn create(&self, item: &StockItem) -> Result<StockItem, RecordError> {
        self.records.create(item).await
    }

    /// Conditional durable write under the item lock.
    ///
    /// # Errors
    ///
    /// - [`RecordError::WrongLease`] if `held` covers a different item.
    /// - Whatever the store returns ([`RecordError::Conflict`], [`RecordError::NotFound`], ...).
    pub async fn write(
        &self,
        held: &HeldLease,
        next: &StockItem,
        expected: Version,
    ) -> Result<StockItem, RecordError> {
        if held.item_id != next.item_id {
            return Err(RecordError::WrongLease {
                leased: held.item_id,
                written: next.item_id,
            });
        }
        self.records.write(held, next, expected).await
    }
}

impl std::fmt::Debug for StockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockGateway").finish_non_exhaustive()
    }
}
