//! In-memory durable record store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use stockline_core::BoxFuture;
use stockline_core::gateway::HeldLease;
use stockline_core::item::{GroupId, ItemId};
use stockline_core::record::{RecordError, StockRecordStore};
use stockline_core::stock::{StockItem, Version};

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    write_delay_ms: AtomicU64,
    injected_conflicts: AtomicU64,
    writes: AtomicU64,
}

/// `BTreeMap`-backed [`StockRecordStore`] with fault injection.
///
/// Enforces the same version check as the `PostgreSQL` store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockRecordStore {
    records: Arc<Mutex<BTreeMap<ItemId, StockItem>>>,
    faults: Arc<Faults>,
}

impl InMemoryStockRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record directly, bypassing the lock.
    pub fn seed(&self, item: StockItem) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(item.item_id, item);
        }
    }

    /// Current record, if any.
    #[must_use]
    pub fn get(&self, item_id: ItemId) -> Option<StockItem> {
        self.records.lock().ok()?.get(&item_id).cloned()
    }

    /// Make every call fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every `write` by `delay` before applying it.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_write_delay(&self, delay: Duration) {
        self.faults
            .write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail as if another writer got there first.
    pub fn inject_conflicts(&self, n: u64) {
        self.faults.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of writes that were applied.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.faults.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), RecordError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(RecordError::Database("record store unavailable".into()));
        }
        Ok(())
    }

    fn guard(&self) -> Result<MutexGuard<'_, BTreeMap<ItemId, StockItem>>, RecordError> {
        self.records
            .lock()
            .map_err(|_| RecordError::Database("Mutex lock failed".into()))
    }

    fn take_injected_conflict(&self) -> bool {
        self.faults
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StockRecordStore for InMemoryStockRecordStore {
    fn load(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<StockItem>, RecordError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.guard()?.get(&item_id).cloned())
        })
    }

    fn load_group(&self, group_id: GroupId) -> BoxFuture<'_, Result<Vec<StockItem>, RecordError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .guard()?
                .values()
                .filter(|item| item.group_id == group_id)
                .cloned()
                .collect())
        })
    }

    fn list_page(
        &self,
        after: Option<ItemId>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<StockItem>, RecordError>> {
        Box::pin(async move {
            self.check_available()?;
            let records = self.guard()?;
            let page = match after {
                Some(after) => records
                    .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                    .map(|(_, item)| item.clone())
                    .take(limit as usize)
                    .collect(),
                None => records.values().take(limit as usize).cloned().collect(),
            };
            Ok(page)
        })
    }

    fn create(&self, item: &StockItem) -> BoxFuture<'_, Result<StockItem, RecordError>> {
        let item = item.clone();
        Box::pin(async move {
            self.check_available()?;
            let mut records = self.guard()?;
            if records.contains_key(&item.item_id) {
                return Err(RecordError::AlreadyExists {
                    item_id: item.item_id,
                });
            }
            records.insert(item.item_id, item.clone());
            Ok(item)
        })
    }

    fn write(
        &self,
        _lease: &HeldLease,
        next: &StockItem,
        expected: Version,
    ) -> BoxFuture<'_, Result<StockItem, RecordError>> {
        let next = next.clone();
        Box::pin(async move {
            self.check_available()?;
            let delay = self.faults.write_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.take_injected_conflict() {
                return Err(RecordError::Conflict {
                    item_id: next.item_id,
                    expected,
                    actual: None,
                });
            }

            let mut records = self.guard()?;
            let current = records
                .get(&next.item_id)
                .ok_or(RecordError::NotFound {
                    item_id: next.item_id,
                })?;
            if current.version != expected {
                return Err(RecordError::Conflict {
                    item_id: next.item_id,
                    expected,
                    actual: Some(current.version),
                });
            }
            if next.version != expected.next() {
                return Err(RecordError::Database(format!(
                    "version must advance from {expected} to {}",
                    expected.next()
                )));
            }
            records.insert(next.item_id, next.clone());
            self.faults.writes.fetch_add(1, Ordering::SeqCst);
            Ok(next)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::fixtures::stock_item;

    #[tokio::test]
    async fn pages_by_item_id() {
        let store = InMemoryStockRecordStore::new();
        for id in 1..=5 {
            store.seed(stock_item(id, 1, 10));
        }

        let first = store.list_page(None, 2).await.unwrap();
        let ids: Vec<_> = first.iter().map(|i| i.item_id.value()).collect();
        assert_eq!(ids, vec![1, 2]);

        let rest = store.list_page(Some(ItemId::new(2)), 10).await.unwrap();
        let ids: Vec<_> = rest.iter().map(|i| i.item_id.value()).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = InMemoryStockRecordStore::new();
        store.create(&stock_item(1, 1, 3)).await.unwrap();
        let err = store.create(&stock_item(1, 1, 3)).await.unwrap_err();
        assert_eq!(
            err,
            RecordError::AlreadyExists {
                item_id: ItemId::new(1)
            }
        );
    }

    #[tokio::test]
    async fn load_group_filters() {
        let store = InMemoryStockRecordStore::new();
        store.seed(stock_item(1, 10, 1));
        store.seed(stock_item(2, 20, 1));
        store.seed(stock_item(3, 10, 1));
        let group = store.load_group(GroupId::new(10)).await.unwrap();
        assert_eq!(group.len(), 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_reads() {
        let store = InMemoryStockRecordStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.load(ItemId::new(1)).await,
            Err(RecordError::Database(_))
        ));
    }
}
