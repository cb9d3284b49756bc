//! In-memory fast counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use stockline_core::BoxFuture;
use stockline_core::counter::{CounterError, CounterKey, StockCounter};

/// `HashMap`-backed [`StockCounter`] with fault injection. Clones share state.
///
/// TTLs are not modelled; use [`InMemoryStockCounter::remove`] to simulate expiry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockCounter {
    values: Arc<Mutex<HashMap<String, i64>>>,
    unavailable: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    repairs: Arc<AtomicU64>,
}

impl InMemoryStockCounter {
    /// Create an empty counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a key, bypassing fault injection.
    #[must_use]
    pub fn peek(&self, key: &CounterKey) -> Option<i64> {
        self.values.lock().ok()?.get(key.as_str()).copied()
    }

    /// Set a value directly, e.g. to simulate drift.
    pub fn put(&self, key: &CounterKey, value: i64) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.as_str().to_string(), value);
        }
    }

    /// Drop a key directly, e.g. to simulate eviction or expiry.
    pub fn remove(&self, key: &CounterKey) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key.as_str());
        }
    }

    /// Make every call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make mutating calls fail with a backend error while reads still work.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// How many `set_if_absent` calls actually wrote.
    #[must_use]
    pub fn repair_count(&self) -> u64 {
        self.repairs.load(Ordering::SeqCst)
    }

    fn read_guard(&self) -> Result<MutexGuard<'_, HashMap<String, i64>>, CounterError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CounterError::Backend("counter store unavailable".into()));
        }
        self.values
            .lock()
            .map_err(|_| CounterError::Backend("Mutex lock failed".into()))
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, HashMap<String, i64>>, CounterError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CounterError::Backend("counter writes failing".into()));
        }
        self.read_guard()
    }
}

impl StockCounter for InMemoryStockCounter {
    fn get_value(&self, key: &CounterKey) -> BoxFuture<'_, Result<Option<i64>, CounterError>> {
        let key = key.clone();
        Box::pin(async move { Ok(self.read_guard()?.get(key.as_str()).copied()) })
    }

    fn get_values(
        &self,
        keys: &[CounterKey],
    ) -> BoxFuture<'_, Result<Vec<Option<i64>>, CounterError>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            let values = self.read_guard()?;
            Ok(keys.iter().map(|k| values.get(k.as_str()).copied()).collect())
        })
    }

    fn decrement_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut values = self.write_guard()?;
            let current = values
                .get_mut(key.as_str())
                .ok_or_else(|| CounterError::Missing { key: key.clone() })?;
            if *current < n {
                return Err(CounterError::InsufficientValue {
                    current: *current,
                    requested: n,
                    key,
                });
            }
            *current -= n;
            Ok(*current)
        })
    }

    fn increment_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut values = self.write_guard()?;
            let current = values
                .get_mut(key.as_str())
                .ok_or_else(|| CounterError::Missing { key: key.clone() })?;
            *current += n;
            Ok(*current)
        })
    }

    fn set_value(&self, key: &CounterKey, value: i64) -> BoxFuture<'_, Result<(), CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            self.write_guard()?.insert(key.as_str().to_string(), value);
            Ok(())
        })
    }

    fn set_if_absent(
        &self,
        key: &CounterKey,
        value: i64,
    ) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut values = self.write_guard()?;
            if values.contains_key(key.as_str()) {
                return Ok(false);
            }
            values.insert(key.as_str().to_string(), value);
            self.repairs.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn delete(&self, key: &CounterKey) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = key.clone();
        Box::pin(async move { Ok(self.write_guard()?.remove(key.as_str()).is_some()) })
    }

    fn evict_by_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<u64, CounterError>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let mut values = self.write_guard()?;
            let before = values.len();
            values.retain(|key, _| !key.starts_with(&prefix));
            Ok((before - values.len()) as u64)
        })
    }
}
