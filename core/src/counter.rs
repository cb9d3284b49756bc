//! Fast shared counter: a disposable cache of each item's available quantity.
//!
//! Nothing here is authoritative. A missing key means "unknown, ask the
//! durable record", and any value may lag the record until the next write-through
//! or reconciliation. Implementations hold no business logic.

use crate::BoxFuture;
use crate::item::ItemId;
use std::fmt;
use thiserror::Error;

/// Counter entry key.
///
/// ```
/// use stockline_core::counter::CounterKey;
/// use stockline_core::item::ItemId;
///
/// assert_eq!(CounterKey::stock(ItemId::new(7)).as_str(), "stock:counter:7");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CounterKey(String);

impl CounterKey {
    /// Prefix shared by all stock counter keys.
    pub const STOCK_PREFIX: &'static str = "stock:counter:";

    /// Counter key for one item.
    #[must_use]
    pub fn stock(item_id: ItemId) -> Self {
        Self(format!("{}{item_id}", Self::STOCK_PREFIX))
    }

    /// Wrap an arbitrary key (health probes, tests).
    #[must_use]
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from the counter store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// Key absent (never written, evicted, or expired).
    #[error("Counter {key} missing")]
    Missing {
        /// Absent key.
        key: CounterKey,
    },

    /// Decrement refused because it would go below zero. Nothing was applied.
    #[error("Counter {key} holds {current}, cannot decrement by {requested}")]
    InsufficientValue {
        /// Key that was not decremented.
        key: CounterKey,
        /// Value left untouched.
        current: i64,
        /// Requested decrement.
        requested: i64,
    },

    /// The counter store could not be reached or answered unexpectedly.
    #[error("Counter backend error: {0}")]
    Backend(String),
}

impl CounterError {
    /// Transient failures worth retrying at the adapter boundary.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Fast counter store.
///
/// Only single-key atomic primitives are used for mutation. `get_values` is a
/// batched read with no transactional meaning.
pub trait StockCounter: Send + Sync {
    /// Point read. `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// [`CounterError::Backend`] if the store is unreachable.
    fn get_value(&self, key: &CounterKey) -> BoxFuture<'_, Result<Option<i64>, CounterError>>;

    /// Read several keys in one round trip, in input order.
    ///
    /// # Errors
    ///
    /// [`CounterError::Backend`] if the store is unreachable.
    fn get_values(
        &self,
        keys: &[CounterKey],
    ) -> BoxFuture<'_, Result<Vec<Option<i64>>, CounterError>>;

    /// Atomically subtract `n`, refusing to go negative.
    ///
    /// # Errors
    ///
    /// - [`CounterError::InsufficientValue`] if the current value is below `n` (no change applied).
    /// - [`CounterError::Missing`] if the key is absent.
    /// - [`CounterError::Backend`] if the store is unreachable.
    fn decrement_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>>;

    /// Atomically add `n`. The key is not created if absent.
    ///
    /// # Errors
    ///
    /// - [`CounterError::Missing`] if the key is absent.
    /// - [`CounterError::Backend`] if the store is unreachable.
    fn increment_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>>;

    /// Overwrite the value and refresh its TTL.
    ///
    /// # Errors
    ///
    /// [`CounterError::Backend`] if the store is unreachable.
    fn set_value(&self, key: &CounterKey, value: i64) -> BoxFuture<'_, Result<(), CounterError>>;

    /// Write only if the key is absent. Returns whether the write happened.
    ///
    /// Used by read-path repair so a late repair never clobbers a fresher write-through.
    ///
    /// # Errors
    ///
    /// [`CounterError::Backend`] if the store is unreachable.
    fn set_if_absent(
        &self,
        key: &CounterKey,
        value: i64,
    ) -> BoxFuture<'_, Result<bool, CounterError>>;

    /// Drop one key. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// [`CounterError::Backend`] if the store is unreachable.
    fn delete(&self, key: &CounterKey) -> BoxFuture<'_, Result<bool, CounterError>>;

    /// Drop every key starting with `prefix` using incremental cursor scans.
    /// Returns how many keys were removed.
    ///
    /// # Errors
    ///
    /// [`CounterError::Backend`] if the store is unreachable.
    fn evict_by_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<u64, CounterError>>;
}
