//! The durable stock record and its pure state transitions.
//!
//! Transitions never mutate in place: each returns the candidate next record
//! (with a bumped [`Version`]) or the invariant it would break. Persisting the
//! candidate is the caller's job, under the item lock.

use crate::error::StockError;
use crate::item::{GroupId, ItemId};
use crate::quantity::Quantity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version number of a stock record, for optimistic conflict detection.
///
/// Versions start at 0 for a freshly created record and increase by one per
/// committed mutation.
///
/// # Examples
///
/// ```
/// use stockline_core::stock::Version;
///
/// let v0 = Version::INITIAL;
/// assert_eq!(v0.next(), Version::new(1));
/// assert!(v0.is_initial());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a record that has never been mutated.
    pub const INITIAL: Self = Self(0);

    /// Create a version from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Authoritative stock state of one item.
///
/// `available` is what can still be sold. `reserved` is informational: it
/// grows on decrement and shrinks (never below zero) on increment; an admin
/// override leaves it alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    /// Item key.
    pub item_id: ItemId,
    /// Owning product group.
    pub group_id: GroupId,
    /// Units that can still be sold.
    pub available: Quantity,
    /// Units held by decrements not yet released.
    pub reserved: Quantity,
    /// Optimistic concurrency version.
    pub version: Version,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl StockItem {
    /// A freshly created record at [`Version::INITIAL`].
    #[must_use]
    pub const fn new(
        item_id: ItemId,
        group_id: GroupId,
        available: Quantity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id,
            group_id,
            available,
            reserved: Quantity::ZERO,
            version: Version::INITIAL,
            created_at: now,
            updated_at: now,
        }
    }

    /// Take `qty` units out of `available`.
    ///
    /// # Errors
    ///
    /// [`StockError::InsufficientStock`] if fewer than `qty` units are available.
    /// The quantity is rejected, never clamped.
    pub fn deduct(&self, qty: Quantity, now: DateTime<Utc>) -> Result<Self, StockError> {
        let available =
            self.available
                .checked_sub(qty)
                .ok_or(StockError::InsufficientStock {
                    item_id: self.item_id,
                    requested: qty,
                    available: self.available,
                })?;
        Ok(self.advance(available, self.reserved.saturating_add(qty), now))
    }

    /// Put `qty` units back into `available`.
    ///
    /// # Errors
    ///
    /// [`StockError::StockOverflow`] if the result would exceed [`Quantity::MAX`].
    pub fn restore(&self, qty: Quantity, now: DateTime<Utc>) -> Result<Self, StockError> {
        let available = self
            .available
            .checked_add(qty)
            .ok_or(StockError::StockOverflow {
                item_id: self.item_id,
                current: self.available,
                added: qty,
            })?;
        Ok(self.advance(available, self.reserved.saturating_sub(qty), now))
    }

    /// Overwrite `available` with an absolute target.
    #[must_use]
    pub const fn with_quantity(&self, target: Quantity, now: DateTime<Utc>) -> Self {
        self.advance(target, self.reserved, now)
    }

    /// Whether `qty` units could be deducted right now.
    #[must_use]
    pub const fn is_available(&self, qty: Quantity) -> bool {
        self.available.covers(qty)
    }

    /// Whether nothing is left to sell.
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.available.is_zero()
    }

    const fn advance(&self, available: Quantity, reserved: Quantity, now: DateTime<Utc>) -> Self {
        Self {
            item_id: self.item_id,
            group_id: self.group_id,
            available,
            reserved,
            version: self.version.next(),
            created_at: self.created_at,
            updated_at: now,
        }
    }
}

/// Where a stock read was answered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockSource {
    /// Fast counter hit.
    Counter,
    /// Durable record (counter miss or counter unavailable).
    Record,
}

/// Result of an advisory stock read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    /// Item read.
    pub item_id: ItemId,
    /// Units available as of the read.
    pub available: Quantity,
    /// Which store answered.
    pub source: StockSource,
}
