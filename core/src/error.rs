//! Error taxonomy for stock mutations and reads.

use crate::item::ItemId;
use crate::quantity::Quantity;
use crate::stock::Version;
use thiserror::Error;

/// How a caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The item lock was busy for the whole wait window. Expected under load.
    Contention,
    /// The request itself can never succeed against the current state.
    InvariantViolation,
    /// Optimistic version check kept failing.
    Conflict,
    /// Unknown item.
    NotFound,
    /// A backing store misbehaved.
    Infrastructure,
}

/// Errors returned by the inventory engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Lock not obtained within the wait timeout.
    #[error("Item {item_id} is locked, retry later")]
    Locked {
        /// Contended item.
        item_id: ItemId,
    },

    /// Decrement larger than what is available.
    #[error("Insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Item being decremented.
        item_id: ItemId,
        /// Units asked for.
        requested: Quantity,
        /// Units on hand.
        available: Quantity,
    },

    /// Negative target, non-positive delta, or out-of-range value.
    #[error("Invalid quantity: {value}")]
    InvalidQuantity {
        /// The rejected input.
        value: i64,
    },

    /// Increment would exceed the largest storable quantity.
    #[error("Stock overflow for item {item_id}: {current} + {added}")]
    StockOverflow {
        /// Item being incremented.
        item_id: ItemId,
        /// Units on hand.
        current: Quantity,
        /// Units being added.
        added: Quantity,
    },

    /// No durable record for the item (or it belongs to another group).
    #[error("Item not found: {item_id}")]
    NotFound {
        /// Missing item.
        item_id: ItemId,
    },

    /// Creation of an item that already has a record.
    #[error("Item already exists: {item_id}")]
    AlreadyExists {
        /// Existing item.
        item_id: ItemId,
    },

    /// Version check failed on every attempt.
    #[error("Concurrent modification of item {item_id} (expected version {expected})")]
    Conflict {
        /// Item being written.
        item_id: ItemId,
        /// Version the last attempt was based on.
        expected: Version,
    },

    /// Lease expired or was taken over before the durable write.
    #[error("Lease on item {item_id} was lost before commit")]
    LeaseLost {
        /// Item whose lease was lost.
        item_id: ItemId,
    },

    /// Durable write did not finish in time; outcome unknown until reconciled.
    #[error("Durable write for item {item_id} timed out")]
    CommitTimeout {
        /// Item being written.
        item_id: ItemId,
    },

    /// Lock service unreachable or failing.
    #[error("Lock service error: {0}")]
    LockService(String),

    /// Durable record store failing.
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Counter store failing (only surfaces where no fallback exists).
    #[error("Counter store error: {0}")]
    CounterStore(String),
}

impl StockError {
    /// Classify the error for callers and the HTTP boundary.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Locked { .. } => ErrorKind::Contention,
            Self::InsufficientStock { .. }
            | Self::InvalidQuantity { .. }
            | Self::StockOverflow { .. } => ErrorKind::InvariantViolation,
            Self::Conflict { .. } | Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LeaseLost { .. }
            | Self::CommitTimeout { .. }
            | Self::LockService(_)
            | Self::RecordStore(_)
            | Self::CounterStore(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether the same request may succeed if retried later unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::InvariantViolation | ErrorKind::NotFound
        )
    }
}
