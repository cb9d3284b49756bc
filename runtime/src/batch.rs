//! Per-item results of non-atomic multi-item operations.

use serde::{Deserialize, Serialize};
use stockline_core::error::{ErrorKind, StockError};
use stockline_core::item::ItemId;
use stockline_core::quantity::Quantity;
use stockline_core::stock::StockItem;

/// Why one item of a batch was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// The item lock stayed busy for the whole wait window.
    Locked,
    /// Not enough stock.
    InsufficientStock,
    /// Negative or out-of-range target.
    InvalidQuantity,
    /// Unknown item, or an item of another group.
    NotFound,
    /// Version conflicts persisted.
    Conflict,
    /// A backing store failed.
    Unavailable,
}

impl RejectReason {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "LOCKED",
            Self::InsufficientStock => "INSUFFICIENT_STOCK",
            Self::InvalidQuantity => "INVALID_QUANTITY",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl From<&StockError> for RejectReason {
    fn from(err: &StockError) -> Self {
        match err {
            StockError::InsufficientStock { .. } => Self::InsufficientStock,
            StockError::InvalidQuantity { .. } | StockError::StockOverflow { .. } => {
                Self::InvalidQuantity
            },
            _ => match err.kind() {
                ErrorKind::Contention => Self::Locked,
                ErrorKind::NotFound => Self::NotFound,
                ErrorKind::Conflict | ErrorKind::InvariantViolation => Self::Conflict,
                ErrorKind::Infrastructure => Self::Unavailable,
            },
        }
    }
}

/// Outcome of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Applied; carries the committed available quantity.
    Committed(Quantity),
    /// Not applied.
    Rejected(RejectReason),
}

/// One line of a batch result, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemResult {
    /// Item the line refers to.
    pub item_id: ItemId,
    /// What happened to it.
    pub outcome: ItemOutcome,
}

impl BatchItemResult {
    pub(crate) fn from_result(item_id: ItemId, result: &Result<StockItem, StockError>) -> Self {
        let outcome = match result {
            Ok(item) => ItemOutcome::Committed(item.available),
            Err(err) => ItemOutcome::Rejected(RejectReason::from(err)),
        };
        Self { item_id, outcome }
    }

    /// Whether the line was applied.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Committed(_))
    }
}
