//! Identifiers for sellable items and their parent product groups.
//!
//! Both are positive database keys. `FromStr` validates (use it for path
//! segments and other external input); `new()` and `From<i64>` do not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {input}")]
pub struct ParseIdError {
    kind: &'static str,
    input: String,
}

macro_rules! positive_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw key without validation.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Get the raw key.
            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().parse::<i64>() {
                    Ok(value) if value > 0 => Ok(Self(value)),
                    _ => Err(ParseIdError {
                        kind: $kind,
                        input: s.to_string(),
                    }),
                }
            }
        }
    };
}

positive_id!(
    /// Identifies one sellable unit (a product variant).
    ///
    /// The same id keys the durable record, the counter entry, and the lock.
    ///
    /// ```
    /// use stockline_core::item::ItemId;
    ///
    /// let id: ItemId = "42".parse().unwrap();
    /// assert_eq!(id, ItemId::new(42));
    /// assert!("-1".parse::<ItemId>().is_err());
    /// ```
    ItemId,
    "item id"
);

positive_id!(
    /// Identifies the product group an item belongs to.
    GroupId,
    "group id"
);
