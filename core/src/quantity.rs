//! Non-negative stock quantities.

use crate::error::StockError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative count of units.
///
/// Negative quantities are unrepresentable. Arithmetic is checked: going
/// below zero or beyond [`Quantity::MAX`] is an error, never a clamp or a wrap.
///
/// # Examples
///
/// ```
/// use stockline_core::quantity::Quantity;
///
/// let q = Quantity::new(10);
/// assert_eq!(q.checked_sub(Quantity::new(3)), Some(Quantity::new(7)));
/// assert_eq!(q.checked_sub(Quantity::new(11)), None);
/// assert!(Quantity::try_from_signed(-1).is_err());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    /// Zero units.
    pub const ZERO: Self = Self(0);

    /// Largest storable quantity (fits a signed 32-bit column).
    #[allow(clippy::cast_sign_loss)]
    pub const MAX: Self = Self(i32::MAX as u32);

    /// Create a quantity.
    ///
    /// Values above [`Quantity::MAX`] are capped to it.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        if value > Self::MAX.0 {
            Self::MAX
        } else {
            Self(value)
        }
    }

    /// Validate a signed value coming from outside (API input, counter store).
    ///
    /// # Errors
    ///
    /// Returns [`StockError::InvalidQuantity`] if the value is negative or
    /// larger than [`Quantity::MAX`].
    pub fn try_from_signed(value: i64) -> Result<Self, StockError> {
        u32::try_from(value)
            .ok()
            .filter(|v| *v <= Self::MAX.0)
            .map(Self)
            .ok_or(StockError::InvalidQuantity { value })
    }

    /// Validate a delta for decrement/increment: must be strictly positive.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::InvalidQuantity`] for zero, negative, or
    /// out-of-range values.
    pub fn positive(value: i64) -> Result<Self, StockError> {
        match Self::try_from_signed(value)? {
            Self::ZERO => Err(StockError::InvalidQuantity { value }),
            q => Ok(q),
        }
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// `true` when no units remain.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `true` when at least `wanted` units are present.
    #[must_use]
    pub const fn covers(self, wanted: Self) -> bool {
        self.0 >= wanted.0
    }

    /// Subtract, returning `None` if the result would be negative.
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Add, returning `None` if the result would exceed [`Quantity::MAX`].
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) if v <= Self::MAX.0 => Some(Self(v)),
            _ => None,
        }
    }

    /// Subtract, stopping at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Add, stopping at [`Quantity::MAX`].
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self::new(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Quantity> for i64 {
    fn from(q: Quantity) -> Self {
        Self::from(q.0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_negative_input() {
        assert_eq!(
            Quantity::try_from_signed(-5),
            Err(StockError::InvalidQuantity { value: -5 })
        );
    }

    #[test]
    fn rejects_values_beyond_max() {
        assert!(Quantity::try_from_signed(i64::from(i32::MAX) + 1).is_err());
        assert_eq!(
            Quantity::try_from_signed(i64::from(i32::MAX)).unwrap(),
            Quantity::MAX
        );
    }

    #[test]
    fn positive_rejects_zero() {
        assert!(Quantity::positive(0).is_err());
        assert_eq!(Quantity::positive(3).unwrap(), Quantity::new(3));
    }

    #[test]
    fn checked_add_stops_at_max() {
        let near = Quantity::new(Quantity::MAX.value() - 10);
        assert_eq!(near.checked_add(Quantity::new(11)), None);
        assert_eq!(near.checked_add(Quantity::new(10)), Some(Quantity::MAX));
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        assert_eq!(Quantity::new(2).saturating_sub(Quantity::new(5)), Quantity::ZERO);
    }

    proptest! {
        #[test]
        fn signed_round_trip_within_range(v in 0_i64..=i64::from(i32::MAX)) {
            let q = Quantity::try_from_signed(v).unwrap();
            prop_assert_eq!(i64::from(q), v);
        }

        #[test]
        fn sub_then_add_restores(a in 0_u32..1_000_000, b in 0_u32..1_000_000) {
            let (a, b) = (Quantity::new(a), Quantity::new(b));
            if let Some(diff) = a.checked_sub(b) {
                prop_assert_eq!(diff.checked_add(b), Some(a));
            } else {
                prop_assert!(a < b);
            }
        }
    }
}
