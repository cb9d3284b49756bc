//! Per-key, time-bounded mutual exclusion.
//!
//! A [`Lease`] is valid only until its deadline. Ownership is proved by the
//! [`LeaseToken`] generated for each acquisition attempt, so a caller whose
//! lease expired and was re-acquired by someone else cannot release or extend
//! the new holder's lease.

use crate::BoxFuture;
use crate::item::ItemId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Namespaced lock key.
///
/// Every stock mutation intent (checkout decrement, admin set, cancellation
/// rollback) uses the same key per item, so they exclude each other.
///
/// ```
/// use stockline_core::item::ItemId;
/// use stockline_core::lock::LockKey;
///
/// assert_eq!(LockKey::stock(ItemId::new(7)).as_str(), "lock:stock:7");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey(String);

impl LockKey {
    /// Prefix shared by all stock lock keys.
    pub const STOCK_PREFIX: &'static str = "lock:stock:";

    /// Lock key guarding one item's stock.
    #[must_use]
    pub fn stock(item_id: ItemId) -> Self {
        Self(format!("{}{item_id}", Self::STOCK_PREFIX))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque owner token, unique per acquisition attempt.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// A fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing token (e.g. one read back from storage).
    #[must_use]
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A granted lease, as seen by its holder.
///
/// The deadline is the holder's conservative local view: it is computed from
/// the moment the acquire request was sent, so it never outlives the lease the
/// lock store actually granted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    key: LockKey,
    token: LeaseToken,
    deadline: Instant,
}

impl Lease {
    /// Describe a lease granted at `granted_at` for `duration`.
    #[must_use]
    pub fn new(key: LockKey, token: LeaseToken, granted_at: Instant, duration: Duration) -> Self {
        Self {
            key,
            token,
            deadline: granted_at + duration,
        }
    }

    /// Locked key.
    #[must_use]
    pub const fn key(&self) -> &LockKey {
        &self.key
    }

    /// Owner token.
    #[must_use]
    pub const fn token(&self) -> &LeaseToken {
        &self.token
    }

    /// Local expiry estimate.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the lease may be taken by someone else.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the holder must assume the lease is gone.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Errors from the lock service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Someone else held a valid lease for the whole wait window.
    #[error("Lock {key} unavailable within wait timeout")]
    Unavailable {
        /// Contended key.
        key: LockKey,
    },

    /// Release attempted with a token that does not own the lease.
    #[error("Lease on {key} is not owned by this token")]
    NotOwner {
        /// Key whose lease belongs to someone else (or nobody).
        key: LockKey,
    },

    /// Extension attempted after the lease lapsed.
    #[error("Lease on {key} expired")]
    Expired {
        /// Key whose lease lapsed.
        key: LockKey,
    },

    /// The lock store could not be reached or answered unexpectedly.
    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// Transient failures worth retrying at the adapter boundary.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Distributed lock service.
///
/// # Dyn Compatibility
///
/// Methods return [`BoxFuture`] so the engine can hold `Arc<dyn DistributedLock>`.
/// Implementations that need the borrowed arguments inside the future clone them first.
pub trait DistributedLock: Send + Sync {
    /// Try to obtain the lease on `key` for `lease_for`, waiting at most `wait`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Unavailable`] if a valid lease is still held by another
    ///   owner when `wait` elapses. This is an expected outcome, not a fault.
    /// - [`LockError::Backend`] if the lock store is unreachable.
    fn acquire(
        &self,
        key: &LockKey,
        lease_for: Duration,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Lease, LockError>>;

    /// Give the lease back.
    ///
    /// # Errors
    ///
    /// - [`LockError::NotOwner`] if the lease expired and is gone or now held by another token.
    /// - [`LockError::Backend`] if the lock store is unreachable.
    fn release(&self, lease: &Lease) -> BoxFuture<'_, Result<(), LockError>>;

    /// Push the lease deadline out to `lease_for` from now, proving ownership.
    ///
    /// # Errors
    ///
    /// - [`LockError::Expired`] if this token no longer holds the lease.
    /// - [`LockError::Backend`] if the lock store is unreachable.
    fn extend(&self, lease: &Lease, lease_for: Duration) -> BoxFuture<'_, Result<Lease, LockError>>;
}
