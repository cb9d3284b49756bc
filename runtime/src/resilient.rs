//! Retry decorators for the counter and lock backends.
//!
//! Only idempotent calls are retried, and only on transient (backend) errors.
//! Counter deltas pass straight through: replaying a decrement whose reply was
//! lost would apply it twice. The reconciliation sweep covers that case instead.
//! Lock acquire also passes through; the lock retries inside its own wait
//! window with a single token.

use crate::retry::{RetryPolicy, retry_transient};
use std::time::Duration;
use stockline_core::BoxFuture;
use stockline_core::counter::{CounterError, CounterKey, StockCounter};
use stockline_core::lock::{DistributedLock, Lease, LockError, LockKey};

/// [`StockCounter`] that retries idempotent calls on backend errors.
#[derive(Debug, Clone)]
pub struct RetryingCounter<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: StockCounter> RetryingCounter<C> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub const fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped counter.
    #[must_use]
    pub const fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: StockCounter> StockCounter for RetryingCounter<C> {
    fn get_value(&self, key: &CounterKey) -> BoxFuture<'_, Result<Option<i64>, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.get_value(&key),
                CounterError::is_transient,
            )
            .await
        })
    }

    fn get_values(
        &self,
        keys: &[CounterKey],
    ) -> BoxFuture<'_, Result<Vec<Option<i64>>, CounterError>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.get_values(&keys),
                CounterError::is_transient,
            )
            .await
        })
    }

    fn decrement_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>> {
        self.inner.decrement_by(key, n)
    }

    fn increment_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>> {
        self.inner.increment_by(key, n)
    }

    fn set_value(&self, key: &CounterKey, value: i64) -> BoxFuture<'_, Result<(), CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.set_value(&key, value),
                CounterError::is_transient,
            )
            .await
        })
    }

    fn set_if_absent(
        &self,
        key: &CounterKey,
        value: i64,
    ) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.set_if_absent(&key, value),
                CounterError::is_transient,
            )
            .await
        })
    }

    fn delete(&self, key: &CounterKey) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.delete(&key),
                CounterError::is_transient,
            )
            .await
        })
    }

    fn evict_by_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<u64, CounterError>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.evict_by_prefix(&prefix),
                CounterError::is_transient,
            )
            .await
        })
    }
}

/// [`DistributedLock`] that retries release and extend on backend errors.
///
/// Acquire is forwarded once. Replaying it would mint a new token and open a
/// new wait window, orphaning any lease the first call was granted and
/// stretching the caller's wait past its bound.
#[derive(Debug, Clone)]
pub struct RetryingLock<L> {
    inner: L,
    policy: RetryPolicy,
}

impl<L: DistributedLock> RetryingLock<L> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub const fn new(inner: L, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped lock.
    #[must_use]
    pub const fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: DistributedLock> DistributedLock for RetryingLock<L> {
    fn acquire(
        &self,
        key: &LockKey,
        lease_for: Duration,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Lease, LockError>> {
        self.inner.acquire(key, lease_for, wait)
    }

    fn release(&self, lease: &Lease) -> BoxFuture<'_, Result<(), LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.release(&lease),
                LockError::is_transient,
            )
            .await
        })
    }

    fn extend(&self, lease: &Lease, lease_for: Duration) -> BoxFuture<'_, Result<Lease, LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            retry_transient(
                &self.policy,
                || self.inner.extend(&lease, lease_for),
                LockError::is_transient,
            )
            .await
        })
    }
}
