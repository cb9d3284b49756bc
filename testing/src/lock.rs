//! In-memory lease lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stockline_core::BoxFuture;
use stockline_core::lock::{DistributedLock, Lease, LeaseToken, LockError, LockKey};
use tokio::sync::Notify;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
struct Held {
    token: LeaseToken,
    expires_at: Instant,
}

/// Process-local [`DistributedLock`] with real lease expiry. Clones share state.
///
/// Waiters are woken on release and otherwise re-check every few milliseconds,
/// so an expired lease is picked up without an explicit release.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDistributedLock {
    leases: Arc<Mutex<HashMap<LockKey, Held>>>,
    released: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
    grants: Arc<AtomicU64>,
}

impl InMemoryDistributedLock {
    /// Create a lock service with no leases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether a valid lease exists on `key`.
    #[must_use]
    pub fn is_held(&self, key: &LockKey) -> bool {
        self.leases
            .lock()
            .ok()
            .and_then(|leases| leases.get(key).map(|h| Instant::now() < h.expires_at))
            .unwrap_or(false)
    }

    /// Expire a lease immediately, as if its holder stalled past the deadline.
    pub fn force_expire(&self, key: &LockKey) {
        if let Ok(mut leases) = self.leases.lock() {
            if let Some(held) = leases.get_mut(key) {
                held.expires_at = Instant::now();
            }
        }
        self.released.notify_waiters();
    }

    /// Total leases granted so far.
    #[must_use]
    pub fn grant_count(&self) -> u64 {
        self.grants.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::Backend("lock service unavailable".into()));
        }
        Ok(())
    }

    fn try_grant(&self, key: &LockKey, lease_for: Duration) -> Result<Option<Lease>, LockError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LockError::Backend("Mutex lock failed".into()))?;
        let now = Instant::now();
        if leases.get(key).is_some_and(|held| now < held.expires_at) {
            return Ok(None);
        }
        let token = LeaseToken::generate();
        leases.insert(
            key.clone(),
            Held {
                token: token.clone(),
                expires_at: now + lease_for,
            },
        );
        self.grants.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Lease::new(key.clone(), token, now, lease_for)))
    }
}

impl DistributedLock for InMemoryDistributedLock {
    fn acquire(
        &self,
        key: &LockKey,
        lease_for: Duration,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Lease, LockError>> {
        let key = key.clone();
        Box::pin(async move {
            self.check_available()?;
            let give_up_at = Instant::now() + wait;
            loop {
                if let Some(lease) = self.try_grant(&key, lease_for)? {
                    return Ok(lease);
                }
                let now = Instant::now();
                if now >= give_up_at {
                    return Err(LockError::Unavailable { key });
                }
                let nap = POLL_INTERVAL.min(give_up_at - now);
                tokio::select! {
                    () = self.released.notified() => {},
                    () = tokio::time::sleep(nap) => {},
                }
            }
        })
    }

    fn release(&self, lease: &Lease) -> BoxFuture<'_, Result<(), LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            self.check_available()?;
            let owned = {
                let mut leases = self
                    .leases
                    .lock()
                    .map_err(|_| LockError::Backend("Mutex lock failed".into()))?;
                let ours = leases
                    .get(lease.key())
                    .filter(|held| held.token == *lease.token())
                    .map(|held| Instant::now() < held.expires_at);
                if ours.is_some() {
                    leases.remove(lease.key());
                }
                ours.unwrap_or(false)
            };
            self.released.notify_waiters();
            if owned {
                Ok(())
            } else {
                Err(LockError::NotOwner {
                    key: lease.key().clone(),
                })
            }
        })
    }

    fn extend(&self, lease: &Lease, lease_for: Duration) -> BoxFuture<'_, Result<Lease, LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            self.check_available()?;
            let mut leases = self
                .leases
                .lock()
                .map_err(|_| LockError::Backend("Mutex lock failed".into()))?;
            let now = Instant::now();
            match leases.get_mut(lease.key()) {
                Some(held) if held.token == *lease.token() && now < held.expires_at => {
                    held.expires_at = now + lease_for;
                    Ok(Lease::new(
                        lease.key().clone(),
                        lease.token().clone(),
                        now,
                        lease_for,
                    ))
                },
                _ => Err(LockError::Expired {
                    key: lease.key().clone(),
                }),
            }
        })
    }
}
