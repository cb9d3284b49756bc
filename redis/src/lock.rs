//! Redis-backed lease lock.
//!
//! # Keys
//!
//! - `lock:stock:{item_id}` → owner token, with a `PX` expiry equal to the lease
//!
//! Acquire is `SET NX PX`, retried with jittered backoff until the wait
//! deadline. One token and one deadline cover the whole wait: a transient
//! error is retried inside the same window, and after a `SET` whose reply was
//! lost the stored owner is read back so a grant that did land is returned
//! instead of orphaned. Release and extend compare the stored token first, in
//! a script, so a holder whose lease lapsed can never drop or prolong someone
//! else's.

use crate::millis;
use rand::Rng;
use redis::Script;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::{Duration, Instant};
use stockline_core::BoxFuture;
use stockline_core::lock::{DistributedLock, Lease, LeaseToken, LockError, LockKey};

const RELEASE_IF_OWNER: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

const EXTEND_IF_OWNER: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('PEXPIRE', KEYS[1], ARGV[2])
    end
    return 0
";

/// Base pause between acquire attempts.
const RETRY_BASE: Duration = Duration::from_millis(10);

/// [`DistributedLock`] over a `Redis` connection.
#[derive(Clone)]
pub struct RedisDistributedLock {
    conn_manager: ConnectionManager,
    release: Script,
    extend: Script,
}

impl RedisDistributedLock {
    /// Create a lock service over an existing connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            release: Script::new(RELEASE_IF_OWNER),
            extend: Script::new(EXTEND_IF_OWNER),
        }
    }

    async fn try_set(
        &self,
        key: &LockKey,
        token: &LeaseToken,
        lease_for: Duration,
    ) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(millis(lease_for))
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn is_owner(&self, key: &LockKey, token: &LeaseToken) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let owner: Option<String> = redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(owner.as_deref() == Some(token.as_str()))
    }
}

impl std::fmt::Debug for RedisDistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDistributedLock").finish_non_exhaustive()
    }
}

fn backoff(remaining: Duration) -> Duration {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=10));
    (RETRY_BASE + jitter).min(remaining)
}

/// Poll `try_set` until it grants, or `give_up_at` passes.
///
/// Returns the instant the granting attempt was sent. A transient error from
/// `try_set` may hide a write that landed, so the earliest such attempt is
/// remembered and `is_owner` settles it on the next refusal or at the
/// deadline. The deadline is never extended: the last transient error is
/// returned if the window closes without a definite answer.
async fn poll_for_grant<S, SF, O, OF>(
    key: &LockKey,
    give_up_at: Instant,
    mut try_set: S,
    mut is_owner: O,
) -> Result<Instant, LockError>
where
    S: FnMut() -> SF,
    SF: Future<Output = Result<bool, LockError>>,
    O: FnMut() -> OF,
    OF: Future<Output = Result<bool, LockError>>,
{
    let mut attempts: u32 = 0;
    let mut unanswered_since: Option<Instant> = None;
    let mut last_error: Option<LockError> = None;

    loop {
        let sent_at = Instant::now();
        attempts += 1;
        match try_set().await {
            Ok(true) => {
                tracing::trace!(key = %key, attempts, "Lease granted");
                return Ok(sent_at);
            }
            Ok(false) => match unanswered_since {
                Some(since) => match is_owner().await {
                    Ok(true) => {
                        tracing::debug!(key = %key, attempts, "Lease granted by an unanswered attempt");
                        return Ok(since);
                    }
                    Ok(false) => {
                        unanswered_since = None;
                        last_error = None;
                    }
                    Err(err) => last_error = Some(err),
                },
                None => last_error = None,
            },
            Err(err) if err.is_transient() => {
                tracing::debug!(key = %key, attempts, error = %err, "Lease attempt failed");
                unanswered_since.get_or_insert(sent_at);
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }

        let now = Instant::now();
        if now >= give_up_at {
            if let Some(since) = unanswered_since {
                if let Ok(true) = is_owner().await {
                    tracing::debug!(key = %key, attempts, "Lease granted by an unanswered attempt");
                    return Ok(since);
                }
            }
            return match last_error {
                Some(err) => Err(err),
                None => {
                    tracing::debug!(key = %key, attempts, "Lease still held by another owner");
                    Err(LockError::Unavailable { key: key.clone() })
                }
            };
        }
        tokio::time::sleep(backoff(give_up_at - now)).await;
    }
}

impl DistributedLock for RedisDistributedLock {
    fn acquire(
        &self,
        key: &LockKey,
        lease_for: Duration,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Lease, LockError>> {
        let key = key.clone();
        Box::pin(async move {
            let token = LeaseToken::generate();
            let give_up_at = Instant::now() + wait;
            let granted_at = poll_for_grant(
                &key,
                give_up_at,
                || self.try_set(&key, &token, lease_for),
                || self.is_owner(&key, &token),
            )
            .await?;
            Ok(Lease::new(key, token, granted_at, lease_for))
        })
    }

    fn release(&self, lease: &Lease) -> BoxFuture<'_, Result<(), LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let removed: i64 = self
                .release
                .key(lease.key().as_str())
                .arg(lease.token().as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(e.to_string()))?;

            if removed == 0 {
                return Err(LockError::NotOwner {
                    key: lease.key().clone(),
                });
            }
            Ok(())
        })
    }

    fn extend(&self, lease: &Lease, lease_for: Duration) -> BoxFuture<'_, Result<Lease, LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let renewed_at = Instant::now();
            let extended: i64 = self
                .extend
                .key(lease.key().as_str())
                .arg(lease.token().as_str())
                .arg(millis(lease_for))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(e.to_string()))?;

            if extended == 0 {
                return Err(LockError::Expired {
                    key: lease.key().clone(),
                });
            }
            Ok(Lease::new(
                lease.key().clone(),
                lease.token().clone(),
                renewed_at,
                lease_for,
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stockline_core::item::ItemId;

    fn backend() -> LockError {
        LockError::Backend("connection reset".to_string())
    }

    /// Replays `replies` in order, then keeps answering with the last one.
    struct Scripted {
        replies: Mutex<VecDeque<Result<bool, LockError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<bool, LockError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn reply(&self) -> std::future::Ready<Result<bool, LockError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            };
            std::future::ready(reply)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn key() -> LockKey {
        LockKey::stock(ItemId::new(1))
    }

    #[tokio::test]
    async fn lost_reply_is_recognised_as_own_grant() {
        let set = Scripted::new(vec![Err(backend()), Ok(false)]);
        let owner = Scripted::new(vec![Ok(true)]);
        let started = Instant::now();

        let granted_at = poll_for_grant(
            &key(),
            started + Duration::from_secs(1),
            || set.reply(),
            || owner.reply(),
        )
        .await
        .unwrap();

        assert_eq!(set.calls(), 2);
        assert_eq!(owner.calls(), 1);
        // The lease is dated from the attempt that landed, not the read-back
        assert!(granted_at >= started);
        assert!(granted_at < started + Duration::from_millis(5));
    }

    #[tokio::test]
    async fn lost_reply_without_grant_keeps_waiting() {
        let set = Scripted::new(vec![Err(backend()), Ok(false), Ok(true)]);
        let owner = Scripted::new(vec![Ok(false)]);

        let result = poll_for_grant(
            &key(),
            Instant::now() + Duration::from_secs(1),
            || set.reply(),
            || owner.reply(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(set.calls(), 3);
        assert_eq!(owner.calls(), 1);
    }

    #[tokio::test]
    async fn transient_errors_stay_inside_the_wait_window() {
        let set = Scripted::new(vec![Err(backend())]);
        let owner = Scripted::new(vec![Err(backend())]);
        let wait = Duration::from_millis(60);
        let started = Instant::now();

        let result = poll_for_grant(&key(), started + wait, || set.reply(), || owner.reply()).await;

        let elapsed = started.elapsed();
        assert!(matches!(result, Err(LockError::Backend(_))));
        assert!(set.calls() > 1, "transient errors should be retried");
        assert!(elapsed >= wait);
        assert!(elapsed < wait + Duration::from_millis(40), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn deadline_check_recovers_a_late_answer() {
        let set = Scripted::new(vec![Err(backend())]);
        let owner = Scripted::new(vec![Ok(true)]);

        let result = poll_for_grant(&key(), Instant::now(), || set.reply(), || owner.reply()).await;

        assert!(result.is_ok());
        assert_eq!(set.calls(), 1);
        assert_eq!(owner.calls(), 1);
    }

    #[tokio::test]
    async fn contention_ends_unavailable() {
        let set = Scripted::new(vec![Ok(false)]);
        let owner = Scripted::new(vec![Ok(true)]);

        let result = poll_for_grant(
            &key(),
            Instant::now() + Duration::from_millis(30),
            || set.reply(),
            || owner.reply(),
        )
        .await;

        assert!(matches!(result, Err(LockError::Unavailable { .. })));
        // Without an unanswered attempt the owner is never consulted
        assert_eq!(owner.calls(), 0);
    }

    #[test]
    fn backoff_never_exceeds_remaining_wait() {
        assert_eq!(backoff(Duration::from_millis(3)), Duration::from_millis(3));
        let pause = backoff(Duration::from_secs(1));
        assert!(pause >= RETRY_BASE && pause <= RETRY_BASE + Duration::from_millis(10));
    }
}
