//! Integration tests for the `Redis` counter and lock using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. Each test starts its own `Redis` container.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use std::time::Duration;
use stockline_core::counter::{CounterError, CounterKey, StockCounter};
use stockline_core::item::ItemId;
use stockline_core::lock::{DistributedLock, LockError, LockKey};
use stockline_redis::{ConnectionManager, RedisDistributedLock, RedisStockCounter};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

const TTL: Duration = Duration::from_secs(3600);

/// Start a `Redis` container and open a connection manager on it.
///
/// # Panics
/// Panics if container setup fails (test environment issue).
async fn setup_redis() -> (ContainerAsync<Redis>, ConnectionManager) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let conn = stockline_redis::connect(&format!("redis://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to redis");
    (container, conn)
}

fn key(id: i64) -> CounterKey {
    CounterKey::stock(ItemId::new(id))
}

#[tokio::test]
async fn test_decrement_never_goes_negative() {
    let (_container, conn) = setup_redis().await;
    let counter = RedisStockCounter::new(conn, TTL);

    counter.set_value(&key(1), 5).await.expect("Failed to set");
    assert_eq!(counter.decrement_by(&key(1), 3).await.expect("Failed to decrement"), 2);

    let result = counter.decrement_by(&key(1), 3).await;
    assert!(
        matches!(
            result,
            Err(CounterError::InsufficientValue {
                current: 2,
                requested: 3,
                ..
            })
        ),
        "Should refuse, got: {result:?}"
    );
    assert_eq!(counter.get_value(&key(1)).await.expect("Failed to get"), Some(2));
}

#[tokio::test]
async fn test_deltas_on_missing_keys() {
    let (_container, conn) = setup_redis().await;
    let counter = RedisStockCounter::new(conn, TTL);

    let decrement = counter.decrement_by(&key(9), 1).await;
    assert!(matches!(decrement, Err(CounterError::Missing { .. })));

    let increment = counter.increment_by(&key(9), 1).await;
    assert!(matches!(increment, Err(CounterError::Missing { .. })));

    // Neither delta may create the key
    assert_eq!(counter.get_value(&key(9)).await.expect("Failed to get"), None);
}

/// Remaining TTL of `key` in seconds, as reported by `TTL`.
async fn ttl_of(conn: &ConnectionManager, key: &CounterKey) -> i64 {
    let mut conn = conn.clone();
    redis::cmd("TTL")
        .arg(key.as_str())
        .query_async(&mut conn)
        .await
        .expect("Failed to read TTL")
}

/// Shrink the TTL on `key` so a refresh is observable.
async fn shorten_ttl(conn: &ConnectionManager, key: &CounterKey, secs: u64) {
    let mut conn = conn.clone();
    let _: i64 = redis::cmd("EXPIRE")
        .arg(key.as_str())
        .arg(secs)
        .query_async(&mut conn)
        .await
        .expect("Failed to set TTL");
}

#[tokio::test]
async fn test_deltas_refresh_ttl() {
    let (_container, conn) = setup_redis().await;
    let counter = RedisStockCounter::new(conn.clone(), TTL);
    let ttl_secs = i64::try_from(TTL.as_secs()).expect("TTL fits i64");

    counter.set_value(&key(4), 10).await.expect("Failed to set");

    shorten_ttl(&conn, &key(4), 5).await;
    assert!(ttl_of(&conn, &key(4)).await <= 5);
    counter.decrement_by(&key(4), 2).await.expect("Failed to decrement");
    assert!(
        ttl_of(&conn, &key(4)).await > ttl_secs - 10,
        "decrement should reset the TTL"
    );

    shorten_ttl(&conn, &key(4), 5).await;
    counter.increment_by(&key(4), 1).await.expect("Failed to increment");
    assert!(
        ttl_of(&conn, &key(4)).await > ttl_secs - 10,
        "increment should reset the TTL"
    );

    // A refused decrement leaves the key alone
    shorten_ttl(&conn, &key(4), 5).await;
    let refused = counter.decrement_by(&key(4), 100).await;
    assert!(matches!(refused, Err(CounterError::InsufficientValue { .. })));
    assert!(ttl_of(&conn, &key(4)).await <= 5);
}

#[tokio::test]
async fn test_set_if_absent_and_batched_reads() {
    let (_container, conn) = setup_redis().await;
    let counter = RedisStockCounter::new(conn, TTL);

    assert!(counter.set_if_absent(&key(1), 10).await.expect("Failed to set"));
    assert!(!counter.set_if_absent(&key(1), 99).await.expect("Failed to set"));
    counter.set_value(&key(3), 7).await.expect("Failed to set");

    let values = counter
        .get_values(&[key(1), key(2), key(3)])
        .await
        .expect("Failed to read");
    assert_eq!(values, vec![Some(10), None, Some(7)]);

    assert!(counter.delete(&key(1)).await.expect("Failed to delete"));
    assert!(!counter.delete(&key(1)).await.expect("Failed to delete"));
}

#[tokio::test]
async fn test_evict_by_prefix_spares_other_keys() {
    let (_container, conn) = setup_redis().await;
    let counter = RedisStockCounter::new(conn, TTL);

    for id in 1..=1_200 {
        counter.set_value(&key(id), 1).await.expect("Failed to set");
    }
    let other = CounterKey::from_raw("other:counter:1");
    counter.set_value(&other, 4).await.expect("Failed to set");

    let evicted = counter
        .evict_by_prefix("stock:counter:")
        .await
        .expect("Failed to evict");

    assert_eq!(evicted, 1_200);
    assert_eq!(counter.get_value(&key(600)).await.expect("Failed to get"), None);
    assert_eq!(counter.get_value(&other).await.expect("Failed to get"), Some(4));
}

#[tokio::test]
async fn test_lock_is_exclusive_until_released() {
    let (_container, conn) = setup_redis().await;
    let lock = RedisDistributedLock::new(conn);
    let key = LockKey::stock(ItemId::new(1));

    let lease = lock
        .acquire(&key, Duration::from_secs(10), Duration::ZERO)
        .await
        .expect("Failed to acquire");

    let contended = lock
        .acquire(&key, Duration::from_secs(10), Duration::from_millis(50))
        .await;
    assert!(
        matches!(contended, Err(LockError::Unavailable { .. })),
        "Should be held, got: {contended:?}"
    );

    lock.release(&lease).await.expect("Failed to release");
    let second = lock
        .acquire(&key, Duration::from_secs(10), Duration::ZERO)
        .await
        .expect("Should acquire after release");
    assert_ne!(second.token(), lease.token());

    // The first holder's token no longer owns the key
    let stale = lock.release(&lease).await;
    assert!(matches!(stale, Err(LockError::NotOwner { .. })));
}

#[tokio::test]
async fn test_waiter_acquires_once_lease_expires() {
    let (_container, conn) = setup_redis().await;
    let lock = RedisDistributedLock::new(conn);
    let key = LockKey::stock(ItemId::new(2));

    let first = lock
        .acquire(&key, Duration::from_millis(100), Duration::ZERO)
        .await
        .expect("Failed to acquire");

    let second = lock
        .acquire(&key, Duration::from_secs(10), Duration::from_secs(2))
        .await
        .expect("Should acquire after expiry");

    let extend = lock.extend(&first, Duration::from_secs(10)).await;
    assert!(matches!(extend, Err(LockError::Expired { .. })));

    lock.release(&second).await.expect("Failed to release");
}

#[tokio::test]
async fn test_extend_prolongs_lease() {
    let (_container, conn) = setup_redis().await;
    let lock = RedisDistributedLock::new(conn);
    let key = LockKey::stock(ItemId::new(3));

    let lease = lock
        .acquire(&key, Duration::from_millis(200), Duration::ZERO)
        .await
        .expect("Failed to acquire");
    let extended = lock
        .extend(&lease, Duration::from_secs(10))
        .await
        .expect("Failed to extend");
    assert!(extended.deadline() > lease.deadline());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let contended = lock
        .acquire(&key, Duration::from_secs(1), Duration::ZERO)
        .await;
    assert!(matches!(contended, Err(LockError::Unavailable { .. })));

    lock.release(&extended).await.expect("Failed to release");
}

#[tokio::test]
async fn test_contended_acquire_gives_up_within_wait() {
    let (_container, conn) = setup_redis().await;
    let lock = RedisDistributedLock::new(conn);
    let key = LockKey::stock(ItemId::new(4));

    let holder = lock
        .acquire(&key, Duration::from_secs(10), Duration::ZERO)
        .await
        .expect("Failed to acquire");

    let wait = Duration::from_millis(150);
    let started = std::time::Instant::now();
    let contended = lock.acquire(&key, Duration::from_secs(1), wait).await;
    let elapsed = started.elapsed();

    assert!(matches!(contended, Err(LockError::Unavailable { .. })));
    assert!(elapsed >= wait, "gave up early after {elapsed:?}");
    assert!(
        elapsed < wait + Duration::from_millis(100),
        "waited {elapsed:?} for a {wait:?} window"
    );

    lock.release(&holder).await.expect("Failed to release");
}
