//! Redis-backed stock counter.
//!
//! # Keys
//!
//! - `stock:counter:{item_id}` → integer available quantity, with a TTL
//!
//! Every write refreshes the TTL, the delta scripts included: a successful
//! `DECRBY`/`INCRBY` is followed by `EXPIRE` inside the same script, so an
//! item that keeps moving never ages out of the cache.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use stockline_core::BoxFuture;
use stockline_core::counter::{CounterError, CounterKey, StockCounter};

/// Keys deleted per `DEL` while evicting.
const EVICT_BATCH: usize = 500;
/// `COUNT` hint for `SCAN`.
const SCAN_COUNT: usize = 500;

/// `ARGV[1]` is the amount, `ARGV[2]` the TTL in seconds.
///
/// Returns `{1, new}` on success, `{-1, 0}` if the key is missing,
/// `{-2, current}` if the value is below the requested amount.
const DECREMENT_IF_SUFFICIENT: &str = r"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return {-1, 0}
    end
    current = tonumber(current)
    local n = tonumber(ARGV[1])
    if current < n then
        return {-2, current}
    end
    local updated = redis.call('DECRBY', KEYS[1], n)
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return {1, updated}
";

/// Same arguments as [`DECREMENT_IF_SUFFICIENT`]. Returns `{1, new}` on
/// success, `{-1, 0}` if the key is missing.
const INCREMENT_IF_EXISTS: &str = r"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        return {-1, 0}
    end
    local updated = redis.call('INCRBY', KEYS[1], ARGV[1])
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return {1, updated}
";

/// [`StockCounter`] over a `Redis` connection.
///
/// # Example
///
/// ```no_run
/// use stockline_redis::{RedisStockCounter, connect};
/// use stockline_core::counter::{CounterKey, StockCounter};
/// use stockline_core::item::ItemId;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let counter = RedisStockCounter::new(connect("redis://127.0.0.1:6379").await?, Duration::from_secs(86_400));
/// let key = CounterKey::stock(ItemId::new(1));
/// counter.set_value(&key, 10).await?;
/// assert_eq!(counter.decrement_by(&key, 3).await?, 7);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStockCounter {
    conn_manager: ConnectionManager,
    ttl: Duration,
    decrement: Script,
    increment: Script,
}

impl RedisStockCounter {
    /// Create a counter whose keys expire `ttl` after their last full write.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn_manager,
            ttl,
            decrement: Script::new(DECREMENT_IF_SUFFICIENT),
            increment: Script::new(INCREMENT_IF_EXISTS),
        }
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

impl std::fmt::Debug for RedisStockCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStockCounter")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn backend(e: &redis::RedisError) -> CounterError {
    CounterError::Backend(e.to_string())
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

impl StockCounter for RedisStockCounter {
    fn get_value(&self, key: &CounterKey) -> BoxFuture<'_, Result<Option<i64>, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: Option<i64> = conn.get(key.as_str()).await.map_err(|e| backend(&e))?;
            Ok(value)
        })
    }

    fn get_values(
        &self,
        keys: &[CounterKey],
    ) -> BoxFuture<'_, Result<Vec<Option<i64>>, CounterError>> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let mut conn = self.conn_manager.clone();
            let values: Vec<Option<i64>> = redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;
            Ok(values)
        })
    }

    fn decrement_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let (status, value): (i64, i64) = self
                .decrement
                .key(key.as_str())
                .arg(n)
                .arg(self.ttl_secs())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;

            match status {
                -1 => Err(CounterError::Missing { key }),
                -2 => Err(CounterError::InsufficientValue {
                    key,
                    current: value,
                    requested: n,
                }),
                _ => Ok(value),
            }
        })
    }

    fn increment_by(&self, key: &CounterKey, n: i64) -> BoxFuture<'_, Result<i64, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let (status, value): (i64, i64) = self
                .increment
                .key(key.as_str())
                .arg(n)
                .arg(self.ttl_secs())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;

            if status == -1 {
                return Err(CounterError::Missing { key });
            }
            Ok(value)
        })
    }

    fn set_value(&self, key: &CounterKey, value: i64) -> BoxFuture<'_, Result<(), CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .set_ex(key.as_str(), value, self.ttl_secs())
                .await
                .map_err(|e| backend(&e))?;
            Ok(())
        })
    }

    fn set_if_absent(
        &self,
        key: &CounterKey,
        value: i64,
    ) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let reply: Option<String> = redis::cmd("SET")
                .arg(key.as_str())
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_secs())
                .query_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;
            Ok(reply.is_some())
        })
    }

    fn delete(&self, key: &CounterKey) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = key.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let removed: i64 = conn.del(key.as_str()).await.map_err(|e| backend(&e))?;
            Ok(removed > 0)
        })
    }

    fn evict_by_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<u64, CounterError>> {
        let pattern = glob_escape(prefix);
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let mut cursor: u64 = 0;
            let mut pending: Vec<String> = Vec::new();
            let mut evicted: u64 = 0;

            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| backend(&e))?;
                pending.extend(keys);

                while pending.len() >= EVICT_BATCH || (next == 0 && !pending.is_empty()) {
                    let take = pending.len().min(EVICT_BATCH);
                    let batch: Vec<String> = pending.drain(..take).collect();
                    let removed: u64 = conn.del(&batch).await.map_err(|e| backend(&e))?;
                    evicted += removed;
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }

            tracing::info!(pattern = %pattern, evicted, "Counter keys evicted");
            Ok(evicted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_escape_matches_prefix_literally() {
        assert_eq!(glob_escape("stock:counter:"), "stock:counter:*");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }

    #[test]
    fn millis_never_rounds_to_zero() {
        assert_eq!(crate::millis(Duration::ZERO), 1);
        assert_eq!(crate::millis(Duration::from_secs(2)), 2000);
    }
}
