//! `Redis` adapters for Stockline.
//!
//! - [`RedisStockCounter`]: the fast stock counter, with atomic
//!   check-and-decrement and increment-if-present scripts
//! - [`RedisDistributedLock`]: per-item leases with owner tokens, so only the
//!   holder can release or extend
//!
//! Both share one [`ConnectionManager`], which reconnects on its own.
//!
//! # Example
//!
//! ```no_run
//! use stockline_redis::{RedisDistributedLock, RedisStockCounter, connect};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = connect("redis://127.0.0.1:6379").await?;
//! let counter = RedisStockCounter::new(conn.clone(), Duration::from_secs(86_400));
//! let locks = RedisDistributedLock::new(conn);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod counter;
mod lock;

pub use counter::RedisStockCounter;
pub use lock::RedisDistributedLock;
pub use redis::aio::ConnectionManager;

use std::time::Duration;

/// Open a client and wrap it in a [`ConnectionManager`].
///
/// # Errors
///
/// Returns [`redis::RedisError`] if the URL is invalid or the first connection fails.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(redis_url)?;
    ConnectionManager::new(client).await
}

/// Whole milliseconds, at least one (Redis rejects zero expirations).
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}
