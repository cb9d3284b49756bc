//! # Stockline Core
//!
//! Domain types and boundary traits for the inventory stock consistency subsystem.
//!
//! Three external collaborators sit behind traits defined here:
//!
//! - [`record::StockRecordStore`]: the durable, authoritative stock record
//! - [`counter::StockCounter`]: the fast shared counter, a rebuildable cache
//! - [`lock::DistributedLock`]: per-item, time-bounded mutual exclusion
//!
//! The durable store is never handed to callers directly. It is wrapped by
//! [`gateway::StockGateway`], whose write path requires a [`gateway::HeldLease`].
//! A `HeldLease` can only be produced by the gateway itself after a successful
//! lock acquisition, so a durable write outside the item lock does not compile.
//!
//! ## Example
//!
//! ```ignore
//! use stockline_core::gateway::StockGateway;
//! use stockline_core::item::ItemId;
//!
//! let lease = gateway.acquire(ItemId::new(42), lease_for, wait_for).await?;
//! let item = gateway.load(lease.item_id()).await?;
//! let next = item.deduct(Quantity::new(2), clock.now())?;
//! gateway.write(&lease, &next, item.version).await?;
//! gateway.release(lease).await?;
//! ```

use std::future::Future;
use std::pin::Pin;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod counter;
pub mod error;
pub mod gateway;
pub mod item;
pub mod lock;
pub mod quantity;
pub mod reconciliation;
pub mod record;
pub mod stock;

/// Boxed, sendable future returned by the boundary traits.
///
/// The traits return this instead of using `async fn` so that they stay
/// dyn-compatible and can be shared as `Arc<dyn Trait>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Environment module - Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use stockline_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time for production wiring.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Convenience re-exports for engine and adapter code.
pub mod prelude {
    pub use crate::counter::{CounterError, CounterKey, StockCounter};
    pub use crate::environment::Clock;
    pub use crate::error::{ErrorKind, StockError};
    pub use crate::gateway::{HeldLease, StockGateway};
    pub use crate::item::{GroupId, ItemId};
    pub use crate::lock::{DistributedLock, Lease, LeaseToken, LockError, LockKey};
    pub use crate::quantity::Quantity;
    pub use crate::reconciliation::{MarkerReason, ReconciliationLog, UncommittedMarker};
    pub use crate::record::{RecordError, StockRecordStore};
    pub use crate::stock::{StockItem, StockSnapshot, StockSource, Version};
}
