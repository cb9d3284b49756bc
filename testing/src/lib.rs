//! # Stockline Testing
//!
//! Testing utilities for the Stockline inventory subsystem.
//!
//! This crate provides:
//! - In-memory implementations of every boundary trait, with fault injection
//! - Deterministic clocks
//! - Fixtures and proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use stockline_testing::{InMemoryStockRecordStore, InMemoryStockCounter, InMemoryDistributedLock};
//!
//! #[tokio::test]
//! async fn decrement_flow() {
//!     let records = InMemoryStockRecordStore::new();
//!     records.seed(fixtures::stock_item(1, 10, 5));
//!     let engine = InventoryEngine::new(/* ... */);
//!     engine.decrement(ItemId::new(1), 2).await.unwrap();
//!     assert_eq!(records.get(ItemId::new(1)).unwrap().available, Quantity::new(3));
//! }
//! ```

use chrono::{DateTime, Utc};
use stockline_core::environment::Clock;

mod counter;
mod lock;
mod reconciliation_log;
mod record_store;

pub use counter::InMemoryStockCounter;
pub use lock::InMemoryDistributedLock;
pub use reconciliation_log::InMemoryReconciliationLog;
pub use record_store::InMemoryStockRecordStore;

/// Deterministic stand-ins for the engine environment.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// 2025-01-01T00:00:00Z, the instant every fixture is stamped with.
    pub const TEST_EPOCH_SECS: i64 = 1_735_689_600;

    /// Clock frozen at one instant.
    ///
    /// ```
    /// use stockline_testing::mocks::FixedClock;
    /// use stockline_core::environment::Clock;
    ///
    /// let clock = FixedClock::new(chrono::Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock(DateTime<Utc>);

    impl FixedClock {
        /// Freeze at `at`.
        #[must_use]
        pub const fn new(at: DateTime<Utc>) -> Self {
            Self(at)
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Clock frozen at [`TEST_EPOCH_SECS`].
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(TEST_EPOCH_SECS, 0).unwrap_or_default())
    }
}

/// Ready-made domain values.
pub mod fixtures {
    use super::Clock;
    use super::mocks::test_clock;
    use stockline_core::item::{GroupId, ItemId};
    use stockline_core::quantity::Quantity;
    use stockline_core::stock::StockItem;

    /// A fresh record at version 0, stamped with [`test_clock`].
    #[must_use]
    pub fn stock_item(item_id: i64, group_id: i64, available: u32) -> StockItem {
        StockItem::new(
            ItemId::new(item_id),
            GroupId::new(group_id),
            Quantity::new(available),
            test_clock().now(),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Initial stock levels small enough to exhaust in a test.
    pub fn initial_stock() -> impl Strategy<Value = u32> {
        0_u32..60
    }

    /// A burst of concurrent decrement sizes.
    pub fn decrement_burst() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(1_i64..8, 1..24)
    }

    /// Mixed signed deltas: positive restocks and negative reservations.
    pub fn signed_deltas() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(prop_oneof![(-6_i64..0), (1_i64..6)], 1..16)
    }
}

/// Install a test tracing subscriber once; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, test_clock};
