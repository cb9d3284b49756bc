//! Shared wiring for runtime integration tests.

#![allow(dead_code)] // Each test binary uses a different subset

use std::sync::Arc;
use std::time::Duration;
use stockline_core::counter::CounterKey;
use stockline_core::item::ItemId;
use stockline_runtime::{
    EngineConfig, InventoryEngine, ReconciliationSweep, StockBackends, SweepConfig,
};
use stockline_testing::{
    InMemoryDistributedLock, InMemoryReconciliationLog, InMemoryStockCounter,
    InMemoryStockRecordStore, fixtures, mocks::test_clock,
};

/// In-memory backends plus handles for fault injection and inspection.
#[derive(Clone)]
pub struct Harness {
    pub records: InMemoryStockRecordStore,
    pub locks: InMemoryDistributedLock,
    pub counter: InMemoryStockCounter,
    pub markers: InMemoryReconciliationLog,
}

impl Harness {
    pub fn new() -> Self {
        stockline_testing::init_test_tracing();
        Self {
            records: InMemoryStockRecordStore::new(),
            locks: InMemoryDistributedLock::new(),
            counter: InMemoryStockCounter::new(),
            markers: InMemoryReconciliationLog::new(),
        }
    }

    /// Seed a record in group 1 and a matching counter entry.
    pub fn with_item(self, item_id: i64, available: u32) -> Self {
        self.records
            .seed(fixtures::stock_item(item_id, 1, available));
        self.counter
            .put(&counter_key(item_id), i64::from(available));
        self
    }

    pub fn backends(&self) -> StockBackends {
        StockBackends::new(
            Arc::new(self.records.clone()),
            Arc::new(self.locks.clone()),
            Arc::new(self.counter.clone()),
            Arc::new(self.markers.clone()),
        )
    }

    pub fn engine(&self) -> InventoryEngine {
        self.engine_with(fast_config())
    }

    pub fn engine_with(&self, config: EngineConfig) -> InventoryEngine {
        InventoryEngine::new(self.backends(), Arc::new(test_clock()), config)
    }

    pub fn sweep(&self) -> ReconciliationSweep {
        self.sweep_with(SweepConfig {
            wait_timeout: Duration::from_millis(20),
            ..SweepConfig::default()
        })
    }

    pub fn sweep_with(&self, config: SweepConfig) -> ReconciliationSweep {
        ReconciliationSweep::new(self.backends(), config)
    }

    /// Committed available quantity, straight from the record store.
    pub fn available(&self, item_id: i64) -> Option<u32> {
        self.records
            .get(ItemId::new(item_id))
            .map(|item| item.available.value())
    }

    pub fn cached(&self, item_id: i64) -> Option<i64> {
        self.counter.peek(&counter_key(item_id))
    }
}

pub fn counter_key(item_id: i64) -> CounterKey {
    CounterKey::stock(ItemId::new(item_id))
}

/// Short waits so contention tests finish quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig::builder()
        .lease_duration(Duration::from_secs(10))
        .wait_timeout(Duration::from_millis(50))
        .build()
}
