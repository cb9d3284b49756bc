//! The external collaborators the engine, sweep, and health probe share.

use std::sync::Arc;
use stockline_core::counter::StockCounter;
use stockline_core::gateway::StockGateway;
use stockline_core::lock::DistributedLock;
use stockline_core::reconciliation::ReconciliationLog;
use stockline_core::record::StockRecordStore;

/// Handles to every backing store.
///
/// The record store and lock service are only reachable through the
/// [`StockGateway`] built from them.
#[derive(Clone)]
pub struct StockBackends {
    pub(crate) gateway: StockGateway,
    pub(crate) counter: Arc<dyn StockCounter>,
    pub(crate) markers: Arc<dyn ReconciliationLog>,
}

impl StockBackends {
    /// Bundle the four stores.
    #[must_use]
    pub fn new(
        records: Arc<dyn StockRecordStore>,
        locks: Arc<dyn DistributedLock>,
        counter: Arc<dyn StockCounter>,
        markers: Arc<dyn ReconciliationLog>,
    ) -> Self {
        Self {
            gateway: StockGateway::new(records, locks),
            counter,
            markers,
        }
    }
}

impl std::fmt::Debug for StockBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockBackends")
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}
