//! Inventory mutation engine.
//!
//! Every mutation follows the same skeleton, entirely inside the item lease:
//!
//! 1. acquire the item lock (bounded wait; contention surfaces as `Locked`)
//! 2. read the durable record and compute the candidate next record
//! 3. re-prove lease ownership by extending it
//! 4. conditional durable write (one retry on version conflict)
//! 5. write the committed value through to the counter
//! 6. release the lock
//!
//! Input validation happens before step 1, so malformed requests never contend.
//! Mutations fail closed when the lock service is down; advisory reads fail open
//! to the durable record when the counter is down.

use crate::backends::StockBackends;
use crate::batch::BatchItemResult;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::metrics::{CounterMetrics, MutationMetrics, ReconciliationMetrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stockline_core::counter::{CounterError, CounterKey};
use stockline_core::environment::Clock;
use stockline_core::error::{ErrorKind, StockError};
use stockline_core::gateway::HeldLease;
use stockline_core::item::{GroupId, ItemId};
use stockline_core::lock::{LeaseToken, LockError};
use stockline_core::quantity::Quantity;
use stockline_core::reconciliation::MarkerReason;
use stockline_core::record::RecordError;
use stockline_core::stock::{StockItem, StockSnapshot, StockSource};

/// Engine tuning.
///
/// # Default Values
///
/// - `lease_duration`: 30s
/// - `wait_timeout`: 5s
/// - `commit_timeout`: half the lease
/// - `conflict_retries`: 1
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a mutation may hold the item lock.
    pub lease_duration: Duration,
    /// How long to wait for a busy item lock before answering `Locked`.
    pub wait_timeout: Duration,
    /// Upper bound on the durable write; never more than half the lease.
    pub commit_timeout: Duration,
    /// Extra read-validate-write cycles after a version conflict.
    pub conflict_retries: u32,
    /// Breaker guarding advisory counter reads.
    pub read_breaker: CircuitBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            lease_duration: None,
            wait_timeout: None,
            commit_timeout: None,
            conflict_retries: None,
            read_breaker: None,
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    lease_duration: Option<Duration>,
    wait_timeout: Option<Duration>,
    commit_timeout: Option<Duration>,
    conflict_retries: Option<u32>,
    read_breaker: Option<CircuitBreakerConfig>,
}

impl EngineConfigBuilder {
    /// Set the lease duration.
    #[must_use]
    pub const fn lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = Some(duration);
        self
    }

    /// Set the lock wait timeout.
    #[must_use]
    pub const fn wait_timeout(mut self, duration: Duration) -> Self {
        self.wait_timeout = Some(duration);
        self
    }

    /// Set the durable write timeout. Capped at half the lease.
    #[must_use]
    pub const fn commit_timeout(mut self, duration: Duration) -> Self {
        self.commit_timeout = Some(duration);
        self
    }

    /// Set the number of conflict retries.
    #[must_use]
    pub const fn conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = Some(retries);
        self
    }

    /// Set the read breaker configuration.
    #[must_use]
    pub fn read_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.read_breaker = Some(config);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        let lease_duration = self.lease_duration.unwrap_or(Duration::from_secs(30));
        let half_lease = lease_duration / 2;
        EngineConfig {
            lease_duration,
            wait_timeout: self.wait_timeout.unwrap_or(Duration::from_secs(5)),
            commit_timeout: self.commit_timeout.map_or(half_lease, |t| t.min(half_lease)),
            conflict_retries: self.conflict_retries.unwrap_or(1),
            read_breaker: self.read_breaker.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Decrement(Quantity),
    Increment(Quantity),
    Set {
        target: Quantity,
        group: Option<GroupId>,
    },
}

impl Mutation {
    const fn operation(self) -> &'static str {
        match self {
            Self::Decrement(_) => "decrement",
            Self::Increment(_) => "increment",
            Self::Set { .. } => "set",
        }
    }

    fn apply(
        self,
        current: &StockItem,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<StockItem, StockError> {
        match self {
            Self::Decrement(qty) => current.deduct(qty, now),
            Self::Increment(qty) => current.restore(qty, now),
            Self::Set { target, group } => {
                if group.is_some_and(|g| g != current.group_id) {
                    return Err(StockError::NotFound {
                        item_id: current.item_id,
                    });
                }
                Ok(current.with_quantity(target, now))
            },
        }
    }
}

/// Coordinates the lock, the durable record, and the counter for every stock change.
#[derive(Clone)]
pub struct InventoryEngine {
    backends: StockBackends,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    read_breaker: CircuitBreaker,
}

impl InventoryEngine {
    /// Create an engine over the given stores.
    #[must_use]
    pub fn new(backends: StockBackends, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let read_breaker = CircuitBreaker::new("counter_reads", config.read_breaker.clone());
        Self {
            backends,
            clock,
            config,
            read_breaker,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reserve `qty` units.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`] unless `qty > 0`
    /// - [`StockError::InsufficientStock`] if fewer than `qty` units are available
    /// - [`StockError::Locked`], [`StockError::NotFound`], [`StockError::Conflict`],
    ///   or an infrastructure error
    pub async fn decrement(&self, item_id: ItemId, qty: i64) -> Result<StockItem, StockError> {
        let qty = Quantity::positive(qty)?;
        self.run(item_id, Mutation::Decrement(qty)).await
    }

    /// Return `qty` units (rollback or restock).
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`] unless `qty > 0`
    /// - [`StockError::StockOverflow`] past the largest storable quantity
    /// - [`StockError::Locked`], [`StockError::NotFound`], [`StockError::Conflict`],
    ///   or an infrastructure error
    pub async fn increment(&self, item_id: ItemId, qty: i64) -> Result<StockItem, StockError> {
        let qty = Quantity::positive(qty)?;
        self.run(item_id, Mutation::Increment(qty)).await
    }

    /// Overwrite the available quantity (admin override).
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`] if `target < 0`
    /// - [`StockError::Locked`], [`StockError::NotFound`], [`StockError::Conflict`],
    ///   or an infrastructure error
    pub async fn set_stock(&self, item_id: ItemId, target: i64) -> Result<StockItem, StockError> {
        let target = Quantity::try_from_signed(target)?;
        self.run(item_id, Mutation::Set {
            target,
            group: None,
        })
        .await
    }

    /// Apply `set_stock` to each line of a product group, one item at a time.
    ///
    /// Not atomic: each item is locked, committed, and released on its own, and
    /// a failed line never undoes earlier ones. Items that belong to another
    /// group are rejected as `NotFound`. Results are in request order.
    pub async fn batch_set_stock(
        &self,
        group_id: GroupId,
        lines: &[(ItemId, i64)],
    ) -> Vec<BatchItemResult> {
        let mut results = Vec::with_capacity(lines.len());
        for &(item_id, target) in lines {
            let result = match Quantity::try_from_signed(target) {
                Ok(target) => {
                    self.run(item_id, Mutation::Set {
                        target,
                        group: Some(group_id),
                    })
                    .await
                },
                Err(err) => Err(err),
            };
            results.push(BatchItemResult::from_result(item_id, &result));
        }

        let committed = results.iter().filter(|r| r.is_committed()).count();
        tracing::info!(
            %group_id,
            lines = lines.len(),
            committed,
            "Batch stock update finished"
        );
        results
    }

    /// Reserve several items, each under its own lock.
    ///
    /// If any line fails, lines already reserved are returned with `increment`
    /// (in reverse order) and the failing line's error is returned. A line that
    /// cannot be returned is recorded as a `RollbackFailed` marker.
    ///
    /// # Errors
    ///
    /// The first line's failure; invalid quantities are rejected before anything is locked.
    pub async fn decrement_many(
        &self,
        lines: &[(ItemId, i64)],
    ) -> Result<Vec<StockItem>, StockError> {
        let lines = lines
            .iter()
            .map(|&(item_id, qty)| Quantity::positive(qty).map(|qty| (item_id, qty)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut reserved = Vec::with_capacity(lines.len());
        for &(item_id, qty) in &lines {
            match self.run(item_id, Mutation::Decrement(qty)).await {
                Ok(item) => reserved.push(item),
                Err(err) => {
                    self.roll_back(&lines[..reserved.len()]).await;
                    return Err(err);
                },
            }
        }
        Ok(reserved)
    }

    async fn roll_back(&self, reserved: &[(ItemId, Quantity)]) {
        for &(item_id, qty) in reserved.iter().rev() {
            if let Err(err) = self.run(item_id, Mutation::Increment(qty)).await {
                tracing::error!(
                    %item_id,
                    quantity = %qty,
                    error = %err,
                    "Failed to roll back reservation"
                );
                self.record_marker(item_id, None, MarkerReason::RollbackFailed)
                    .await;
            }
        }
    }

    /// Create the durable record for a new item and warm its counter.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`] if `initial < 0`
    /// - [`StockError::AlreadyExists`] if the item already has a record
    /// - [`StockError::RecordStore`] on storage failure
    pub async fn create_item(
        &self,
        item_id: ItemId,
        group_id: GroupId,
        initial: i64,
    ) -> Result<StockItem, StockError> {
        let available = Quantity::try_from_signed(initial)?;
        let item = StockItem::new(item_id, group_id, available, self.clock.now());
        let created = self
            .backends
            .gateway
            .create(&item)
            .await
            .map_err(|err| match err {
                RecordError::AlreadyExists { item_id } => StockError::AlreadyExists { item_id },
                other => StockError::RecordStore(other.to_string()),
            })?;

        self.repair_counter(&created).await;
        tracing::info!(%item_id, %group_id, available = %created.available, "Stock item created");
        Ok(created)
    }

    /// Advisory read: counter first, durable record on miss or counter failure.
    ///
    /// Never takes the lock. A miss is repaired with a write-if-absent so it
    /// cannot overwrite a concurrent write-through.
    ///
    /// # Errors
    ///
    /// - [`StockError::NotFound`] if the item has no record
    /// - [`StockError::RecordStore`] if the fallback read fails
    pub async fn get_stock(&self, item_id: ItemId) -> Result<StockSnapshot, StockError> {
        let key = CounterKey::stock(item_id);
        let counter = &self.backends.counter;

        match self.read_breaker.call(|| counter.get_value(&key)).await {
            Ok(Some(raw)) => match Quantity::try_from_signed(raw) {
                Ok(available) => {
                    CounterMetrics::record_read("counter");
                    return Ok(StockSnapshot {
                        item_id,
                        available,
                        source: StockSource::Counter,
                    });
                },
                Err(_) => {
                    tracing::warn!(%item_id, value = raw, "Counter holds an invalid value");
                    let item = self.load_existing(item_id).await?;
                    self.overwrite_counter(&item).await;
                    CounterMetrics::record_read("record");
                    return Ok(record_snapshot(&item));
                },
            },
            Ok(None) => {
                let item = self.load_existing(item_id).await?;
                self.repair_counter(&item).await;
                CounterMetrics::record_read("record");
                return Ok(record_snapshot(&item));
            },
            Err(CircuitBreakerError::Open) => {
                tracing::debug!(%item_id, "Counter reads short-circuited");
            },
            Err(CircuitBreakerError::Inner(err)) => {
                tracing::warn!(%item_id, error = %err, "Counter read failed, using record");
            },
        }

        let item = self.load_existing(item_id).await?;
        CounterMetrics::record_read("record");
        Ok(record_snapshot(&item))
    }

    /// Advisory read of several items with one counter round trip.
    ///
    /// Items without a durable record are omitted.
    ///
    /// # Errors
    ///
    /// [`StockError::RecordStore`] if a fallback read fails.
    pub async fn get_stocks(&self, item_ids: &[ItemId]) -> Result<Vec<StockSnapshot>, StockError> {
        let keys: Vec<CounterKey> = item_ids.iter().copied().map(CounterKey::stock).collect();
        let counter = &self.backends.counter;

        let (cached, counter_ok) = match self.read_breaker.call(|| counter.get_values(&keys)).await
        {
            Ok(values) => (values, true),
            Err(err) => {
                tracing::warn!(items = keys.len(), error = %err, "Counter multi-read failed, using records");
                (vec![None; keys.len()], false)
            },
        };

        let mut snapshots = Vec::with_capacity(item_ids.len());
        for (&item_id, raw) in item_ids.iter().zip(cached) {
            if let Some(available) = raw.and_then(|v| Quantity::try_from_signed(v).ok()) {
                CounterMetrics::record_read("counter");
                snapshots.push(StockSnapshot {
                    item_id,
                    available,
                    source: StockSource::Counter,
                });
                continue;
            }

            let Some(item) = self.load_record(item_id).await? else {
                continue;
            };
            if counter_ok {
                match raw {
                    None => self.repair_counter(&item).await,
                    Some(value) => {
                        tracing::warn!(%item_id, value, "Counter holds an invalid value");
                        self.overwrite_counter(&item).await;
                    },
                }
            }
            CounterMetrics::record_read("record");
            snapshots.push(record_snapshot(&item));
        }
        Ok(snapshots)
    }

    /// Drop every stock counter entry. Reads fall back to the record and repair lazily.
    ///
    /// # Errors
    ///
    /// [`StockError::CounterStore`] if the counter store fails.
    pub async fn evict_counters(&self) -> Result<u64, StockError> {
        let evicted = self
            .backends
            .counter
            .evict_by_prefix(CounterKey::STOCK_PREFIX)
            .await
            .map_err(|err| StockError::CounterStore(err.to_string()))?;
        tracing::info!(evicted, "Stock counter entries evicted");
        Ok(evicted)
    }

    async fn run(&self, item_id: ItemId, mutation: Mutation) -> Result<StockItem, StockError> {
        let started = Instant::now();
        let result = self.run_locked(item_id, mutation).await;
        MutationMetrics::record(
            mutation.operation(),
            outcome_label(&result),
            started.elapsed(),
        );
        if let Err(err) = &result {
            if err.kind() == ErrorKind::Infrastructure {
                tracing::error!(%item_id, operation = mutation.operation(), error = %err, "Stock mutation failed");
            } else {
                tracing::debug!(%item_id, operation = mutation.operation(), error = %err, "Stock mutation rejected");
            }
        }
        result
    }

    async fn run_locked(&self, item_id: ItemId, mutation: Mutation) -> Result<StockItem, StockError> {
        let gateway = &self.backends.gateway;
        let mut held = gateway
            .acquire(item_id, self.config.lease_duration, self.config.wait_timeout)
            .await
            .map_err(|err| lock_failure(item_id, err))?;
        let token = held.token().clone();

        let result = self.apply_under_lease(&mut held, mutation).await;

        match gateway.release(held).await {
            Ok(()) => {},
            Err(LockError::NotOwner { .. }) => {
                tracing::warn!(%item_id, lease_token = %token, "Lease lapsed before release");
                if result.is_ok() {
                    self.record_marker(item_id, Some(&token), MarkerReason::LeaseLost)
                        .await;
                }
            },
            Err(err) => {
                tracing::warn!(%item_id, error = %err, "Lease release failed, it will expire");
            },
        }
        result
    }

    async fn apply_under_lease(
        &self,
        held: &mut HeldLease,
        mutation: Mutation,
    ) -> Result<StockItem, StockError> {
        let item_id = held.item_id();
        let gateway = &self.backends.gateway;
        let mut conflicts = 0;

        loop {
            let current = self.load_existing(item_id).await?;
            let next = mutation.apply(&current, self.clock.now())?;

            if let Err(err) = gateway.extend(held, self.config.lease_duration).await {
                return Err(match err {
                    LockError::Backend(msg) => StockError::LockService(msg),
                    _ => {
                        tracing::warn!(%item_id, lease_token = %held.token(), "Lease lost before commit");
                        StockError::LeaseLost { item_id }
                    },
                });
            }

            let write = gateway.write(held, &next, current.version);
            match tokio::time::timeout(self.config.commit_timeout, write).await {
                Ok(Ok(stored)) => {
                    self.write_through(held, mutation, &stored).await;
                    return Ok(stored);
                },
                Ok(Err(RecordError::Conflict { .. })) if conflicts < self.config.conflict_retries => {
                    conflicts += 1;
                    MutationMetrics::record_conflict_retry();
                    tracing::debug!(%item_id, attempt = conflicts, "Version conflict, re-reading");
                },
                Ok(Err(RecordError::Conflict { expected, .. })) => {
                    return Err(StockError::Conflict { item_id, expected });
                },
                Ok(Err(RecordError::NotFound { .. })) => {
                    return Err(StockError::NotFound { item_id });
                },
                Ok(Err(err)) => return Err(StockError::RecordStore(err.to_string())),
                Err(_elapsed) => {
                    self.abandon_commit(held).await;
                    return Err(StockError::CommitTimeout { item_id });
                },
            }
        }
    }

    async fn write_through(&self, held: &HeldLease, mutation: Mutation, stored: &StockItem) {
        let key = CounterKey::stock(stored.item_id);
        let committed = i64::from(stored.available);
        let counter = &self.backends.counter;

        let applied = match mutation {
            Mutation::Decrement(qty) => counter.decrement_by(&key, i64::from(qty)).await,
            Mutation::Increment(qty) => counter.increment_by(&key, i64::from(qty)).await,
            Mutation::Set { .. } => counter.set_value(&key, committed).await.map(|()| committed),
        };

        match applied {
            Ok(value) if value == committed => return,
            Ok(value) => {
                CounterMetrics::record_drift();
                tracing::warn!(item_id = %stored.item_id, counter = value, committed, "Counter drifted from record");
            },
            Err(CounterError::InsufficientValue { current, .. }) => {
                CounterMetrics::record_drift();
                tracing::warn!(item_id = %stored.item_id, counter = current, committed, "Counter below committed record");
            },
            Err(CounterError::Missing { .. }) => {
                tracing::debug!(item_id = %stored.item_id, "Counter entry missing, restoring");
            },
            Err(CounterError::Backend(msg)) => {
                self.counter_write_failed(held, &key, &msg).await;
                return;
            },
        }

        if let Err(err) = counter.set_value(&key, committed).await {
            self.counter_write_failed(held, &key, &err.to_string()).await;
        }
    }

    async fn counter_write_failed(&self, held: &HeldLease, key: &CounterKey, error: &str) {
        CounterMetrics::record_write_failure();
        tracing::warn!(item_id = %held.item_id(), error, "Counter write-through failed");
        self.record_marker(
            held.item_id(),
            Some(held.token()),
            MarkerReason::CounterWriteFailed,
        )
        .await;
        if let Err(err) = self.backends.counter.delete(key).await {
            tracing::warn!(item_id = %held.item_id(), error = %err, "Could not invalidate counter entry");
        }
    }

    async fn abandon_commit(&self, held: &HeldLease) {
        let item_id = held.item_id();
        tracing::error!(
            %item_id,
            lease_token = %held.token(),
            commit_timeout = ?self.config.commit_timeout,
            "Durable write timed out, outcome unknown"
        );
        self.record_marker(item_id, Some(held.token()), MarkerReason::CommitTimeout)
            .await;
        if let Err(err) = self
            .backends
            .counter
            .delete(&CounterKey::stock(item_id))
            .await
        {
            tracing::warn!(%item_id, error = %err, "Could not invalidate counter entry");
        }
    }

    async fn record_marker(&self, item_id: ItemId, token: Option<&LeaseToken>, reason: MarkerReason) {
        ReconciliationMetrics::record_marker(reason.as_str());
        if let Err(err) = self.backends.markers.record(item_id, token, reason).await {
            tracing::error!(
                %item_id,
                reason = reason.as_str(),
                error = %err,
                "Failed to record reconciliation marker"
            );
        }
    }

    async fn repair_counter(&self, item: &StockItem) {
        let key = CounterKey::stock(item.item_id);
        match self
            .backends
            .counter
            .set_if_absent(&key, i64::from(item.available))
            .await
        {
            Ok(true) => {
                CounterMetrics::record_repair();
                tracing::debug!(item_id = %item.item_id, "Counter entry restored from record");
            },
            Ok(false) => {},
            Err(err) => {
                tracing::debug!(item_id = %item.item_id, error = %err, "Counter repair skipped");
            },
        }
    }

    /// Replace a corrupt counter entry with the record's value.
    async fn overwrite_counter(&self, item: &StockItem) {
        let key = CounterKey::stock(item.item_id);
        match self
            .backends
            .counter
            .set_value(&key, i64::from(item.available))
            .await
        {
            Ok(()) => {
                CounterMetrics::record_drift();
                tracing::info!(item_id = %item.item_id, "Invalid counter entry overwritten from record");
            },
            Err(err) => {
                tracing::warn!(item_id = %item.item_id, error = %err, "Could not overwrite invalid counter entry");
            },
        }
    }

    async fn load_record(&self, item_id: ItemId) -> Result<Option<StockItem>, StockError> {
        self.backends
            .gateway
            .load(item_id)
            .await
            .map_err(|err| StockError::RecordStore(err.to_string()))
    }

    async fn load_existing(&self, item_id: ItemId) -> Result<StockItem, StockError> {
        self.load_record(item_id)
            .await?
            .ok_or(StockError::NotFound { item_id })
    }
}

impl std::fmt::Debug for InventoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock_failure(item_id: ItemId, err: LockError) -> StockError {
    match err {
        LockError::Unavailable { .. } => {
            MutationMetrics::record_contended();
            tracing::debug!(%item_id, "Item lock busy");
            StockError::Locked { item_id }
        },
        other => StockError::LockService(other.to_string()),
    }
}

const fn record_snapshot(item: &StockItem) -> StockSnapshot {
    StockSnapshot {
        item_id: item.item_id,
        available: item.available,
        source: StockSource::Record,
    }
}

const fn outcome_label(result: &Result<StockItem, StockError>) -> &'static str {
    match result {
        Ok(_) => "committed",
        Err(err) => match err.kind() {
            ErrorKind::Contention => "locked",
            ErrorKind::InvariantViolation => "rejected",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Infrastructure => "failed",
        },
    }
}
