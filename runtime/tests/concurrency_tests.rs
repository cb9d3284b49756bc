//! Concurrency properties of the engine.
//!
//! Many tasks hammer the same item on a multi-threaded runtime; whatever the
//! interleaving, stock never goes negative, every acknowledged decrement is
//! reflected exactly once, and the counter ends equal to the record.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::Harness;
use futures::future::join_all;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stockline_core::error::StockError;
use stockline_core::item::ItemId;
use stockline_core::stock::Version;
use stockline_runtime::EngineConfig;
use stockline_testing::properties::{decrement_burst, initial_stock, signed_deltas};

const ITEM: i64 = 1;

fn patient_config() -> EngineConfig {
    EngineConfig::builder()
        .lease_duration(Duration::from_secs(10))
        .wait_timeout(Duration::from_secs(5))
        .build()
}

fn multi_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn concurrent_decrements_never_oversell(initial in initial_stock(), burst in decrement_burst()) {
        let runtime = multi_thread_runtime();
        let (committed, final_available, final_cached, final_version) = runtime.block_on(async {
            let h = Harness::new().with_item(ITEM, initial);
            let engine = Arc::new(h.engine_with(patient_config()));

            let tasks = burst.iter().map(|&qty| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { (qty, engine.decrement(ItemId::new(ITEM), qty).await) })
            });
            let mut committed = Vec::new();
            for joined in join_all(tasks).await {
                let (qty, result) = joined.unwrap();
                match result {
                    Ok(_) => committed.push(qty),
                    Err(StockError::InsufficientStock { .. }) => {},
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            let record = h.records.get(ItemId::new(ITEM)).unwrap();
            (committed, record.available.value(), h.cached(ITEM), record.version)
        });

        let taken: i64 = committed.iter().sum();
        prop_assert!(taken <= i64::from(initial));
        prop_assert_eq!(i64::from(final_available), i64::from(initial) - taken);
        prop_assert_eq!(final_cached, Some(i64::from(final_available)));
        prop_assert_eq!(final_version, Version::new(committed.len() as u64));
    }

    #[test]
    fn sequential_deltas_match_a_simple_model(deltas in signed_deltas()) {
        let runtime = multi_thread_runtime();
        let (model, record, cached) = runtime.block_on(async {
            let h = Harness::new().with_item(ITEM, 10);
            let engine = h.engine();
            let mut model: i64 = 10;

            for delta in &deltas {
                let result = if *delta < 0 {
                    engine.decrement(ItemId::new(ITEM), -delta).await
                } else {
                    engine.increment(ItemId::new(ITEM), *delta).await
                };
                match result {
                    Ok(_) => model += delta,
                    Err(StockError::InsufficientStock { .. }) => assert!(model + delta < 0),
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            (model, i64::from(h.available(ITEM).unwrap()), h.cached(ITEM))
        });

        prop_assert!(model >= 0);
        prop_assert_eq!(record, model);
        prop_assert_eq!(cached, Some(model));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_the_available_units_are_sold() {
    let h = Harness::new().with_item(ITEM, 25);
    let engine = Arc::new(h.engine_with(patient_config()));
    let sold = Arc::new(AtomicUsize::new(0));

    let tasks = (0..60).map(|_| {
        let engine = Arc::clone(&engine);
        let sold = Arc::clone(&sold);
        tokio::spawn(async move {
            if engine.decrement(ItemId::new(ITEM), 1).await.is_ok() {
                sold.fetch_add(1, Ordering::SeqCst);
            }
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap();
    }

    assert_eq!(sold.load(Ordering::SeqCst), 25);
    assert_eq!(h.available(ITEM), Some(0));
    assert_eq!(h.cached(ITEM), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_items_do_not_contend() {
    let h = Harness::new().with_item(1, 5).with_item(2, 5);
    h.records.set_write_delay(Duration::from_millis(100));
    let engine = Arc::new(h.engine());

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.decrement(ItemId::new(1), 1).await })
    };
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.decrement(ItemId::new(2), 1).await })
    };

    // Each write takes longer than the 50ms lock wait; separate locks mean neither waits.
    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_wait_turns_contention_into_locked() {
    let h = Harness::new().with_item(ITEM, 5);
    h.records.set_write_delay(Duration::from_millis(150));
    let engine = Arc::new(h.engine());

    let slow = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.decrement(ItemId::new(ITEM), 1).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = engine.decrement(ItemId::new(ITEM), 1).await.unwrap_err();

    assert_eq!(err, StockError::Locked { item_id: ItemId::new(ITEM) });
    assert!(slow.await.unwrap().is_ok());
    assert_eq!(h.available(ITEM), Some(4));
}
