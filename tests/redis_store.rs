//! Runs against a live Redis (or Valkey). Start one and run with
//! `REDIS_URL=redis://localhost:6379 cargo test --test redis_store -- --ignored --test-threads=1`.

use rinha_gateway::{
    HealthStorage, LedgerEntry, MetricsStore, PaymentQueue, PaymentRecord, ProcessorChoice,
    RedisStore, StoreError,
};
use rust_decimal_macros::dec;
use std::time::Duration;

async fn connect(capacity: usize) -> RedisStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let store = RedisStore::connect(&url, capacity).await.unwrap();
    PaymentQueue::purge(&store).await.unwrap();
    MetricsStore::purge(&store).await.unwrap();
    HealthStorage::purge(&store).await.unwrap();
    store
}

fn entry(id: &str, cents: i64, is_default: bool, at: i64) -> LedgerEntry {
    LedgerEntry {
        correlation_id: id.to_string(),
        amount_cents: cents,
        is_default,
        committed_at_millis: at,
    }
}

#[tokio::test]
#[ignore]
async fn test_queue_capacity_and_order() {
    let store = connect(2).await;
    let first = PaymentRecord::new("r-1", dec!(10.00)).unwrap();
    let second = PaymentRecord::new("r-2", dec!(20.00)).unwrap();

    store.enqueue(first.clone()).await.unwrap();
    store.enqueue(second.clone()).await.unwrap();
    let rejected = store
        .enqueue(PaymentRecord::new("r-3", dec!(1.00)).unwrap())
        .await;
    assert!(matches!(rejected, Err(StoreError::QueueFull)));

    store.requeue(PaymentRecord::new("r-4", dec!(1.00)).unwrap()).await.unwrap();
    assert_eq!(store.len().await.unwrap(), 3);

    let popped = store.dequeue(Duration::from_millis(100)).await.unwrap();
    assert_eq!(popped, Some(first));
    let popped = store.dequeue(Duration::from_millis(100)).await.unwrap();
    assert_eq!(popped, Some(second));
}

#[tokio::test]
#[ignore]
async fn test_empty_dequeue_times_out() {
    let store = connect(10).await;
    let popped = store.dequeue(Duration::from_millis(50)).await.unwrap();
    assert_eq!(popped, None);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_record_overwrites_and_totals_match_scan() {
    let store = connect(10).await;

    store.record(entry("m-1", 1990, true, 1_000)).await.unwrap();
    store.record(entry("m-2", 500, false, 2_000)).await.unwrap();
    store.record(entry("m:3", 250, true, 3_000)).await.unwrap();
    // m-1 moves to fallback with a new amount
    store.record(entry("m-1", 1000, false, 4_000)).await.unwrap();

    let totals = store.summary().await.unwrap();
    let scanned = store.summary_in_range(i64::MIN, i64::MAX).await.unwrap();
    assert_eq!(totals, scanned);
    assert_eq!(totals.default.total_requests, 1);
    assert_eq!(totals.default.total_amount, dec!(2.50));
    assert_eq!(totals.fallback.total_requests, 2);
    assert_eq!(totals.fallback.total_amount, dec!(15.00));

    let window = store.summary_in_range(2_000, 3_000).await.unwrap();
    assert_eq!(window.fallback.total_requests, 1);
    assert_eq!(window.default.total_requests, 1);

    MetricsStore::purge(&store).await.unwrap();
    assert_eq!(store.summary().await.unwrap(), Default::default());
}

#[tokio::test]
#[ignore]
async fn test_lock_lease_and_published_decision() {
    let store = connect(10).await;

    assert!(store.try_acquire_lock("a", Duration::from_secs(5)).await.unwrap());
    assert!(!store.try_acquire_lock("b", Duration::from_secs(5)).await.unwrap());

    store.release_lock("b").await.unwrap();
    assert!(!store.try_acquire_lock("b", Duration::from_secs(5)).await.unwrap());

    store.release_lock("a").await.unwrap();
    assert!(store.try_acquire_lock("b", Duration::from_millis(50)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(store.try_acquire_lock("c", Duration::from_secs(5)).await.unwrap());
    store.release_lock("c").await.unwrap();

    store.publish_processor(ProcessorChoice::Fallback).await.unwrap();
    assert_eq!(
        store.published_processor().await.unwrap(),
        Some(ProcessorChoice::Fallback)
    );
    HealthStorage::purge(&store).await.unwrap();
    assert_eq!(store.published_processor().await.unwrap(), None);
}
