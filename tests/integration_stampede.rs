//! Integration tests for stampede protection
//!
//! Tests concurrent access patterns and request coalescing

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use common::*;
use tenant_cache::keys::CacheDomain;
use tenant_cache::{
    CacheStrategy, DashMapCache, KeyIndex, ReadThroughCache, TenantId, build_key,
};
use tokio::task::JoinSet;

/// Test stampede protection with concurrent requests
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cache_miss() {
    let cache = setup_cache_system(Arc::new(RecordingBackend::new())).await;
    let key = cache
        .key(&TenantId::new("T1").unwrap(), CacheDomain::Dashboard, "", Some("stats"))
        .unwrap();
    let compute_count = Arc::new(AtomicU32::new(0));

    // Spawn 100 concurrent requests for same key
    let mut tasks = JoinSet::new();
    for _ in 0..100 {
        let cache = cache.clone();
        let key = key.clone();
        let counter = Arc::clone(&compute_count);

        tasks.spawn(async move {
            cache
                .cache()
                .get_or_compute(&key, CacheStrategy::Stats, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, anyhow::Error>(1234u64)
                })
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        let value = result
            .unwrap_or_else(|_| panic!("Task panicked"))
            .unwrap_or_else(|_| panic!("Compute failed"));
        assert_eq!(value, 1234);
    }

    // Stampede protection: only ONE compute should have happened
    let compute_calls = compute_count.load(Ordering::SeqCst);
    assert_eq!(
        compute_calls, 1,
        "Expected exactly 1 compute call, got {compute_calls}",
    );

    let stats = cache.cache().stats();
    assert_eq!(stats.computes, 1);
    assert_eq!(stats.in_flight_requests, 0);
}

/// Different keys must not wait on each other
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_compute_independently() {
    let cache = setup_cache_system(Arc::new(RecordingBackend::new())).await;
    let compute_count = Arc::new(AtomicU32::new(0));

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let cache = cache.clone();
        let counter = Arc::clone(&compute_count);
        tasks.spawn(async move {
            let key = build_key("T1", CacheDomain::Course, format!("C{i}"), None).unwrap();
            cache
                .cache()
                .get_or_compute(&key, CacheStrategy::Default, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(i)
                })
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        result
            .unwrap_or_else(|_| panic!("Task panicked"))
            .unwrap_or_else(|_| panic!("Compute failed"));
    }

    assert_eq!(compute_count.load(Ordering::SeqCst), 10);
}

/// Without single-flight every concurrent miss computes; the last write wins
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_disabled() {
    let cache = Arc::new(
        ReadThroughCache::new(Arc::new(DashMapCache::new()), Arc::new(KeyIndex::new()))
            .with_single_flight(false),
    );
    let key = build_key("T1", CacheDomain::Progress, "U1", None).unwrap();
    let compute_count = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(4));

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        let counter = Arc::clone(&compute_count);
        let barrier = Arc::clone(&barrier);
        tasks.spawn(async move {
            cache
                .get_or_compute(&key, CacheStrategy::Short, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // Hold every compute open until all callers have missed
                    barrier.wait().await;
                    Ok::<_, anyhow::Error>(7u8)
                })
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        result
            .unwrap_or_else(|_| panic!("Task panicked"))
            .unwrap_or_else(|_| panic!("Compute failed"));
    }

    assert_eq!(compute_count.load(Ordering::SeqCst), 4);
    assert_eq!(cache.get::<u8>(&key).await, Some(7));
}

/// A failed compute releases the in-flight slot so the next caller can retry
#[tokio::test]
async fn test_failed_compute_releases_lock() {
    let cache = setup_cache_system(Arc::new(RecordingBackend::new())).await;
    let key = build_key("T1", CacheDomain::Certificate, "U1", None).unwrap();

    let failed = cache
        .cache()
        .get_or_compute(&key, CacheStrategy::Default, || async {
            Err::<String, _>("renderer offline")
        })
        .await;
    assert!(failed.is_err());
    assert_eq!(cache.cache().stats().in_flight_requests, 0);

    let value = cache
        .cache()
        .get_or_compute(&key, CacheStrategy::Default, || async {
            Ok::<_, &str>("pdf".to_string())
        })
        .await
        .unwrap();
    assert_eq!(value, "pdf");
}
