//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Backends that record deletes, fail on demand or panic
//! - Cache system setup over those backends
//! - Test data generators

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tenant_cache::{
    CacheBackend, CacheError, CacheSystem, CacheSystemBuilder, DashMapCache, Result, async_trait,
};

/// In-memory backend that records every delete it receives
#[derive(Default)]
pub struct RecordingBackend {
    inner: DashMapCache,
    prefix_delete: bool,
    deletes: AtomicUsize,
    deleted_keys: Mutex<Vec<String>>,
    deleted_prefixes: Mutex<Vec<String>>,
}

impl RecordingBackend {
    /// Backend with server-side prefix delete
    pub fn new() -> Self {
        Self {
            prefix_delete: true,
            ..Self::default()
        }
    }

    /// Backend that can only delete exact keys, forcing index-backed clears
    pub fn without_prefix_delete() -> Self {
        Self::default()
    }

    /// Number of delete calls of any kind
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted_keys.lock().clone()
    }

    pub fn deleted_prefixes(&self) -> Vec<String> {
        self.deleted_prefixes.lock().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.deleted_keys.lock().push(key.to_string());
        self.inner.remove(key).await
    }

    fn supports_prefix_delete(&self) -> bool {
        self.prefix_delete
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        if !self.prefix_delete {
            return Err(CacheError::Unsupported {
                backend: "Recording",
                operation: "prefix delete",
            });
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.deleted_prefixes.lock().push(prefix.to_string());
        self.inner.remove_by_prefix(prefix).await
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Recording"
    }
}

/// Backend whose reads, writes or deletes fail while the matching switch is on
#[derive(Default)]
pub struct FlakyBackend {
    inner: DashMapCache,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    fn unavailable() -> CacheError {
        CacheError::backend("Flaky", anyhow::anyhow!("connection refused"))
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.remove(key).await
    }

    async fn health_check(&self) -> bool {
        !self.fail_reads.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "Flaky"
    }
}

/// Backend that panics on any delete
#[derive(Default)]
pub struct PanickingBackend {
    inner: DashMapCache,
}

#[async_trait]
impl CacheBackend for PanickingBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        panic!("backend exploded during remove")
    }

    fn supports_prefix_delete(&self) -> bool {
        true
    }

    async fn remove_by_prefix(&self, _prefix: &str) -> Result<usize> {
        panic!("backend exploded during prefix delete")
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Build a cache system over `backend` with default configuration
pub async fn setup_cache_system(backend: Arc<dyn CacheBackend>) -> CacheSystem {
    CacheSystemBuilder::new()
        .with_backend(backend)
        .build()
        .await
        .unwrap_or_else(|e| panic!("Failed to build cache system: {e}"))
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct CourseStats {
        pub course_id: String,
        pub enrolled: u64,
        pub completion_rate: f64,
    }

    impl CourseStats {
        pub fn new(course_id: &str, enrolled: u64) -> Self {
            Self {
                course_id: course_id.to_string(),
                enrolled,
                completion_rate: 0.5,
            }
        }
    }
}
