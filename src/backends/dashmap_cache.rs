//! `DashMap` Cache - Concurrent `HashMap` Backend
//!
//! A lightweight in-process backend using `DashMap` for concurrent access.
//! It can enumerate its own keys, so it implements prefix delete directly
//! and tenant-scoped invalidation never needs the secondary key index.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::Result;

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// Fresh while `now <= stored_at + ttl`
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// Simple concurrent cache using `DashMap`
///
/// **Features**:
/// - Lock-free concurrent reads/writes
/// - Passive TTL expiry on read
/// - Server-side prefix delete
///
/// **Limitations**:
/// - No size limits (unbounded growth)
/// - Expired entries linger until read or [`cleanup_expired`](Self::cleanup_expired)
/// - Process-local: not shared between instances
///
/// **Example**:
/// ```rust
/// use tenant_cache::backends::DashMapCache;
/// use tenant_cache::traits::CacheBackend;
/// use std::time::Duration;
///
/// # async fn example() -> tenant_cache::Result<()> {
/// let cache = DashMapCache::new();
///
/// cache.set_with_ttl("lms:T1:course:C1:", b"{}", Duration::from_secs(60)).await?;
/// assert_eq!(cache.get("lms:T1:course:C1:").await?, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
pub struct DashMapCache {
    /// Concurrent `HashMap`
    map: Arc<DashMap<String, CacheEntry>>,
}

impl DashMapCache {
    /// Create new `DashMap` cache
    pub fn new() -> Self {
        info!("Initializing DashMap Cache (concurrent HashMap)");

        Self {
            map: Arc::new(DashMap::new()),
        }
    }

    /// Cleanup expired entries (should be called periodically)
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[DashMap] Cleaned up expired entries");
        }
        removed
    }

    /// Whether a live (non-expired) entry exists for `key`
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.get(key).is_some_and(|entry| !entry.is_expired())
    }

    /// Get current cache size
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for DashMapCache {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

/// Implement `CacheBackend` trait for `DashMapCache`
#[async_trait]
impl CacheBackend for DashMapCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.map.get(key) {
            if entry.is_expired() {
                drop(entry); // Release read lock
                self.map.remove(key);
                Ok(None)
            } else {
                Ok(Some(entry.value.clone()))
            }
        } else {
            Ok(None)
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value.to_vec(), ttl);
        self.map.insert(key.to_string(), entry);
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[DashMap] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn supports_prefix_delete(&self) -> bool {
        true
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        self.map.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        debug!(prefix = %prefix, count = removed, "[DashMap] Removed keys by prefix");
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        let test_key = "health_check_dashmap";
        let test_value = b"health_check_value";

        match self
            .set_with_ttl(test_key, test_value, Duration::from_secs(60))
            .await
        {
            Ok(()) => match self.get(test_key).await {
                Ok(Some(retrieved)) => {
                    let _ = self.remove(test_key).await;
                    retrieved == test_value
                }
                _ => false,
            },
            Err(_) => false,
        }
    }

    fn name(&self) -> &'static str {
        "DashMap"
    }
}
