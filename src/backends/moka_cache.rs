//! Moka Cache - In-Memory Cache Backend
//!
//! Size-bounded in-process cache using Moka. Entries can be evicted before
//! their TTL when capacity is reached. Moka does not enumerate keys by
//! prefix, so prefix invalidation for this backend goes through the
//! [`KeyIndex`](crate::index::KeyIndex).

use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::MokaCacheConfig;
use crate::error::Result;

/// Cache entry with TTL information
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Vec<u8>>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Moka in-memory cache with per-key TTL support
///
/// - Fast in-memory access
/// - Automatic eviction (`TinyLFU`) once `max_capacity` is reached
/// - Per-key TTL, with the configured `time_to_live` as a safety net
pub struct MokaCache {
    /// Moka cache instance
    cache: Cache<String, CacheEntry>,
}

impl MokaCache {
    /// Create new Moka cache
    pub fn new(config: MokaCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.time_to_live_secs))
            .build();

        info!(
            capacity = config.max_capacity,
            max_ttl_secs = config.time_to_live_secs,
            "Moka Cache initialized with per-key TTL support"
        );

        Self { cache }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(MokaCacheConfig::default())
    }
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

/// Implement `CacheBackend` trait for `MokaCache`
#[async_trait]
impl CacheBackend for MokaCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.cache.get(key).await {
            if entry.is_expired() {
                self.cache.remove(key).await;
                Ok(None)
            } else {
                Ok(Some(entry.value.as_ref().clone()))
            }
        } else {
            Ok(None)
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value.to_vec(), ttl);
        self.cache.insert(key.to_string(), entry).await;
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[Moka] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.cache.remove(key).await;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let test_key = "health_check_moka";
        let test_value = br#"{"test":true}"#;

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
        "Moka"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_moka_round_trip_and_expiry() {
        let cache = MokaCache::default();
        assert!(!cache.supports_prefix_delete());

        cache
            .set_with_ttl("k", b"value", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_prefix_delete_is_unsupported() {
        let cache = MokaCache::default();
        assert!(cache.remove_by_prefix("lms:T1:").await.is_err());
        assert!(cache.health_check().await);
    }
}
