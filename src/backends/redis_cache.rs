//! Redis Cache - Distributed Cache Backend
//!
//! Redis-backed store shared by every application instance. Redis can
//! enumerate keys server-side, so prefix invalidation is a `SCAN MATCH` +
//! `DEL` loop rather than a lookup in the local key index.

use anyhow::Context;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{CacheError, Result};

const BACKEND: &str = "Redis";

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 200;

/// Redis distributed cache with `ConnectionManager` for automatic reconnection
pub struct RedisCache {
    /// Redis connection manager - handles reconnection automatically
    conn_manager: ConnectionManager,
}

impl RedisCache {
    /// Create new Redis cache, reading `REDIS_URL` (default `redis://127.0.0.1:6379`)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn new() -> anyhow::Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url).await
    }

    /// Create new Redis cache with custom URL
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn with_url(redis_url: &str) -> anyhow::Result<Self> {
        info!(redis_url = %redis_url, "Initializing Redis Cache with ConnectionManager");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection manager")?;

        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis Cache connected successfully");

        Ok(Self { conn_manager })
    }

    /// Scan keys starting with `prefix`
    ///
    /// Uses the cursor-based SCAN command, safe for production use unlike KEYS.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis command fails.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::backend(BACKEND, e))?;

            cursor = next;
            keys.extend(batch);

            // Cursor 0 means iteration is complete
            if cursor == 0 {
                break;
            }
        }

        debug!(prefix = %prefix, count = keys.len(), "[Redis] Scanned keys by prefix");
        Ok(keys)
    }
}

/// Escape Redis glob metacharacters so a prefix matches literally
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();

        conn.get(key)
            .await
            .map_err(|e| CacheError::backend(BACKEND, e))
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let _: () = conn
            .pset_ex(key, value, millis)
            .await
            .map_err(|e| CacheError::backend(BACKEND, e))?;
        debug!(key = %key, ttl_ms = millis, "[Redis] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| CacheError::backend(BACKEND, e))?;
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn_manager.clone();
        let count: usize = conn
            .del(keys)
            .await
            .map_err(|e| CacheError::backend(BACKEND, e))?;
        debug!(count = count, "[Redis] Removed keys in bulk");
        Ok(count)
    }

    fn supports_prefix_delete(&self) -> bool {
        true
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.scan_prefix(prefix).await?;
        let mut removed = 0;
        for chunk in keys.chunks(SCAN_BATCH) {
            removed += self.remove_many(chunk).await?;
        }
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        let test_key = "health_check_redis";
        let test_value = vec![1, 2, 3, 4];

        match self
            .set_with_ttl(test_key, &test_value, Duration::from_secs(10))
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
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("lms:T1:course:"), "lms:T1:course:");
        assert_eq!(escape_glob("lms:T[1]*?:"), "lms:T\\[1\\]\\*\\?:");
        assert_eq!(escape_glob("a\\b"), "a\\\\b");
    }
}
