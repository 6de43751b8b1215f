//! Read-Through Cache
//!
//! Wraps a data-fetch function: a fresh cached value is returned as is,
//! otherwise the function runs, its result is stored with the TTL of the
//! requested [`CacheStrategy`], and returned.
//!
//! Failure policy:
//! - compute errors propagate to the caller and are never cached
//! - an unreachable backend on the read path counts as a miss
//! - a failed store is logged; the computed value is still returned
//! - cached bytes that no longer decode are treated as a miss
//!
//! With single-flight enabled (the default), concurrent misses for the same
//! key are coalesced: one caller computes, the others wait and then read the
//! stored value.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codecs::JsonCodec;
use crate::config::TtlConfig;
use crate::index::KeyIndex;
use crate::keys::CacheKey;
use crate::traits::{CacheBackend, CacheCodec};

/// RAII cleanup guard for in-flight request tracking
/// Ensures that entries are removed from `DashMap` even on early return or panic
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// TTL classes for cached read-models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Live-session polling data - 60 seconds
    Short,
    /// Default - 5 minutes
    Default,
    /// Aggregates and dashboard statistics - 10 minutes
    Stats,
    /// Long-lived read-models - 30 minutes
    Long,
    /// Slowly-changing lookups (tenant by domain) - 1 hour
    VeryLong,
    /// Custom TTL
    Custom(Duration),
}

impl CacheStrategy {
    /// Duration under the given TTL configuration
    pub fn ttl(&self, ttls: &TtlConfig) -> Duration {
        match self {
            Self::Short => ttls.short(),
            Self::Default => ttls.default_ttl(),
            Self::Stats => ttls.stats(),
            Self::Long => ttls.long(),
            Self::VeryLong => ttls.very_long(),
            Self::Custom(duration) => *duration,
        }
    }

    /// Duration under the default TTL configuration
    pub fn to_duration(&self) -> Duration {
        self.ttl(&TtlConfig::default())
    }
}

/// Read-through cache over a [`CacheBackend`]
pub struct ReadThroughCache<C: CacheCodec = JsonCodec> {
    backend: Arc<dyn CacheBackend>,
    index: Arc<KeyIndex>,
    /// Stored keys are indexed only for backends without prefix delete
    index_keys: bool,
    codec: C,
    ttls: TtlConfig,
    single_flight: bool,
    /// In-flight computations, keyed by rendered cache key
    in_flight_requests: Arc<DashMap<String, Arc<Mutex<()>>>>,
    /// Statistics
    total_requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    compute_errors: AtomicU64,
    backend_errors: AtomicU64,
    coalesced: AtomicU64,
}

impl ReadThroughCache<JsonCodec> {
    /// Create a read-through cache with the JSON codec and default TTLs
    pub fn new(backend: Arc<dyn CacheBackend>, index: Arc<KeyIndex>) -> Self {
        Self::with_codec(backend, index, JsonCodec)
    }
}

impl<C: CacheCodec> ReadThroughCache<C> {
    pub fn with_codec(backend: Arc<dyn CacheBackend>, index: Arc<KeyIndex>, codec: C) -> Self {
        let index_keys = !backend.supports_prefix_delete();
        debug!(
            backend = backend.name(),
            codec = codec.name(),
            index_keys = index_keys,
            "Initializing read-through cache"
        );
        Self {
            backend,
            index,
            index_keys,
            codec,
            ttls: TtlConfig::default(),
            single_flight: true,
            in_flight_requests: Arc::new(DashMap::new()),
            total_requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computes: AtomicU64::new(0),
            compute_errors: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_ttls(mut self, ttls: TtlConfig) -> Self {
        self.ttls = ttls;
        self
    }

    /// Enable or disable coalescing of concurrent misses
    #[must_use]
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn index(&self) -> &Arc<KeyIndex> {
        &self.index
    }

    pub fn ttl_for(&self, strategy: CacheStrategy) -> Duration {
        strategy.ttl(&self.ttls)
    }

    /// Get or compute a value
    ///
    /// # Cache Flow
    ///
    /// 1. Check the backend → decode if found
    /// 2. On miss, take the per-key in-flight lock (single-flight only) and check again
    /// 3. Execute `compute_fn` → encode → store with the strategy's TTL
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use tenant_cache::{CacheStrategy, DashMapCache, KeyIndex, ReadThroughCache};
    /// use tenant_cache::keys::{CacheDomain, build_key};
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let cache = ReadThroughCache::new(Arc::new(DashMapCache::new()), Arc::new(KeyIndex::new()));
    /// let key = build_key("T1", CacheDomain::Course, "C1", None)?;
    ///
    /// let title: String = cache
    ///     .get_or_compute(&key, CacheStrategy::Default, || async {
    ///         Ok::<_, anyhow::Error>("Intro to Rust".to_string())
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the error of `compute_fn` unchanged. Cache-layer failures are
    /// logged and never returned.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        strategy: CacheStrategy,
        compute_fn: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        // 1. Fast path, no locking
        if let Some(value) = self.lookup::<T>(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        // 2. Miss - coalesce with any computation already running for this key
        let _cleanup_guard;
        let _guard;
        if self.single_flight {
            let key_owned = key.as_str().to_string();
            let lock = self
                .in_flight_requests
                .entry(key_owned.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            _guard = lock.lock_owned().await;
            _cleanup_guard = CleanupGuard {
                map: &self.in_flight_requests,
                key: key_owned,
            };

            // Another request might have populated it while we were waiting
            if let Some(value) = self.lookup::<T>(key).await {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
        }

        // 3. Compute fresh data
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.computes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Computing fresh value");

        match compute_fn().await {
            Ok(value) => {
                if let Some(bytes) = self.encode(key, &value) {
                    self.store(key, &bytes, self.ttl_for(strategy)).await;
                }
                Ok(value)
            }
            Err(e) => {
                self.compute_errors.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Compute failed, nothing cached");
                Err(e)
            }
        }
    }

    /// Read a cached value without computing
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let value = self.lookup(key).await;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Store a value directly, e.g. after a write that already has the new read-model
    pub async fn set<T: Serialize + Sync + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        strategy: CacheStrategy,
    ) {
        if let Some(bytes) = self.encode(key, value) {
            self.store(key, &bytes, self.ttl_for(strategy)).await;
        }
    }

    /// Remove a single key
    pub async fn remove(&self, key: &CacheKey) {
        match self.backend.remove(key.as_str()).await {
            Ok(()) => self.index.forget(key),
            Err(e) => {
                self.backend_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to remove cache key");
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.backend.get(key.as_str()).await {
            Ok(Some(bytes)) => match self.codec.deserialize::<T>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value failed to decode, will recompute");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.backend_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    fn encode<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Option<Vec<u8>> {
        match self.codec.serialize(value) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode value for caching");
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, bytes: &[u8], ttl: Duration) {
        match self.backend.set_with_ttl(key.as_str(), bytes, ttl).await {
            // Only entries that actually exist are indexed
            Ok(()) if self.index_keys => self.index.record(key, ttl),
            Ok(()) => {}
            Err(e) => {
                self.backend_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Cache write failed, value not stored");
            }
        }
    }

    /// Get comprehensive cache statistics
    pub fn stats(&self) -> ReadThroughStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total_requests > 0 {
            (hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        ReadThroughStats {
            total_requests,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            compute_errors: self.compute_errors.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            in_flight_requests: self.in_flight_requests.len(),
            hit_rate,
        }
    }
}

/// Read-through cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ReadThroughStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub compute_errors: u64,
    pub backend_errors: u64,
    /// Misses answered by a concurrent computation
    pub coalesced: u64,
    pub in_flight_requests: usize,
    pub hit_rate: f64,
}
