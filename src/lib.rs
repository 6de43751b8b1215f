//! Tenant Cache
//!
//! Tenant-scoped caching for a multi-tenant learning platform:
//! - **Key Builder**: deterministic `ns:tenant:domain:subject:qualifier` keys
//! - **Read-Through Cache**: `get_or_compute` with per-key stampede protection
//! - **Key Index**: prefix invalidation on backends that cannot enumerate keys
//! - **Cache Manager**: one clear operation per domain, always tenant-bounded
//! - **Invalidation Dispatcher**: maps completed writes onto cache clears
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tenant_cache::{CacheStrategy, CacheSystem, EntityChange, TenantContext, TenantId};
//! use tenant_cache::keys::CacheDomain;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystem::new().await?;
//!     let tenant = TenantId::new("acme")?;
//!
//!     // Read through
//!     let key = cache.key(&tenant, CacheDomain::Course, "C1", Some("stats"))?;
//!     let enrolled: u64 = cache
//!         .cache()
//!         .get_or_compute(&key, CacheStrategy::Stats, || async { Ok::<_, anyhow::Error>(42) })
//!         .await?;
//!
//!     // After a write, report what changed
//!     cache
//!         .dispatcher()
//!         .invalidate(&TenantContext::new(tenant), &[EntityChange::course("C1")])
//!         .await;
//!
//!     tracing::info!(enrolled, "done");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! read:   KeyBuilder → ReadThroughCache → CacheBackend (DashMap | Moka | Redis)
//!                                       ↘ KeyIndex (stored keys, backends without prefix delete)
//! write:  InvalidationDispatcher → CacheManager → CacheBackend prefix delete
//!                                               ↘ KeyIndex when the backend has none
//! ```

use std::sync::Arc;

use tracing::{info, warn};

pub mod backends;
pub mod builder;
pub mod cache_manager;
pub mod codecs;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod index;
pub mod invalidation;
pub mod keys;
pub mod read_through;
pub mod telemetry;
pub mod tenant;
pub mod traits;

pub use backends::DashMapCache;

#[cfg(feature = "moka")]
pub use backends::MokaCache;

#[cfg(feature = "redis")]
pub use backends::RedisCache;

pub use builder::CacheSystemBuilder;
pub use cache_manager::{CacheManager, CacheManagerStats, InvalidationOutcome};
pub use codecs::JsonCodec;
pub use config::{BackendKind, CacheConfig, TtlConfig};
pub use dispatcher::{HttpMethod, InvalidationDispatcher, InvalidationRule, WriteEvent};
pub use error::{CacheError, Result};
pub use index::{IndexedKey, KeyIndex};
pub use invalidation::{EntityChange, InvalidationTarget};
pub use keys::{CacheDomain, CacheKey, KeyBuilder, TenantId, build_key, hash_filters};
pub use read_through::{CacheStrategy, ReadThroughCache, ReadThroughStats};
pub use tenant::{TenantContext, TenantSource};
pub use traits::{CacheBackend, CacheCodec};

// Re-export async_trait for backend implementors
pub use async_trait::async_trait;

/// Main entry point for the tenant cache
///
/// Holds one backend shared by the read-through cache and the invalidation
/// side, so every clear reaches the entries that reads produced.
///
/// # Example
///
/// ```rust,no_run
/// use tenant_cache::CacheSystem;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let cache = CacheSystem::new().await?;
///     let stats = cache.cache().stats();
///     println!("hit rate {:.1}%", stats.hit_rate);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CacheSystem {
    config: CacheConfig,
    keys: KeyBuilder,
    index: Arc<KeyIndex>,
    cache: Arc<ReadThroughCache>,
    manager: Arc<CacheManager>,
    dispatcher: Arc<InvalidationDispatcher>,
}

impl CacheSystem {
    /// Create a cache system from defaults and the environment
    ///
    /// See [`CacheConfig::load`] for the variables read.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the backend cannot be created.
    pub async fn new() -> anyhow::Result<Self> {
        info!("Initializing tenant cache system");
        Self::with_config(CacheConfig::load()?).await
    }

    /// Create a cache system from an explicit configuration
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the backend cannot be created.
    pub async fn with_config(config: CacheConfig) -> anyhow::Result<Self> {
        CacheSystemBuilder::new().with_config(config).build().await
    }

    /// Build a key under this system's namespace
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] when the tenant id is empty.
    pub fn key(
        &self,
        tenant: &TenantId,
        domain: CacheDomain,
        subject: &str,
        qualifier: Option<&str>,
    ) -> Result<CacheKey> {
        self.keys.build(tenant, domain, subject, qualifier)
    }

    /// Check that the backend answers
    pub async fn health_check(&self) -> bool {
        let backend = self.cache.backend();
        let healthy = backend.health_check().await;
        if healthy {
            info!(backend = backend.name(), "Tenant cache health check passed");
        } else {
            warn!(backend = backend.name(), "Tenant cache health check failed");
        }
        healthy
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn index(&self) -> &Arc<KeyIndex> {
        &self.index
    }

    /// Read-through cache (read path)
    pub fn cache(&self) -> &Arc<ReadThroughCache> {
        &self.cache
    }

    /// Cache manager (per-domain clears)
    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// Invalidation dispatcher (write path)
    pub fn dispatcher(&self) -> &Arc<InvalidationDispatcher> {
        &self.dispatcher
    }
}
