//! Cache System Builder
//!
//! Wires a backend, the key index, the read-through cache, the manager and
//! the dispatcher into a [`CacheSystem`].
//!
//! # Example: Backend from configuration
//!
//! ```rust,no_run
//! use tenant_cache::{CacheConfig, CacheSystemBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystemBuilder::new()
//!         .with_config(CacheConfig::load()?)
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom backend
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenant_cache::CacheSystemBuilder;
//!
//! let cache = CacheSystemBuilder::new()
//!     .with_backend(Arc::new(MyCustomBackend::new()))
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::backends::DashMapCache;
use crate::cache_manager::CacheManager;
use crate::config::{BackendKind, CacheConfig};
use crate::dispatcher::InvalidationDispatcher;
use crate::index::KeyIndex;
use crate::keys::KeyBuilder;
use crate::read_through::ReadThroughCache;
use crate::traits::CacheBackend;
use crate::CacheSystem;

/// Builder for constructing `CacheSystem`
///
/// # Default Behavior
///
/// Without a custom backend, the builder creates the one named by
/// `config.backend`. Moka and Redis require their cargo features.
pub struct CacheSystemBuilder {
    config: CacheConfig,
    backend: Option<Arc<dyn CacheBackend>>,
}

impl CacheSystemBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            backend: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `backend` instead of the configured one
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the `CacheSystem`
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the configured backend is not
    /// compiled in, or Redis cannot be reached.
    pub async fn build(self) -> Result<CacheSystem> {
        self.config.validate()?;

        let backend = match self.backend {
            Some(backend) => {
                info!(backend = backend.name(), "Using custom cache backend");
                backend
            }
            None => Self::default_backend(&self.config).await?,
        };

        let config = self.config;
        let keys = KeyBuilder::new(config.namespace.clone());
        let index = Arc::new(KeyIndex::new());
        let cache = Arc::new(
            ReadThroughCache::new(Arc::clone(&backend), Arc::clone(&index))
                .with_ttls(config.ttl)
                .with_single_flight(config.single_flight),
        );
        let manager = Arc::new(CacheManager::new(
            Arc::clone(&backend),
            Arc::clone(&index),
            keys.clone(),
        ));
        let dispatcher = Arc::new(InvalidationDispatcher::new(Arc::clone(&manager)));

        info!(
            backend = backend.name(),
            namespace = %config.namespace,
            single_flight = config.single_flight,
            "Tenant cache system built"
        );

        Ok(CacheSystem {
            config,
            keys,
            index,
            cache,
            manager,
            dispatcher,
        })
    }

    async fn default_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
        match config.backend {
            BackendKind::Memory => Ok(Arc::new(DashMapCache::new())),
            #[cfg(feature = "moka")]
            BackendKind::Moka => Ok(Arc::new(crate::backends::MokaCache::new(config.moka))),
            #[cfg(feature = "redis")]
            BackendKind::Redis => {
                use anyhow::Context as _;

                let redis = crate::backends::RedisCache::with_url(&config.redis_url)
                    .await
                    .context("Failed to initialize Redis backend")?;
                Ok(Arc::new(redis))
            }
            #[allow(unreachable_patterns)]
            other => anyhow::bail!("backend {other:?} is not compiled in"),
        }
    }
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
