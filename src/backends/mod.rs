//! Cache Backend Implementations
//!
//! # Available Backends
//!
//! ## In-Process
//! - **`DashMap`** - Concurrent HashMap with server-side prefix delete (always available)
//! - **Moka** - Size-bounded cache with automatic eviction (feature: `moka`)
//!
//! ## Distributed
//! - **Redis** - Shared store with SCAN-based prefix delete (feature: `redis`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use tenant_cache::backends::{DashMapCache, MokaCache, RedisCache};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let local = DashMapCache::new();
//! let bounded = MokaCache::default();
//! let shared = RedisCache::with_url("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

pub mod dashmap_cache;

#[cfg(feature = "moka")]
pub mod moka_cache;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use dashmap_cache::DashMapCache;

#[cfg(feature = "moka")]
pub use moka_cache::MokaCache;

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
