//! Cache Backend Traits
//!
//! This module defines the trait abstractions the tenant cache is built on.
//!
//! # Architecture
//!
//! - `CacheCodec`: Trait for pluggable serialization backends
//! - `CacheBackend`: Core trait for key-value stores holding cache entries,
//!   including the optional server-side prefix delete capability
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use tenant_cache::{CacheBackend, async_trait};
//! use std::time::Duration;
//!
//! struct MyCustomCache {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl CacheBackend for MyCustomCache {
//!     async fn get(&self, key: &str) -> tenant_cache::Result<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> tenant_cache::Result<()> {
//!         // Your implementation
//!     }
//!
//!     async fn remove(&self, key: &str) -> tenant_cache::Result<()> {
//!         // Your implementation
//!     }
//!
//!     async fn health_check(&self) -> bool {
//!         // Your implementation
//!     }
//! }
//! ```
//!
//! Backends that cannot enumerate keys leave `supports_prefix_delete` at
//! `false`; prefix invalidation then goes through the
//! [`KeyIndex`](crate::index::KeyIndex).

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Trait for cache value serialization/deserialization
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` to support concurrent access across async tasks
/// and provide debugging capabilities.
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Codec`] if the value cannot be encoded.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Codec`] if the bytes do not decode to `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Name of the codec, used for logging
    fn name(&self) -> &'static str;
}

/// Key-value store holding tenant cache entries
///
/// # Required Operations
///
/// - `get`: Retrieve a value by key
/// - `set_with_ttl`: Store a value with a time-to-live
/// - `remove`: Delete a value by key
/// - `health_check`: Verify cache backend is operational
///
/// # Failure Semantics
///
/// Connectivity problems are reported as [`CacheError::BackendUnavailable`].
/// Callers in this crate treat them as a miss on the read path and log them
/// on the write and invalidation paths.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get value from cache by key
    ///
    /// # Returns
    ///
    /// * `Ok(Some(value))` - Value found and not expired
    /// * `Ok(None)` - Key not found or expired
    /// * `Err(e)` - Backend unreachable
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set value in cache with time-to-live
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Remove value from cache (succeeds if the key did not exist)
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove several keys; returns how many were requested
    async fn remove_many(&self, keys: &[String]) -> Result<usize> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(keys.len())
    }

    /// Whether `remove_by_prefix` is implemented server-side
    fn supports_prefix_delete(&self) -> bool {
        false
    }

    /// Remove every key starting with `prefix`; returns the number removed
    ///
    /// Only meaningful when [`supports_prefix_delete`](Self::supports_prefix_delete)
    /// returns `true`.
    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        let _ = prefix;
        Err(CacheError::Unsupported {
            backend: self.name(),
            operation: "prefix delete",
        })
    }

    /// Check if cache backend is healthy
    async fn health_check(&self) -> bool;

    /// Get the name of this cache backend
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
