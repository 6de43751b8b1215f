//! Error types
//!
//! Cache-layer failures are mostly absorbed inside the crate: a backend that
//! cannot be reached on the read path is a miss, a failed write or
//! invalidation is logged. Only [`CacheError::InvalidKey`] is meant to reach
//! callers, because a malformed key is a programming error.

use thiserror::Error;

/// Errors raised by the tenant cache layer
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key builder input is missing a required component
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// The key-value store could not be reached or rejected the command
    #[error("cache backend {backend} unavailable: {source}")]
    BackendUnavailable {
        backend: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A value could not be encoded or decoded by the configured codec
    #[error("codec {codec} failed: {source}")]
    Codec {
        codec: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Resolving the tenant or clearing keys failed
    #[error("cache invalidation failed for route '{route}': {reason}")]
    InvalidationFailure { route: String, reason: String },

    /// A write event carried an HTTP method outside the supported set
    #[error("unsupported HTTP method '{0}'")]
    UnsupportedMethod(String),

    /// The backend does not implement an optional capability
    #[error("cache backend {backend} does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Configuration could not be loaded or failed validation
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Wrap a backend client error
    pub fn backend(backend: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::BackendUnavailable {
            backend,
            source: source.into(),
        }
    }

    /// Wrap a codec error
    pub fn codec(codec: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Codec {
            codec,
            source: source.into(),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CacheError>;
