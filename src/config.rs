//! Configuration
//!
//! Precedence (lowest to highest):
//! 1. Programmatic defaults
//! 2. Optional YAML file
//! 3. `REDIS_URL` (kept for compatibility with existing deployments)
//! 4. `TENANT_CACHE_*` environment variables, `__` separating nested keys
//!    (e.g. `TENANT_CACHE_TTL__STATS=900`)

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::keys::DEFAULT_NAMESPACE;

/// Which key-value store backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process `DashMap`
    #[default]
    Memory,
    /// In-process, size-bounded Moka cache
    Moka,
    /// Shared Redis instance
    Redis,
}

/// Configuration for `MokaCache`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MokaCacheConfig {
    /// Max number of entries
    pub max_capacity: u64,
    /// Upper bound on any entry's lifetime, in seconds
    pub time_to_live_secs: u64,
}

impl Default for MokaCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            time_to_live_secs: 3600,
        }
    }
}

/// Durations, in seconds, behind each [`CacheStrategy`](crate::CacheStrategy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Live-session polling data
    pub short: u64,
    pub default: u64,
    /// Aggregates and dashboard statistics
    pub stats: u64,
    pub long: u64,
    /// Slowly-changing lookups such as tenant-by-domain
    pub very_long: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            short: 60,
            default: 300,
            stats: 600,
            long: 1800,
            very_long: 3600,
        }
    }
}

impl TtlConfig {
    pub fn short(&self) -> Duration {
        Duration::from_secs(self.short)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default)
    }

    pub fn stats(&self) -> Duration {
        Duration::from_secs(self.stats)
    }

    pub fn long(&self) -> Duration {
        Duration::from_secs(self.long)
    }

    pub fn very_long(&self) -> Duration {
        Duration::from_secs(self.very_long)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Tenant cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// First component of every cache key
    pub namespace: String,
    pub backend: BackendKind,
    pub redis_url: String,
    pub moka: MokaCacheConfig,
    pub ttl: TtlConfig,
    /// Coalesce concurrent misses for the same key into one compute
    pub single_flight: bool,
    pub logging: LoggingConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            backend: BackendKind::default(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            moka: MokaCacheConfig::default(),
            ttl: TtlConfig::default(),
            single_flight: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load from defaults and the environment
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if extraction or validation fails.
    pub fn load() -> Result<Self> {
        Self::extract(Self::figment())
    }

    /// Load from defaults, a YAML file, then the environment
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if extraction or validation fails.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::raw().only(&["REDIS_URL"]))
            .merge(Env::prefixed("TENANT_CACHE_").split("__"));
        Self::extract(figment)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::raw().only(&["REDIS_URL"]))
            .merge(Env::prefixed("TENANT_CACHE_").split("__"))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would produce unusable keys or entries
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(CacheError::Config("namespace cannot be empty".to_string()));
        }

        let ttls = [
            ("short", self.ttl.short),
            ("default", self.ttl.default),
            ("stats", self.ttl.stats),
            ("long", self.ttl.long),
            ("very_long", self.ttl.very_long),
        ];
        if let Some((name, _)) = ttls.iter().find(|(_, secs)| *secs == 0) {
            return Err(CacheError::Config(format!("ttl.{name} must be positive")));
        }

        if self.backend == BackendKind::Moka && self.moka.max_capacity == 0 {
            return Err(CacheError::Config(
                "moka.max_capacity must be at least 1".to_string(),
            ));
        }

        if self.backend == BackendKind::Redis && self.redis_url.trim().is_empty() {
            return Err(CacheError::Config(
                "redis_url is required for the redis backend".to_string(),
            ));
        }

        Ok(())
    }
}
