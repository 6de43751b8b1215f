//! Cache Manager - Tenant-Scoped Invalidation
//!
//! One clear operation per domain, all backed by the table in
//! [`invalidation`](crate::invalidation). Exact targets are removed by key.
//! Prefix targets use the backend's server-side prefix delete when it has
//! one, and the [`KeyIndex`] otherwise.
//!
//! Clearing never fails from the caller's point of view: backend errors are
//! logged and counted, and the remaining targets are still processed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::index::KeyIndex;
use crate::invalidation::{EntityChange, ResolvedTarget};
use crate::keys::{KeyBuilder, TenantId};
use crate::traits::CacheBackend;

/// Result of applying one entity change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationOutcome {
    /// Keys reported removed by the backend
    pub removed: usize,
    /// Targets that could not be cleared
    pub failures: usize,
}

impl InvalidationOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Cache Manager - Unified invalidation across domains
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    index: Arc<KeyIndex>,
    keys: KeyBuilder,
    /// Statistics
    changes_applied: AtomicU64,
    keys_removed: AtomicU64,
    prefix_deletes: AtomicU64,
    index_deletes: AtomicU64,
    failures: AtomicU64,
}

impl CacheManager {
    /// Create new cache manager
    pub fn new(backend: Arc<dyn CacheBackend>, index: Arc<KeyIndex>, keys: KeyBuilder) -> Self {
        debug!(
            backend = backend.name(),
            namespace = keys.namespace(),
            prefix_delete = backend.supports_prefix_delete(),
            "Initializing cache manager"
        );

        Self {
            backend,
            index,
            keys,
            changes_applied: AtomicU64::new(0),
            keys_removed: AtomicU64::new(0),
            prefix_deletes: AtomicU64::new(0),
            index_deletes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Clear course `course_id`, the course and category listings, its
    /// enrollments and the dashboard
    pub async fn clear_course_related_cache(&self, course_id: &str, tenant: &TenantId) {
        self.apply(tenant, &EntityChange::course(course_id)).await;
    }

    /// Clear user `user_id`, the user listing, the user's enrollments and
    /// the dashboard
    pub async fn clear_user_related_cache(&self, user_id: &str, tenant: &TenantId) {
        self.apply(tenant, &EntityChange::user(user_id)).await;
    }

    /// Clear the user's progress, the course's stats and the dashboard
    pub async fn clear_progress_related_cache(
        &self,
        user_id: &str,
        course_id: &str,
        tenant: &TenantId,
    ) {
        self.apply(tenant, &EntityChange::progress(user_id, course_id))
            .await;
    }

    /// Clear the user's purchases, enrollments on both sides, the course's
    /// stats and the dashboard
    pub async fn clear_purchase_related_cache(
        &self,
        user_id: &str,
        course_id: &str,
        tenant: &TenantId,
    ) {
        self.apply(tenant, &EntityChange::purchase(user_id, course_id))
            .await;
    }

    pub async fn clear_certificate_related_cache(
        &self,
        user_id: &str,
        course_id: Option<&str>,
        tenant: &TenantId,
    ) {
        let change = EntityChange::certificate(user_id, course_id.map(str::to_string));
        self.apply(tenant, &change).await;
    }

    /// Clear everything cached for `tenant`
    pub async fn clear_tenant_cache(&self, tenant: &TenantId) {
        self.apply(tenant, &EntityChange::Tenant).await;
    }

    pub async fn clear_dashboard_cache(&self, tenant: &TenantId) {
        self.apply(tenant, &EntityChange::Dashboard).await;
    }

    /// Clear every target of `change` for `tenant`
    pub async fn apply(&self, tenant: &TenantId, change: &EntityChange) -> InvalidationOutcome {
        self.changes_applied.fetch_add(1, Ordering::Relaxed);
        let mut outcome = InvalidationOutcome::default();

        for target in change.targets() {
            let resolved = match target.resolve(&self.keys, tenant) {
                Ok(resolved) => resolved,
                Err(e) => {
                    outcome.failures += 1;
                    warn!(
                        domain = "cache_invalidation",
                        tenant = %tenant,
                        target = ?target,
                        error = %e,
                        "Could not build invalidation target"
                    );
                    continue;
                }
            };

            match self.clear(&resolved).await {
                Some(removed) => outcome.removed += removed,
                None => outcome.failures += 1,
            }
        }

        self.keys_removed
            .fetch_add(outcome.removed as u64, Ordering::Relaxed);
        self.failures
            .fetch_add(outcome.failures as u64, Ordering::Relaxed);
        debug!(
            tenant = %tenant,
            change = ?change,
            removed = outcome.removed,
            failures = outcome.failures,
            "Applied cache invalidation"
        );
        outcome
    }

    /// Returns the number of keys removed, or `None` if the backend failed
    async fn clear(&self, target: &ResolvedTarget) -> Option<usize> {
        match target {
            ResolvedTarget::Exact(key) => {
                match self.backend.remove(key.as_str()).await {
                    Ok(()) => {
                        self.index.forget(key);
                        Some(1)
                    }
                    Err(e) => {
                        warn!(
                            domain = "cache_invalidation",
                            key = %key,
                            error = %e,
                            "Failed to remove cache key"
                        );
                        None
                    }
                }
            }
            ResolvedTarget::Prefix(prefix) if self.backend.supports_prefix_delete() => {
                self.prefix_deletes.fetch_add(1, Ordering::Relaxed);
                match self.backend.remove_by_prefix(prefix).await {
                    Ok(removed) => Some(removed),
                    Err(e) => {
                        warn!(
                            domain = "cache_invalidation",
                            prefix = %prefix,
                            error = %e,
                            "Prefix delete failed"
                        );
                        None
                    }
                }
            }
            ResolvedTarget::Prefix(prefix) => {
                self.index_deletes.fetch_add(1, Ordering::Relaxed);
                let taken = self.index.take_prefix(prefix);
                if taken.is_empty() {
                    return Some(0);
                }
                let keys: Vec<String> = taken.iter().map(|indexed| indexed.key.clone()).collect();
                match self.backend.remove_many(&keys).await {
                    Ok(removed) => Some(removed),
                    Err(e) => {
                        warn!(
                            domain = "cache_invalidation",
                            prefix = %prefix,
                            keys = keys.len(),
                            error = %e,
                            "Index-backed delete failed, keys kept for retry"
                        );
                        self.index.restore(taken);
                        None
                    }
                }
            }
        }
    }

    /// Get invalidation statistics
    pub fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            changes_applied: self.changes_applied.load(Ordering::Relaxed),
            keys_removed: self.keys_removed.load(Ordering::Relaxed),
            prefix_deletes: self.prefix_deletes.load(Ordering::Relaxed),
            index_deletes: self.index_deletes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            indexed_keys: self.index.len(),
        }
    }
}

/// Cache Manager statistics
#[derive(Debug, Clone)]
pub struct CacheManagerStats {
    pub changes_applied: u64,
    pub keys_removed: u64,
    /// Prefix targets cleared server-side
    pub prefix_deletes: u64,
    /// Prefix targets cleared through the key index
    pub index_deletes: u64,
    pub failures: u64,
    pub indexed_keys: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DashMapCache;
    use crate::keys::CacheDomain;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    async fn seed(
        backend: &DashMapCache,
        keys: &KeyBuilder,
        entries: &[(&str, CacheDomain, &str, Option<&str>)],
    ) {
        for (tenant, domain, subject, qualifier) in entries {
            let key = keys.build(tenant, *domain, subject, *qualifier).unwrap();
            backend.set_with_ttl(key.as_str(), b"1", TTL).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_clear_course_only_touches_course_scopes() {
        let backend = Arc::new(DashMapCache::new());
        let index = Arc::new(KeyIndex::new());
        let keys = KeyBuilder::default();
        seed(
            &backend,
            &keys,
            &[
                ("T1", CacheDomain::Course, "C1", None),
                ("T1", CacheDomain::Course, "C1", Some("stats")),
                ("T1", CacheDomain::Course, "list", Some("page-1")),
                ("T1", CacheDomain::Dashboard, "", None),
                ("T1", CacheDomain::Course, "C2", None),
                ("T1", CacheDomain::User, "U1", None),
                ("T2", CacheDomain::Course, "C1", None),
            ],
        )
        .await;

        let manager = CacheManager::new(backend.clone(), index, keys.clone());
        let tenant = TenantId::new("T1").unwrap();
        manager.clear_course_related_cache("C1", &tenant).await;

        let present = |t: &str, d, s: &str, q: Option<&str>| {
            backend.contains_key(keys.build(t, d, s, q).unwrap().as_str())
        };
        assert!(!present("T1", CacheDomain::Course, "C1", None));
        assert!(!present("T1", CacheDomain::Course, "C1", Some("stats")));
        assert!(!present("T1", CacheDomain::Course, "list", Some("page-1")));
        assert!(!present("T1", CacheDomain::Dashboard, "", None));
        assert!(present("T1", CacheDomain::Course, "C2", None));
        assert!(present("T1", CacheDomain::User, "U1", None));
        assert!(present("T2", CacheDomain::Course, "C1", None));

        let stats = manager.stats();
        assert_eq!(stats.changes_applied, 1);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.index_deletes, 0);
    }

    #[tokio::test]
    async fn test_clear_tenant_spares_other_tenants() {
        let backend = Arc::new(DashMapCache::new());
        let index = Arc::new(KeyIndex::new());
        let keys = KeyBuilder::default();
        seed(
            &backend,
            &keys,
            &[
                ("T1", CacheDomain::Settings, "", None),
                ("T1", CacheDomain::Session, "S1", None),
                ("T2", CacheDomain::Settings, "", None),
            ],
        )
        .await;

        let manager = CacheManager::new(backend.clone(), index, keys);
        let outcome = manager
            .apply(&TenantId::new("T1").unwrap(), &EntityChange::Tenant)
            .await;

        assert_eq!(outcome.removed, 2);
        assert!(outcome.is_clean());
        assert_eq!(backend.len(), 1);
    }
}
