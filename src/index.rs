//! Key Index
//!
//! Secondary index of issued keys, grouped by `ns:tenant:domain:` scope.
//! Backends that cannot enumerate keys server-side (Moka) rely on it to turn
//! a tenant, domain or subject prefix into the concrete keys to delete.
//!
//! Each key is held with the expiry of its cached entry. Expired keys are
//! purged every [`PURGE_INTERVAL`] records and skipped when a prefix is taken,
//! so the index tracks the live key set rather than every key ever issued.
//! An entry the backend evicted early stays indexed until its TTL runs out;
//! deleting it again is harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::keys::{CacheKey, DELIMITER};

/// Number of records between two sweeps of expired keys
pub const PURGE_INTERVAL: u64 = 256;

/// A key taken out of the index, with the expiry it was recorded under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedKey {
    pub key: String,
    /// `None` when the TTL does not fit an `Instant`
    pub expires_at: Option<Instant>,
}

impl IndexedKey {
    fn is_expired(&self, now: Instant) -> bool {
        is_expired(self.expires_at, now)
    }
}

#[derive(Debug, Default)]
pub struct KeyIndex {
    /// Domain prefix -> rendered keys issued under it, with their expiry
    scopes: DashMap<String, HashMap<String, Option<Instant>>>,
    records: AtomicU64,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key that was just stored with `ttl`
    pub fn record(&self, key: &CacheKey, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl);
        self.scopes
            .entry(key.domain_prefix().to_string())
            .or_default()
            .insert(key.as_str().to_string(), expires_at);
        trace!(key = %key, "Indexed cache key");

        if (self.records.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_INTERVAL == 0 {
            self.purge_expired();
        }
    }

    /// Drop a single key from the index
    pub fn forget(&self, key: &CacheKey) {
        let scope = key.domain_prefix();
        let now_empty = self.scopes.get_mut(scope).is_some_and(|mut keys| {
            keys.remove(key.as_str());
            keys.is_empty()
        });
        if now_empty {
            self.scopes.remove_if(scope, |_, keys| keys.is_empty());
        }
    }

    /// Remove and return every live indexed key starting with `prefix`
    ///
    /// `prefix` may be wider than a scope (a tenant prefix), equal to one,
    /// or narrower (a subject prefix). Expired keys under `prefix` are
    /// dropped without being returned.
    pub fn take_prefix(&self, prefix: &str) -> Vec<IndexedKey> {
        let now = Instant::now();
        let mut taken = Vec::new();
        self.scopes.retain(|scope, keys| {
            if scope.starts_with(prefix) {
                taken.extend(
                    keys.drain()
                        .map(|(key, expires_at)| IndexedKey { key, expires_at })
                        .filter(|indexed| !indexed.is_expired(now)),
                );
            } else if prefix.starts_with(scope.as_str()) {
                keys.retain(|key, expires_at| {
                    if !key.starts_with(prefix) {
                        return true;
                    }
                    if !is_expired(*expires_at, now) {
                        taken.push(IndexedKey {
                            key: key.clone(),
                            expires_at: *expires_at,
                        });
                    }
                    false
                });
            }
            !keys.is_empty()
        });
        taken
    }

    /// Put back keys returned by [`take_prefix`](Self::take_prefix)
    ///
    /// Used when the backend delete for those keys failed, so a later
    /// invalidation can retry them.
    pub fn restore(&self, keys: impl IntoIterator<Item = IndexedKey>) {
        for IndexedKey { key, expires_at } in keys {
            let Some(scope) = scope_of(&key) else {
                continue;
            };
            self.scopes
                .entry(scope.to_string())
                .or_default()
                .insert(key, expires_at);
        }
    }

    /// Drop every expired key; returns the number dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.scopes.retain(|_, keys| {
            let before = keys.len();
            keys.retain(|_, expires_at| !is_expired(*expires_at, now));
            purged += before - keys.len();
            !keys.is_empty()
        });
        if purged > 0 {
            debug!(purged = purged, "Purged expired keys from index");
        }
        purged
    }

    /// Whether `key` is currently indexed
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.scopes
            .get(key.domain_prefix())
            .is_some_and(|keys| keys.contains_key(key.as_str()))
    }

    /// Number of indexed keys, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.scopes.iter().map(|scope| scope.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| now > at)
}

/// `ns:tenant:domain:` part of a rendered key
fn scope_of(key: &str) -> Option<&str> {
    let (end, _) = key.match_indices(DELIMITER).nth(2)?;
    key.get(..=end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CacheDomain, build_key};

    const TTL: Duration = Duration::from_secs(60);

    fn key(tenant: &str, domain: CacheDomain, subject: &str, qualifier: Option<&str>) -> CacheKey {
        build_key(tenant, domain, subject, qualifier).unwrap()
    }

    fn names(taken: Vec<IndexedKey>) -> Vec<String> {
        let mut names: Vec<String> = taken.into_iter().map(|indexed| indexed.key).collect();
        names.sort();
        names
    }

    #[test]
    fn test_take_subject_prefix() {
        let index = KeyIndex::new();
        let c1 = key("T1", CacheDomain::Course, "C1", None);
        let c1_stats = key("T1", CacheDomain::Course, "C1", Some("stats"));
        let c10 = key("T1", CacheDomain::Course, "C10", None);
        for k in [&c1, &c1_stats, &c10] {
            index.record(k, TTL);
        }

        let taken = names(index.take_prefix(c1.subject_prefix()));
        assert_eq!(taken, vec![c1.as_str().to_string(), c1_stats.as_str().to_string()]);
        assert!(index.contains(&c10));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_take_tenant_prefix_spans_domains() {
        let index = KeyIndex::new();
        let t1_course = key("T1", CacheDomain::Course, "C1", None);
        let t1_user = key("T1", CacheDomain::User, "U1", None);
        let t2_course = key("T2", CacheDomain::Course, "C1", None);
        for k in [&t1_course, &t1_user, &t2_course] {
            index.record(k, TTL);
        }

        let taken = index.take_prefix(t1_course.tenant_prefix());
        assert_eq!(taken.len(), 2);
        assert!(index.contains(&t2_course));
        assert!(!index.contains(&t1_user));
    }

    #[test]
    fn test_restore_after_take() {
        let index = KeyIndex::new();
        let k = key("T1", CacheDomain::Purchase, "U1", Some("page-2"));
        index.record(&k, TTL);

        let taken = index.take_prefix(k.tenant_prefix());
        assert!(!index.contains(&k));

        index.restore(taken);
        assert!(index.contains(&k));
        assert_eq!(names(index.take_prefix(k.domain_prefix())), vec![k.as_str().to_string()]);
    }

    #[test]
    fn test_forget_removes_empty_scope() {
        let index = KeyIndex::new();
        let k = key("T1", CacheDomain::Dashboard, "", None);
        index.record(&k, TTL);
        index.record(&k, TTL);
        assert_eq!(index.len(), 1);

        index.forget(&k);
        assert!(index.is_empty());
    }

    #[test]
    fn test_take_prefix_skips_expired_keys() {
        let index = KeyIndex::new();
        let stale = key("T1", CacheDomain::Course, "list", Some("f1"));
        let live = key("T1", CacheDomain::Course, "list", Some("f2"));
        index.record(&stale, Duration::from_millis(1));
        index.record(&live, TTL);
        std::thread::sleep(Duration::from_millis(10));

        let taken = names(index.take_prefix(stale.subject_prefix()));
        assert_eq!(taken, vec![live.as_str().to_string()]);
        assert!(index.is_empty());
    }

    #[test]
    fn test_expired_keys_are_purged_while_recording() {
        let index = KeyIndex::new();
        for i in 0..PURGE_INTERVAL {
            let k = key("T1", CacheDomain::Course, "list", Some(&format!("f{i}")));
            index.record(&k, Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(10));

        for i in 0..PURGE_INTERVAL {
            let k = key("T1", CacheDomain::User, &format!("U{i}"), None);
            index.record(&k, TTL);
        }

        assert_eq!(index.len(), usize::try_from(PURGE_INTERVAL).unwrap());
        assert!(!index.contains(&key("T1", CacheDomain::Course, "list", Some("f0"))));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let index = KeyIndex::new();
        let k = key("T1", CacheDomain::Settings, "", None);
        index.record(&k, Duration::MAX);

        assert_eq!(index.purge_expired(), 0);
        assert!(index.contains(&k));
    }
}
