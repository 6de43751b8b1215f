//! Cache Key Builder
//!
//! Every cached read-model lives under a key of the form
//!
//! ```text
//! namespace:tenant:domain:subject:qualifier
//! ```
//!
//! All five components are always present (subject and qualifier may be
//! empty). Each component is escaped so the `:` delimiter can only appear
//! between components, which makes the rendering injective: two keys render
//! to the same string only if every component is equal. Tenant isolation
//! relies on exactly this property.
//!
//! # Example
//!
//! ```rust
//! use tenant_cache::keys::{CacheDomain, KeyBuilder};
//!
//! # fn main() -> tenant_cache::Result<()> {
//! let keys = KeyBuilder::new("lms");
//! let key = keys.build("T1", CacheDomain::Course, "C1", None)?;
//! assert_eq!(key.as_str(), "lms:T1:course:C1:");
//! assert!(key.as_str().starts_with(&key.subject_prefix()));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Component delimiter
pub const DELIMITER: char = ':';

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "lms";

/// Subject used for collection (listing) read-models of a domain
pub const LIST_SUBJECT: &str = "list";

/// Qualifier used for per-entity aggregate read-models
pub const STATS_QUALIFIER: &str = "stats";

/// Subject for enrollment read-models keyed by course rather than user
pub fn course_enrollments_subject(course_id: &str) -> String {
    format!("course-{course_id}")
}

/// Identifier of an isolated customer organization
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant id, rejecting empty or blank input
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] if `id` is empty after trimming.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(CacheError::InvalidKey("tenant id is required".to_string()));
        }
        if trimmed.len() == id.len() {
            Ok(Self(id))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = CacheError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Entity kinds that own cached read-models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDomain {
    Course,
    Category,
    User,
    Enrollment,
    Progress,
    Purchase,
    Certificate,
    Session,
    Dashboard,
    Settings,
    Tenant,
}

impl CacheDomain {
    /// All domains, in rendering order
    pub const ALL: [CacheDomain; 11] = [
        Self::Course,
        Self::Category,
        Self::User,
        Self::Enrollment,
        Self::Progress,
        Self::Purchase,
        Self::Certificate,
        Self::Session,
        Self::Dashboard,
        Self::Settings,
        Self::Tenant,
    ];

    /// Fixed tag used inside rendered keys
    pub fn tag(self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Category => "category",
            Self::User => "user",
            Self::Enrollment => "enrollment",
            Self::Progress => "progress",
            Self::Purchase => "purchase",
            Self::Certificate => "certificate",
            Self::Session => "session",
            Self::Dashboard => "dashboard",
            Self::Settings => "settings",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CacheDomain {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(CacheError::InvalidKey("domain is required".to_string()));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|domain| domain.tag() == s)
            .ok_or_else(|| CacheError::InvalidKey(format!("unknown domain '{s}'")))
    }
}

/// A fully rendered, tenant-scoped cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant: TenantId,
    domain: CacheDomain,
    subject: String,
    qualifier: Option<String>,
    rendered: String,
    /// Byte offsets of the tenant, domain and subject prefixes in `rendered`
    prefix_ends: [usize; 3],
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn domain(&self) -> CacheDomain {
        self.domain
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Prefix shared by every key of this key's tenant (`ns:tenant:`)
    pub fn tenant_prefix(&self) -> &str {
        self.rendered.get(..self.prefix_ends[0]).unwrap_or_default()
    }

    /// Prefix shared by every key of this tenant and domain (`ns:tenant:domain:`)
    pub fn domain_prefix(&self) -> &str {
        self.rendered.get(..self.prefix_ends[1]).unwrap_or_default()
    }

    /// Prefix shared by every qualifier of this subject (`ns:tenant:domain:subject:`)
    pub fn subject_prefix(&self) -> &str {
        self.rendered.get(..self.prefix_ends[2]).unwrap_or_default()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

/// Deterministic key construction under a fixed namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    namespace: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build a key from (tenant, domain, subject, qualifier)
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] when the tenant id is empty.
    ///
    /// `Some("")` is normalised to `None`.
    pub fn build(
        &self,
        tenant: impl AsRef<str>,
        domain: CacheDomain,
        subject: impl AsRef<str>,
        qualifier: Option<&str>,
    ) -> Result<CacheKey> {
        let tenant = TenantId::new(tenant.as_ref())?;
        let subject = subject.as_ref().to_string();
        // An empty qualifier renders like an absent one, so it is one
        let qualifier = qualifier.filter(|q| !q.is_empty()).map(str::to_string);

        let mut rendered = String::with_capacity(
            self.namespace.len() + tenant.as_str().len() + subject.len() + 24,
        );
        push_component(&mut rendered, &self.namespace);
        push_component(&mut rendered, tenant.as_str());
        let tenant_end = rendered.len();
        push_component(&mut rendered, domain.tag());
        let domain_end = rendered.len();
        push_component(&mut rendered, &subject);
        let subject_end = rendered.len();
        escape_into(&mut rendered, qualifier.as_deref().unwrap_or_default());

        Ok(CacheKey {
            tenant,
            domain,
            subject,
            qualifier,
            rendered,
            prefix_ends: [tenant_end, domain_end, subject_end],
        })
    }

    /// Build a key from a textual domain tag
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] when the tenant id or domain tag is
    /// empty, or the tag is not a known domain.
    pub fn build_tagged(
        &self,
        tenant: impl AsRef<str>,
        domain: &str,
        subject: impl AsRef<str>,
        qualifier: Option<&str>,
    ) -> Result<CacheKey> {
        let domain = domain.parse()?;
        self.build(tenant, domain, subject, qualifier)
    }

    /// `ns:tenant:`
    pub fn tenant_prefix(&self, tenant: &TenantId) -> String {
        let mut prefix = String::new();
        push_component(&mut prefix, &self.namespace);
        push_component(&mut prefix, tenant.as_str());
        prefix
    }

    /// `ns:tenant:domain:`
    pub fn domain_prefix(&self, tenant: &TenantId, domain: CacheDomain) -> String {
        let mut prefix = self.tenant_prefix(tenant);
        push_component(&mut prefix, domain.tag());
        prefix
    }

    /// `ns:tenant:domain:subject:`
    pub fn subject_prefix(&self, tenant: &TenantId, domain: CacheDomain, subject: &str) -> String {
        let mut prefix = self.domain_prefix(tenant, domain);
        push_component(&mut prefix, subject);
        prefix
    }
}

/// Build a key under [`DEFAULT_NAMESPACE`]
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] when the tenant id is empty.
pub fn build_key(
    tenant: impl AsRef<str>,
    domain: CacheDomain,
    subject: impl AsRef<str>,
    qualifier: Option<&str>,
) -> Result<CacheKey> {
    KeyBuilder::default().build(tenant, domain, subject, qualifier)
}

/// Stable short digest of a filter set, for use as a key qualifier
///
/// The filters are normalised through `serde_json::Value`, whose maps are
/// ordered, so `HashMap`s with equal contents hash equally.
///
/// # Errors
///
/// Returns [`CacheError::Codec`] if the filters cannot be represented as JSON
/// (e.g. maps with non-string keys).
pub fn hash_filters<T: Serialize + ?Sized>(filters: &T) -> Result<String> {
    let normalised = serde_json::to_value(filters).map_err(|e| CacheError::codec("serde_json", e))?;
    let bytes = serde_json::to_vec(&normalised).map_err(|e| CacheError::codec("serde_json", e))?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest.get(..8).unwrap_or_default()))
}

fn push_component(out: &mut String, component: &str) {
    escape_into(out, component);
    out.push(DELIMITER);
}

fn escape_into(out: &mut String, component: &str) {
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%3A"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_layout() {
        let key = build_key("T1", CacheDomain::Course, "C1", Some("abc")).unwrap();
        assert_eq!(key.as_str(), "lms:T1:course:C1:abc");
        assert_eq!(key.tenant_prefix(), "lms:T1:");
        assert_eq!(key.domain_prefix(), "lms:T1:course:");
        assert_eq!(key.subject_prefix(), "lms:T1:course:C1:");
    }

    #[test]
    fn test_missing_subject_and_qualifier_render_empty_components() {
        let key = build_key("T1", CacheDomain::Dashboard, "", None).unwrap();
        assert_eq!(key.as_str(), "lms:T1:dashboard::");
    }

    #[test]
    fn test_empty_qualifier_equals_absent_qualifier() {
        let absent = build_key("T1", CacheDomain::Course, "C1", None).unwrap();
        let empty = build_key("T1", CacheDomain::Course, "C1", Some("")).unwrap();
        assert_eq!(absent.as_str(), empty.as_str());
        assert_eq!(empty.qualifier(), None);
        assert_eq!(absent, empty);

        let mut seen = std::collections::HashSet::new();
        seen.insert(absent);
        assert!(!seen.insert(empty));
    }

    #[test]
    fn test_empty_tenant_is_rejected() {
        assert!(matches!(
            build_key("", CacheDomain::Course, "C1", None),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(
            build_key("   ", CacheDomain::Course, "C1", None),
            Err(CacheError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_domain_tag_parsing() {
        let keys = KeyBuilder::default();
        assert!(keys.build_tagged("T1", "progress", "U1", None).is_ok());
        assert!(matches!(
            keys.build_tagged("T1", "", "U1", None),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(
            keys.build_tagged("T1", "discourse", "U1", None),
            Err(CacheError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_delimiter_in_components_cannot_forge_other_scopes() {
        // Without escaping, tenant "T1:course" + domain "user" could alias
        // tenant "T1" + domain "course".
        let a = build_key("T1:course", CacheDomain::User, "U1", None).unwrap();
        let b = build_key("T1", CacheDomain::Course, "user:U1", None).unwrap();
        assert_ne!(a.as_str(), b.as_str());
        let course_scope = build_key("T1", CacheDomain::Course, "", None).unwrap();
        assert!(!a.as_str().starts_with(course_scope.domain_prefix()));
    }

    #[test]
    fn test_subject_prefix_does_not_match_longer_ids() {
        let c1 = build_key("T1", CacheDomain::Course, "C1", None).unwrap();
        let c10 = build_key("T1", CacheDomain::Course, "C10", None).unwrap();
        assert!(!c10.as_str().starts_with(c1.subject_prefix()));
    }

    #[test]
    fn test_builder_prefixes_match_key_prefixes() {
        let keys = KeyBuilder::new("app");
        let tenant = TenantId::new("T9").unwrap();
        let key = keys.build(&tenant, CacheDomain::User, "U1", Some("x")).unwrap();
        assert_eq!(keys.tenant_prefix(&tenant), key.tenant_prefix());
        assert_eq!(keys.domain_prefix(&tenant, CacheDomain::User), key.domain_prefix());
        assert_eq!(keys.subject_prefix(&tenant, CacheDomain::User, "U1"), key.subject_prefix());
    }

    #[test]
    fn test_hash_filters_is_order_independent() {
        let mut a = HashMap::new();
        a.insert("status", "published");
        a.insert("category", "7");
        let mut b = HashMap::new();
        b.insert("category", "7");
        b.insert("status", "published");
        assert_eq!(hash_filters(&a).unwrap(), hash_filters(&b).unwrap());

        b.insert("page", "2");
        assert_ne!(hash_filters(&a).unwrap(), hash_filters(&b).unwrap());
        assert_eq!(hash_filters(&a).unwrap().len(), 16);
    }

    #[test]
    fn test_tenant_id_deserialization_rejects_empty() {
        assert!(serde_json::from_str::<TenantId>("\"\"").is_err());
        let id: TenantId = serde_json::from_str("\"T1\"").unwrap();
        assert_eq!(id.as_str(), "T1");
    }

    proptest! {
        #[test]
        fn prop_different_tenants_never_collide(
            a in "[a-zA-Z0-9:%_-]{1,12}",
            b in "[a-zA-Z0-9:%_-]{1,12}",
            subject in "[a-zA-Z0-9:%]{0,8}",
            qualifier in proptest::option::of("[a-f0-9:]{0,8}"),
        ) {
            prop_assume!(a.trim() != b.trim() && !a.trim().is_empty() && !b.trim().is_empty());
            for domain in CacheDomain::ALL {
                let ka = build_key(&a, domain, &subject, qualifier.as_deref()).unwrap();
                let kb = build_key(&b, domain, &subject, qualifier.as_deref()).unwrap();
                prop_assert_ne!(ka.as_str(), kb.as_str());
                prop_assert!(!ka.as_str().starts_with(kb.tenant_prefix()));
            }
        }

        #[test]
        fn prop_build_is_deterministic(
            tenant in "[a-zA-Z0-9]{1,8}",
            subject in "[a-zA-Z0-9:]{0,8}",
        ) {
            let first = build_key(&tenant, CacheDomain::Progress, &subject, Some("q")).unwrap();
            let second = build_key(&tenant, CacheDomain::Progress, &subject, Some("q")).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
