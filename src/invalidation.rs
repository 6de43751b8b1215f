//! Invalidation table
//!
//! Maps an entity change to the cache scopes it makes stale. This is the
//! single table both invalidation paths use: services report an
//! [`EntityChange`] directly, and the HTTP write hook derives the same
//! changes from route names.
//!
//! | change | targets |
//! |---|---|
//! | `Course(c)` | course `c`, course list, category list, enrollments of `c`, dashboard |
//! | `User(u)` | user `u`, user list, enrollments of `u`, dashboard |
//! | `Progress(u, c)` | progress of `u`, stats of `c`, dashboard |
//! | `Purchase(u, c)` | purchases of `u`, enrollments of `u` and of `c`, stats of `c`, dashboard |
//! | `Certificate(u, c?)` | certificates of `u`, stats of `c` if given, dashboard |
//! | `Tenant` | everything cached for the tenant |
//! | `Dashboard` | dashboard |
//!
//! Targets carry no tenant. They are resolved against the one tenant the
//! change is applied for, so a rule cannot reach another tenant's keys.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::keys::{
    CacheDomain, CacheKey, KeyBuilder, LIST_SUBJECT, STATS_QUALIFIER, TenantId,
    course_enrollments_subject,
};

/// A data mutation that makes cached read-models stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityChange {
    Course {
        course_id: String,
    },
    User {
        user_id: String,
    },
    Progress {
        user_id: String,
        course_id: String,
    },
    Purchase {
        user_id: String,
        course_id: String,
    },
    Certificate {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        course_id: Option<String>,
    },
    /// Tenant record or tenant settings changed
    Tenant,
    Dashboard,
}

impl EntityChange {
    pub fn course(course_id: impl Into<String>) -> Self {
        Self::Course {
            course_id: course_id.into(),
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    pub fn progress(user_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self::Progress {
            user_id: user_id.into(),
            course_id: course_id.into(),
        }
    }

    pub fn purchase(user_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self::Purchase {
            user_id: user_id.into(),
            course_id: course_id.into(),
        }
    }

    pub fn certificate(user_id: impl Into<String>, course_id: Option<String>) -> Self {
        Self::Certificate {
            user_id: user_id.into(),
            course_id,
        }
    }

    /// Domain primarily affected, for logging
    pub fn domain(&self) -> CacheDomain {
        match self {
            Self::Course { .. } => CacheDomain::Course,
            Self::User { .. } => CacheDomain::User,
            Self::Progress { .. } => CacheDomain::Progress,
            Self::Purchase { .. } => CacheDomain::Purchase,
            Self::Certificate { .. } => CacheDomain::Certificate,
            Self::Tenant => CacheDomain::Tenant,
            Self::Dashboard => CacheDomain::Dashboard,
        }
    }

    /// Scopes made stale by this change
    pub fn targets(&self) -> Vec<InvalidationTarget> {
        use InvalidationTarget::{Domain, Key, Subject};

        let course_stats = |course_id: &str| Key {
            domain: CacheDomain::Course,
            subject: course_id.to_string(),
            qualifier: Some(STATS_QUALIFIER.to_string()),
        };
        let subject = |domain, subject: &str| Subject {
            domain,
            subject: subject.to_string(),
        };

        match self {
            Self::Course { course_id } => vec![
                subject(CacheDomain::Course, course_id),
                subject(CacheDomain::Course, LIST_SUBJECT),
                subject(CacheDomain::Category, LIST_SUBJECT),
                subject(CacheDomain::Enrollment, &course_enrollments_subject(course_id)),
                Domain(CacheDomain::Dashboard),
            ],
            Self::User { user_id } => vec![
                subject(CacheDomain::User, user_id),
                subject(CacheDomain::User, LIST_SUBJECT),
                subject(CacheDomain::Enrollment, user_id),
                Domain(CacheDomain::Dashboard),
            ],
            Self::Progress { user_id, course_id } => vec![
                subject(CacheDomain::Progress, user_id),
                course_stats(course_id),
                Domain(CacheDomain::Dashboard),
            ],
            Self::Purchase { user_id, course_id } => vec![
                subject(CacheDomain::Purchase, user_id),
                subject(CacheDomain::Enrollment, user_id),
                subject(CacheDomain::Enrollment, &course_enrollments_subject(course_id)),
                course_stats(course_id),
                Domain(CacheDomain::Dashboard),
            ],
            Self::Certificate { user_id, course_id } => {
                let mut targets = vec![subject(CacheDomain::Certificate, user_id)];
                if let Some(course_id) = course_id {
                    targets.push(course_stats(course_id));
                }
                targets.push(Domain(CacheDomain::Dashboard));
                targets
            }
            Self::Tenant => vec![InvalidationTarget::Tenant],
            Self::Dashboard => vec![Domain(CacheDomain::Dashboard)],
        }
    }
}

/// A tenant-relative cache scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// One exact key
    Key {
        domain: CacheDomain,
        subject: String,
        qualifier: Option<String>,
    },
    /// Every qualifier of a subject
    Subject { domain: CacheDomain, subject: String },
    /// Every key of a domain
    Domain(CacheDomain),
    /// Every key of the tenant
    Tenant,
}

impl InvalidationTarget {
    /// Resolve against a tenant
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`](crate::CacheError::InvalidKey) if
    /// an exact key cannot be built.
    pub fn resolve(&self, keys: &KeyBuilder, tenant: &TenantId) -> Result<ResolvedTarget> {
        Ok(match self {
            Self::Key {
                domain,
                subject,
                qualifier,
            } => ResolvedTarget::Exact(keys.build(tenant, *domain, subject, qualifier.as_deref())?),
            Self::Subject { domain, subject } => {
                ResolvedTarget::Prefix(keys.subject_prefix(tenant, *domain, subject))
            }
            Self::Domain(domain) => ResolvedTarget::Prefix(keys.domain_prefix(tenant, *domain)),
            Self::Tenant => ResolvedTarget::Prefix(keys.tenant_prefix(tenant)),
        })
    }
}

/// A target bound to a tenant: either one key or a key prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    Exact(CacheKey),
    Prefix(String),
}
