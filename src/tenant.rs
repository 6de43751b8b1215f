//! Tenant context
//!
//! The tenant a write belongs to is resolved once per request and passed
//! explicitly to the invalidation layer. Resolution order:
//!
//! 1. route param `tenant`
//! 2. route param `tenantId`
//! 3. request body field `tenant_id` (string or integer)
//! 4. the authenticated user's tenant
//!
//! Resolution from the request host is not supported.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::keys::TenantId;

/// Where a tenant id was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    RouteParam,
    RouteParamAlias,
    RequestBody,
    AuthenticatedUser,
    /// Supplied directly by a service
    Explicit,
}

impl fmt::Display for TenantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RouteParam => "route_param",
            Self::RouteParamAlias => "route_param_alias",
            Self::RequestBody => "request_body",
            Self::AuthenticatedUser => "authenticated_user",
            Self::Explicit => "explicit",
        })
    }
}

/// Request-scoped tenant for key building and invalidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    source: TenantSource,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            source: TenantSource::Explicit,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn source(&self) -> TenantSource {
        self.source
    }

    /// Resolve the tenant of a write request; `None` when no source yields one
    pub fn resolve(
        route_params: &HashMap<String, String>,
        body: &Value,
        authenticated_tenant: Option<&str>,
    ) -> Option<Self> {
        let candidates = [
            (
                route_params.get("tenant").map(String::as_str),
                TenantSource::RouteParam,
            ),
            (
                route_params.get("tenantId").map(String::as_str),
                TenantSource::RouteParamAlias,
            ),
        ];

        candidates
            .into_iter()
            .find_map(|(value, source)| Self::candidate(value?, source))
            .or_else(|| {
                body_tenant(body).and_then(|id| Self::candidate(&id, TenantSource::RequestBody))
            })
            .or_else(|| Self::candidate(authenticated_tenant?, TenantSource::AuthenticatedUser))
    }

    fn candidate(value: &str, source: TenantSource) -> Option<Self> {
        TenantId::new(value)
            .ok()
            .map(|tenant_id| Self { tenant_id, source })
    }
}

impl From<TenantId> for TenantContext {
    fn from(tenant_id: TenantId) -> Self {
        Self::new(tenant_id)
    }
}

fn body_tenant(body: &Value) -> Option<String> {
    match body.get("tenant_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_route_param_wins() {
        let ctx = TenantContext::resolve(
            &params(&[("tenant", "T1"), ("tenantId", "T2")]),
            &json!({"tenant_id": "T3"}),
            Some("T4"),
        )
        .unwrap();
        assert_eq!(ctx.tenant_id().as_str(), "T1");
        assert_eq!(ctx.source(), TenantSource::RouteParam);
    }

    #[test]
    fn test_fallback_order() {
        let alias = TenantContext::resolve(&params(&[("tenantId", "T2")]), &json!({}), Some("T4"));
        assert_eq!(alias.unwrap().source(), TenantSource::RouteParamAlias);

        let body = TenantContext::resolve(&params(&[]), &json!({"tenant_id": 17}), Some("T4")).unwrap();
        assert_eq!(body.tenant_id().as_str(), "17");
        assert_eq!(body.source(), TenantSource::RequestBody);

        let auth = TenantContext::resolve(&params(&[]), &Value::Null, Some("T4")).unwrap();
        assert_eq!(auth.source(), TenantSource::AuthenticatedUser);
    }

    #[test]
    fn test_blank_values_fall_through() {
        let ctx = TenantContext::resolve(
            &params(&[("tenant", "")]),
            &json!({"tenant_id": null}),
            Some("T4"),
        )
        .unwrap();
        assert_eq!(ctx.tenant_id().as_str(), "T4");
    }

    #[test]
    fn test_unresolvable() {
        assert!(TenantContext::resolve(&params(&[]), &json!({"name": "x"}), None).is_none());
    }
}
