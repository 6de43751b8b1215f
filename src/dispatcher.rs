//! Invalidation Dispatcher
//!
//! Turns completed writes into cache clears. There are two ways in:
//!
//! - [`InvalidationDispatcher::invalidate`]: a service that just mutated data
//!   reports the [`EntityChange`]s itself.
//! - [`InvalidationDispatcher::on_write_completed`]: a post-response hook for
//!   HTTP writes. The route name is mapped to [`InvalidationRule`]s, first
//!   through the explicit [`RouteTable`], then by matching route name tokens
//!   against the rule vocabulary.
//!
//! Both funnel into the same [`CacheManager::apply`]. Neither returns an
//! error: a failing or panicking backend is logged with
//! `domain = "cache_invalidation"` and the request carries on.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, trace};

use crate::cache_manager::{CacheManager, InvalidationOutcome};
use crate::error::{CacheError, Result};
use crate::invalidation::EntityChange;
use crate::tenant::TenantContext;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Whether requests with this method can mutate data
    pub fn is_write(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(CacheError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// A completed HTTP request, as seen by the post-response hook
#[derive(Debug, Clone)]
pub struct WriteEvent {
    pub method: HttpMethod,
    pub route_name: String,
    pub route_params: HashMap<String, String>,
    pub body: Value,
    /// Tenant of the authenticated user, if any
    pub auth_tenant_id: Option<String>,
    pub status: u16,
}

impl WriteEvent {
    pub fn new(method: HttpMethod, route_name: impl Into<String>, status: u16) -> Self {
        Self {
            method,
            route_name: route_name.into(),
            route_params: HashMap::new(),
            body: Value::Null,
            auth_tenant_id: None,
            status,
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.route_params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_auth_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.auth_tenant_id = Some(tenant_id.into());
        self
    }

    /// Write method and 2xx status
    pub fn is_successful_write(&self) -> bool {
        self.method.is_write() && (200..300).contains(&self.status)
    }
}

/// What a matched route invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationRule {
    Course,
    User,
    Progress,
    Purchase,
    Certificate,
    /// Tenant record or settings
    Tenant,
    Dashboard,
}

impl InvalidationRule {
    /// Rule named by a single route name token
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "course" | "courses" => Some(Self::Course),
            "user" | "users" => Some(Self::User),
            "progress" => Some(Self::Progress),
            "purchase" | "purchases" => Some(Self::Purchase),
            "certificate" | "certificates" => Some(Self::Certificate),
            "tenant" | "tenants" | "setting" | "settings" => Some(Self::Tenant),
            "dashboard" | "dashboards" => Some(Self::Dashboard),
            _ => None,
        }
    }

    /// Build the entity change from route params
    ///
    /// Ids are read from the bare name or its `Id` alias (`course` or
    /// `courseId`). Returns `None` when a required id is missing.
    pub fn change(self, params: &HashMap<String, String>) -> Option<EntityChange> {
        let course = || param(params, "course");
        let user = || param(params, "user");

        match self {
            Self::Course => Some(EntityChange::course(course()?)),
            Self::User => Some(EntityChange::user(user()?)),
            Self::Progress => Some(EntityChange::progress(user()?, course()?)),
            Self::Purchase => Some(EntityChange::purchase(user()?, course()?)),
            Self::Certificate => Some(EntityChange::certificate(
                user()?,
                course().map(str::to_string),
            )),
            Self::Tenant => Some(EntityChange::Tenant),
            Self::Dashboard => Some(EntityChange::Dashboard),
        }
    }
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .or_else(|| params.get(&format!("{name}Id")))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Split a route name into words on `.`, `-`, `_`, `/` and camelCase humps
fn route_tokens(route_name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for part in route_name.split(['.', '-', '_', '/']) {
        let mut current = String::new();
        for ch in part.chars() {
            if ch.is_uppercase() && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
                current.extend(ch.to_lowercase());
            } else {
                current.push(ch);
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

/// Rules matched from the words of a route name, in order, without repeats
pub fn match_route(route_name: &str) -> Vec<InvalidationRule> {
    let mut rules = Vec::new();
    for rule in route_tokens(route_name)
        .iter()
        .filter_map(|token| InvalidationRule::from_token(token))
    {
        if !rules.contains(&rule) {
            rules.push(rule);
        }
    }
    rules
}

/// Explicit route name -> rules mapping, consulted before token matching
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, Vec<InvalidationRule>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the rules for a route name
    ///
    /// An empty rule list marks a write route that invalidates nothing.
    pub fn register(
        &self,
        route_name: impl Into<String>,
        rules: impl IntoIterator<Item = InvalidationRule>,
    ) {
        self.routes
            .write()
            .insert(route_name.into(), rules.into_iter().collect());
    }

    pub fn get(&self, route_name: &str) -> Option<Vec<InvalidationRule>> {
        self.routes.read().get(route_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

/// Maps writes onto cache clears
pub struct InvalidationDispatcher {
    manager: Arc<CacheManager>,
    routes: RouteTable,
}

impl InvalidationDispatcher {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            manager,
            routes: RouteTable::new(),
        }
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Register explicit rules for a route name
    pub fn register_route(
        &self,
        route_name: impl Into<String>,
        rules: impl IntoIterator<Item = InvalidationRule>,
    ) {
        self.routes.register(route_name, rules);
    }

    /// Rules that apply to a route name
    pub fn rules_for(&self, route_name: &str) -> Vec<InvalidationRule> {
        self.routes
            .get(route_name)
            .unwrap_or_else(|| match_route(route_name))
    }

    /// Entity changes implied by a write event
    ///
    /// Rules whose required ids are missing from the route params are
    /// skipped.
    pub fn plan(&self, event: &WriteEvent) -> Vec<EntityChange> {
        self.rules_for(&event.route_name)
            .into_iter()
            .filter_map(|rule| {
                let change = rule.change(&event.route_params);
                if change.is_none() {
                    debug!(
                        route = %event.route_name,
                        rule = ?rule,
                        "Skipping invalidation rule, route params lack the required ids"
                    );
                }
                change
            })
            .collect()
    }

    /// Post-response hook for HTTP requests
    ///
    /// No-op unless the request is a POST, PUT, PATCH or DELETE that
    /// completed with a 2xx status. Never fails.
    pub async fn on_write_completed(&self, event: &WriteEvent) {
        if !event.is_successful_write() {
            trace!(
                method = %event.method,
                route = %event.route_name,
                status = event.status,
                "Not a successful write, nothing to invalidate"
            );
            return;
        }

        match AssertUnwindSafe(self.dispatch(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    domain = "cache_invalidation",
                    route = %event.route_name,
                    error = %e,
                    "Cache invalidation failed"
                );
            }
            Err(panic) => {
                error!(
                    domain = "cache_invalidation",
                    route = %event.route_name,
                    error = %panic_message(panic.as_ref()),
                    "Cache invalidation panicked"
                );
            }
        }
    }

    async fn dispatch(&self, event: &WriteEvent) -> Result<()> {
        let Some(ctx) = TenantContext::resolve(
            &event.route_params,
            &event.body,
            event.auth_tenant_id.as_deref(),
        ) else {
            debug!(
                route = %event.route_name,
                "No tenant resolved for write, skipping cache invalidation"
            );
            return Ok(());
        };

        let changes = self.plan(event);
        if changes.is_empty() {
            trace!(route = %event.route_name, "No invalidation rule matched");
            return Ok(());
        }

        let outcome = self.apply(&ctx, &changes, Some(&event.route_name)).await;
        if outcome.is_clean() {
            Ok(())
        } else {
            Err(CacheError::InvalidationFailure {
                route: event.route_name.clone(),
                reason: format!("{} target(s) could not be cleared", outcome.failures),
            })
        }
    }

    /// Apply entity changes reported by a service for the given tenant
    ///
    /// Never fails; failures are logged and counted in the outcome.
    pub async fn invalidate(
        &self,
        ctx: &TenantContext,
        changes: &[EntityChange],
    ) -> InvalidationOutcome {
        self.apply(ctx, changes, None).await
    }

    async fn apply(
        &self,
        ctx: &TenantContext,
        changes: &[EntityChange],
        route: Option<&str>,
    ) -> InvalidationOutcome {
        let mut total = InvalidationOutcome::default();

        for change in changes {
            let applied = AssertUnwindSafe(self.manager.apply(ctx.tenant_id(), change))
                .catch_unwind()
                .await;

            let outcome = match applied {
                Ok(outcome) => outcome,
                Err(panic) => {
                    error!(
                        domain = "cache_invalidation",
                        route = route.unwrap_or_default(),
                        tenant = %ctx.tenant_id(),
                        change = ?change,
                        error = %panic_message(panic.as_ref()),
                        "Cache invalidation panicked"
                    );
                    InvalidationOutcome {
                        removed: 0,
                        failures: 1,
                    }
                }
            };

            info!(
                target: "tenant_cache::audit",
                tenant = %ctx.tenant_id(),
                tenant_source = %ctx.source(),
                route = route.unwrap_or_default(),
                entity = %change.domain(),
                change = ?change,
                removed = outcome.removed,
                failures = outcome.failures,
                "Cache invalidated"
            );

            total.removed += outcome.removed;
            total.failures += outcome.failures;
        }

        total
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
