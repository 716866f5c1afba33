//! Request context and tenant resolution.
//!
//! Every store and provider call receives a [`RequestContext`] explicitly.
//! It carries the tenant the request was routed to (if any) and the caller's
//! deadline. The tenant a query is filtered on is always derived from the
//! context through a [`TenantResolver`], never from entity data supplied by
//! the caller.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;

/// Tenant (network) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nid(Uuid);

impl Nid {
    /// Creates a new random tenant ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a tenant ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Nid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Nid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for Nid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-request context threaded through every store and provider call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    tenant: Option<Nid>,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates an empty context (no tenant hint, no deadline).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context scoped to the given tenant.
    #[must_use]
    pub fn for_tenant(nid: Nid) -> Self {
        Self::new().with_tenant(nid)
    }

    /// Sets the tenant this request was routed to.
    #[must_use]
    pub fn with_tenant(mut self, nid: Nid) -> Self {
        self.tenant = Some(nid);
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the tenant hint carried by this context.
    #[must_use]
    pub fn tenant(&self) -> Option<Nid> {
        self.tenant
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Runs a fallible future, aborting it once the deadline passes.
    ///
    /// The future is dropped on expiry, which cancels any in-flight storage
    /// query or HTTP request it owns.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DeadlineExceeded`] if the deadline passes first,
    /// otherwise whatever the future returns.
    pub async fn run<F, T>(&self, fut: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| AuthError::DeadlineExceeded)?,
            None => fut.await,
        }
    }
}

/// Resolves the tenant a request operates on.
pub trait TenantResolver: Send + Sync {
    /// Returns the tenant for this request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantUnresolved`] if no tenant applies.
    fn resolve_tenant(&self, ctx: &RequestContext) -> AuthResult<Nid>;
}

/// Resolver that prefers the context's tenant and falls back to a default
/// network ID.
#[derive(Debug, Clone, Copy)]
pub struct ContextualTenant {
    default_nid: Option<Nid>,
}

impl ContextualTenant {
    /// Creates a resolver with a default network ID for single-tenant
    /// deployments and requests without a tenant hint.
    #[must_use]
    pub fn new(default_nid: Nid) -> Self {
        Self {
            default_nid: Some(default_nid),
        }
    }

    /// Creates a resolver that requires every context to carry a tenant.
    #[must_use]
    pub fn strict() -> Self {
        Self { default_nid: None }
    }
}

impl TenantResolver for ContextualTenant {
    fn resolve_tenant(&self, ctx: &RequestContext) -> AuthResult<Nid> {
        ctx.tenant()
            .or(self.default_nid)
            .ok_or(AuthError::TenantUnresolved)
    }
}
