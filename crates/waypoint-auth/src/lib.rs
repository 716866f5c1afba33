//! # waypoint-auth
//!
//! Self-service login flows and OpenID Connect federation for Waypoint.
//!
//! This crate provides:
//! - The login flow model and its tenant-scoped storage contract
//! - An in-memory flow store for tests and single-node setups
//! - Batched expiry sweeping of stale flows
//! - OpenID Connect provider clients (generic and Google)
//! - ID token verification against a provider's published keys
//! - A per-tenant provider registry
//!
//! ## Modules
//!
//! - [`context`] - Request context, deadlines and tenant resolution
//! - [`config`] - Self-service configuration
//! - [`flow`] - Login flow model
//! - [`storage`] - Login flow storage trait and in-memory store
//! - [`federation`] - External identity provider integration
//! - [`error`] - Error types

pub mod config;
pub mod context;
pub mod error;
pub mod federation;
pub mod flow;
pub mod storage;

pub use config::{ConfigError, SelfServiceConfig};
pub use context::{ContextualTenant, Nid, RequestContext, TenantResolver};
pub use error::{AuthError, ErrorCategory};
pub use federation::{
    Claims, ClientSettings, GenericOidcProvider, GoogleProvider, Provider, ProviderConfig,
    ProviderKind, ProviderRegistry, TokenResponse,
};
pub use flow::{FlowState, InternalContext, LoginFlow};
pub use storage::{DeleteExpiredReport, InMemoryLoginFlowStorage, LoginFlowStorage};

/// Type alias for self-service results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use waypoint_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{ConfigError, SelfServiceConfig};
    pub use crate::context::{ContextualTenant, Nid, RequestContext, TenantResolver};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::federation::{
        Claims, ClientSettings, Provider, ProviderConfig, ProviderKind, ProviderRegistry,
        TokenResponse,
    };
    pub use crate::flow::{FlowState, LoginFlow};
    pub use crate::storage::{DeleteExpiredReport, LoginFlowStorage};
}
