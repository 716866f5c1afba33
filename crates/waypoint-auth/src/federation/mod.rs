//! Federated login through external OpenID Connect providers.
//!
//! - [`registry::ProviderRegistry`] resolves a provider ID under the current
//!   tenant to a cached [`Provider`] client.
//! - [`generic::GenericOidcProvider`] and [`google::GoogleProvider`] implement
//!   discovery, authorization URLs, code exchange and claims extraction.
//! - [`verifier::ClaimsVerifier`] checks ID token signatures and standard
//!   claims against the provider's [`jwks::RemoteKeySet`].

pub mod claims;
pub mod discovery;
pub mod error;
pub mod generic;
pub mod google;
pub mod jwks;
pub mod oidc;
pub mod provider;
pub mod registry;
pub mod token;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

use std::time::Duration;

use url::Url;

pub use claims::Claims;
pub use error::IdpError;
pub use generic::GenericOidcProvider;
pub use google::GoogleProvider;
pub use jwks::JwksCacheConfig;
pub use oidc::Endpoint;
pub use provider::{Provider, ProviderConfig, ProviderKind};
pub use registry::ProviderRegistry;
pub use token::{AuthUrlParam, OAuth2Config, TokenResponse};
pub use verifier::{ClaimsVerifier, VerifyError};

use crate::AuthResult;
use crate::error::AuthError;

/// Settings shared by every provider client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Public base URL of the self-service API. Callback URLs hang off it.
    pub public_base_url: Url,

    /// Timeout for every request to a provider (default: 10 seconds).
    pub request_timeout: Duration,

    /// Clock skew tolerated on `exp` and `nbf` (default: 60 seconds).
    pub clock_skew_tolerance: Duration,

    /// Allow plain HTTP provider URLs. Only for tests and local setups.
    pub allow_http: bool,

    /// Maximum size of a discovery document (default: 1 MB).
    pub max_response_size: usize,

    /// Key set caching.
    pub jwks: JwksCacheConfig,
}

impl ClientSettings {
    /// Creates settings with default values.
    #[must_use]
    pub fn new(public_base_url: Url) -> Self {
        Self {
            public_base_url,
            request_timeout: Duration::from_secs(10),
            clock_skew_tolerance: Duration::from_secs(60),
            allow_http: false,
            max_response_size: 1024 * 1024,
            jwks: JwksCacheConfig::default(),
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_skew_tolerance = tolerance;
        self
    }

    /// Allows HTTP (non-HTTPS) provider URLs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Sets the key set cache configuration.
    #[must_use]
    pub fn with_jwks(mut self, jwks: JwksCacheConfig) -> Self {
        self.jwks = jwks;
        self
    }

    /// Builds the HTTP client shared by all providers.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the TLS backend cannot be initialised.
    pub fn http_client(&self) -> AuthResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {}", e)))
    }
}
