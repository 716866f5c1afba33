//! Error types for external identity provider operations.
//!
//! [`IdpError`] is internal to the federation layer. Provider clients convert
//! it into [`AuthError`] with [`IdpError::into_auth`] before returning, so that
//! callers only ever see the public taxonomy.

use super::discovery::DiscoveryError;
use super::jwks::JwksError;
use super::verifier::VerifyError;
use crate::error::AuthError;

/// Errors that can occur while talking to an external identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    /// Failed to fetch or validate the OIDC discovery document.
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Failed to fetch the provider's signing keys.
    #[error("JWKS error: {0}")]
    Jwks(#[from] JwksError),

    /// The ID token failed verification.
    #[error("ID token verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// The token response did not carry an `id_token`.
    #[error("Token response is missing the id_token field")]
    IdentityTokenMissing,

    /// The token endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The token endpoint answered with an error status.
    #[error("Token endpoint returned HTTP {status}: {error}")]
    TokenEndpoint {
        /// HTTP status code.
        status: u16,
        /// OAuth error code, or a short description when the body was not
        /// an OAuth error document.
        error: String,
    },

    /// The token endpoint returned a body that is not a token response.
    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),
}

impl IdpError {
    /// Creates a `TokenEndpoint` error.
    #[must_use]
    pub fn token_endpoint(status: u16, error: impl Into<String>) -> Self {
        Self::TokenEndpoint {
            status,
            error: error.into(),
        }
    }

    /// Returns `true` if the provider was unreachable or misbehaving, as
    /// opposed to rejecting this particular login attempt.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        match self {
            Self::Discovery(_) | Self::Jwks(_) | Self::Network(_) => true,
            Self::TokenEndpoint { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is an ID token verification error.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Verify(_) | Self::IdentityTokenMissing)
    }

    /// Converts into the public error taxonomy, attributing the failure to
    /// `provider`.
    #[must_use]
    pub fn into_auth(self, provider: &str) -> AuthError {
        if self.is_external_error() {
            return AuthError::provider_unavailable(provider, self.to_string());
        }
        match self {
            Self::Verify(reason) => AuthError::claims_invalid(provider, reason.to_string()),
            Self::IdentityTokenMissing => AuthError::identity_token_missing(provider),
            other => AuthError::token_exchange_failed(provider, other.to_string()),
        }
    }
}
