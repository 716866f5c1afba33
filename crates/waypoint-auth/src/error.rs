//! Authentication error types.
//!
//! This module defines the error taxonomy surfaced by the login flow store and
//! the federation layer. Lower layers (storage drivers, HTTP clients, JWT
//! decoding) are translated into these kinds at their boundary and never leak
//! upward.

use std::fmt;

use uuid::Uuid;

/// Errors that can occur while managing login flows or federating with an
/// external identity provider.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The requested entity does not exist for the resolved tenant.
    #[error("Not found: {resource}")]
    NotFound {
        /// Description of the missing entity.
        resource: String,
    },

    /// The entity already exists.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// An internal invariant was broken. Indicates a bug, never retry.
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    /// The backing store is temporarily unavailable.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the infrastructure failure.
        message: String,
    },

    /// The external identity provider could not be reached or returned
    /// unusable metadata.
    #[error("Identity provider unavailable: {provider} - {message}")]
    ProviderUnavailable {
        /// The provider ID.
        provider: String,
        /// Description of the failure.
        message: String,
    },

    /// The token response did not carry an identity token.
    #[error("Identity provider {provider} did not return an ID token")]
    IdentityTokenMissing {
        /// The provider ID.
        provider: String,
    },

    /// The identity token failed verification.
    #[error("ID token from {provider} is invalid: {reason}")]
    ClaimsInvalid {
        /// The provider ID.
        provider: String,
        /// Why verification failed. Never contains the token or key material.
        reason: String,
    },

    /// No provider with this ID is configured for the tenant.
    #[error("Identity provider not found: {provider}")]
    ProviderNotFound {
        /// The provider ID.
        provider: String,
    },

    /// The provider rejected the authorization code.
    #[error("Token exchange with {provider} failed: {message}")]
    TokenExchangeFailed {
        /// The provider ID.
        provider: String,
        /// Description of the failure.
        message: String,
    },

    /// The login flow expired.
    #[error("Login flow {id} expired")]
    FlowExpired {
        /// The flow ID.
        id: Uuid,
    },

    /// No tenant could be resolved for the request.
    #[error("Tenant could not be resolved for this request")]
    TenantUnresolved,

    /// The caller's deadline passed before the operation completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `InvariantViolation` error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a new `StoreUnavailable` error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `ProviderUnavailable` error.
    #[must_use]
    pub fn provider_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a new `IdentityTokenMissing` error.
    #[must_use]
    pub fn identity_token_missing(provider: impl Into<String>) -> Self {
        Self::IdentityTokenMissing {
            provider: provider.into(),
        }
    }

    /// Creates a new `ClaimsInvalid` error.
    #[must_use]
    pub fn claims_invalid(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClaimsInvalid {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `ProviderNotFound` error.
    #[must_use]
    pub fn provider_not_found(provider: impl Into<String>) -> Self {
        Self::ProviderNotFound {
            provider: provider.into(),
        }
    }

    /// Creates a new `TokenExchangeFailed` error.
    #[must_use]
    pub fn token_exchange_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TokenExchangeFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller may retry the operation with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::ProviderUnavailable { .. }
                | Self::DeadlineExceeded
        )
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the failure was caused by the request or the
    /// end-user rather than by infrastructure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Conflict { .. }
                | Self::IdentityTokenMissing { .. }
                | Self::ClaimsInvalid { .. }
                | Self::ProviderNotFound { .. }
                | Self::TokenExchangeFailed { .. }
                | Self::FlowExpired { .. }
                | Self::TenantUnresolved
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::Conflict { .. } => ErrorCategory::Flow,
            Self::FlowExpired { .. } => ErrorCategory::Flow,
            Self::InvariantViolation { .. } => ErrorCategory::Internal,
            Self::StoreUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::DeadlineExceeded => ErrorCategory::Infrastructure,
            Self::ProviderUnavailable { .. }
            | Self::ProviderNotFound { .. }
            | Self::TokenExchangeFailed { .. } => ErrorCategory::Federation,
            Self::IdentityTokenMissing { .. } | Self::ClaimsInvalid { .. } => {
                ErrorCategory::Verification
            }
            Self::TenantUnresolved => ErrorCategory::Tenancy,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns a message that is safe to show to the end-user.
    ///
    /// Terminal failures collapse into a generic message so that verification
    /// reasons, provider internals and tenant existence are not disclosed.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::FlowExpired { .. } => "The login flow expired, please start again",
            Self::NotFound { .. } => "The login flow could not be found",
            _ if self.is_retryable() => {
                "Authentication is temporarily unavailable, please try again"
            }
            _ => "Authentication failed",
        }
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Login flow lifecycle errors.
    Flow,
    /// Errors talking to an external identity provider.
    Federation,
    /// Identity token verification errors.
    Verification,
    /// Tenant resolution errors.
    Tenancy,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors (bugs).
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flow => write!(f, "flow"),
            Self::Federation => write!(f, "federation"),
            Self::Verification => write!(f, "verification"),
            Self::Tenancy => write!(f, "tenancy"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::not_found("Login flow 42");
        assert_eq!(err.to_string(), "Not found: Login flow 42");

        let err = AuthError::provider_unavailable("google", "connection refused");
        assert_eq!(
            err.to_string(),
            "Identity provider unavailable: google - connection refused"
        );

        let err = AuthError::identity_token_missing("okta");
        assert_eq!(
            err.to_string(),
            "Identity provider okta did not return an ID token"
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(AuthError::store_unavailable("pool timed out").is_retryable());
        assert!(AuthError::provider_unavailable("p", "down").is_retryable());
        assert!(AuthError::DeadlineExceeded.is_retryable());

        assert!(!AuthError::not_found("x").is_retryable());
        assert!(!AuthError::conflict("x").is_retryable());
        assert!(!AuthError::invariant("x").is_retryable());
        assert!(!AuthError::identity_token_missing("p").is_retryable());
        assert!(!AuthError::claims_invalid("p", "bad signature").is_retryable());
    }

    #[test]
    fn test_public_message_does_not_leak_reason() {
        let err = AuthError::claims_invalid("p", "audience mismatch: client-xyz");
        let msg = err.public_message();
        assert_eq!(msg, "Authentication failed");
        assert!(!msg.contains("audience"));

        let err = AuthError::provider_unavailable("p", "10.0.0.1 refused");
        assert!(!err.public_message().contains("10.0.0.1"));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(AuthError::not_found("x").category(), ErrorCategory::Flow);
        assert_eq!(
            AuthError::claims_invalid("p", "r").category(),
            ErrorCategory::Verification
        );
        assert_eq!(
            AuthError::provider_unavailable("p", "m").category(),
            ErrorCategory::Federation
        );
        assert_eq!(
            AuthError::store_unavailable("m").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(AuthError::TenantUnresolved.category(), ErrorCategory::Tenancy);
        assert_eq!(ErrorCategory::Verification.to_string(), "verification");
    }
}
