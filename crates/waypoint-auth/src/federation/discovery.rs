//! OpenID Connect Discovery client.
//!
//! Fetches provider metadata from `{issuer}/.well-known/openid-configuration`
//! and validates it before any provider client relies on it.
//!
//! # Security Considerations
//!
//! - Only HTTPS issuer URLs are allowed unless `allow_http` is set
//! - The issuer claim in the document must match the configured issuer
//! - Response size is limited
//!
//! # References
//!
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)

use url::Url;

use super::oidc::OidcDiscoveryDocument;

/// Errors that can occur during OIDC discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A network error occurred while fetching the discovery document.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The discovery document could not be parsed as JSON.
    #[error("Failed to parse discovery document: {0}")]
    ParseError(String),

    /// The issuer URL in the document could not be parsed.
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// The issuer in the discovery document does not match the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The expected issuer URL.
        expected: String,
        /// The actual issuer URL from the discovery document.
        actual: String,
    },

    /// A required field is missing from the discovery document.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// An endpoint in the discovery document is not a valid URL.
    #[error("Invalid {field}: {reason}")]
    InvalidEndpoint {
        /// The document field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The URL scheme is not allowed (must be HTTPS in production).
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

/// Client for fetching OIDC discovery documents.
#[derive(Debug, Clone)]
pub struct OidcDiscoveryClient {
    http_client: reqwest::Client,
    max_response_size: usize,
    allow_http: bool,
}

impl OidcDiscoveryClient {
    /// Creates a discovery client on top of a shared HTTP client.
    ///
    /// Request timeouts are taken from `http_client`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, max_response_size: usize, allow_http: bool) -> Self {
        Self {
            http_client,
            max_response_size,
            allow_http,
        }
    }

    /// Discovers OIDC configuration from an issuer URL.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The issuer URL is not HTTPS (unless `allow_http` is true)
    /// - The discovery document cannot be fetched or parsed
    /// - The issuer in the document does not match the expected issuer
    /// - The document's endpoints are missing or invalid
    pub async fn discover(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        self.validate_issuer_scheme(issuer)?;

        let discovery_url = build_discovery_url(issuer);

        let response = self
            .http_client
            .get(discovery_url.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(%issuer, error = %e, "failed to fetch OIDC discovery document");
                DiscoveryError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_response_size
        {
            return Err(DiscoveryError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::NetworkError(e.to_string()))?;
        if body.len() > self.max_response_size {
            return Err(DiscoveryError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        let document: OidcDiscoveryDocument = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(%issuer, error = %e, "failed to parse OIDC discovery document");
            DiscoveryError::ParseError(e.to_string())
        })?;

        validate_issuer(&document, issuer)?;
        document.endpoint(self.allow_http)?;
        document.jwks_url(self.allow_http)?;

        tracing::debug!(issuer = %document.issuer, "discovered OIDC configuration");

        Ok(document)
    }

    fn validate_issuer_scheme(&self, issuer: &Url) -> Result<(), DiscoveryError> {
        match issuer.scheme() {
            "https" => Ok(()),
            "http" if self.allow_http => Ok(()),
            other => Err(DiscoveryError::InvalidScheme(other.to_string())),
        }
    }
}

/// Builds `{issuer}/.well-known/openid-configuration`.
fn build_discovery_url(issuer: &Url) -> Url {
    let mut discovery_url = issuer.clone();
    let path = issuer.path().trim_end_matches('/');
    discovery_url.set_path(&format!("{}/.well-known/openid-configuration", path));
    discovery_url
}

/// The issuer in the document must be identical to the configured issuer,
/// ignoring a trailing slash.
fn validate_issuer(document: &OidcDiscoveryDocument, expected: &Url) -> Result<(), DiscoveryError> {
    let document_issuer = Url::parse(&document.issuer).map_err(|e| {
        DiscoveryError::InvalidIssuer(format!("{} - {}", document.issuer, e))
    })?;

    let expected_normalized = expected.as_str().trim_end_matches('/');
    let document_normalized = document_issuer.as_str().trim_end_matches('/');

    if expected_normalized != document_normalized {
        return Err(DiscoveryError::IssuerMismatch {
            expected: expected_normalized.to_string(),
            actual: document_normalized.to_string(),
        });
    }

    Ok(())
}
