//! OpenID Connect Discovery Document types.
//!
//! Only the metadata a relying party needs is modelled; everything else in
//! the provider's document is ignored.

use serde::{Deserialize, Serialize};
use url::Url;

use super::discovery::DiscoveryError;

/// OpenID Connect Discovery Document.
///
/// Returned from the `.well-known/openid-configuration` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcDiscoveryDocument {
    /// URL that the OP asserts as its Issuer Identifier.
    pub issuer: String,

    /// URL of the OP's Authorization Endpoint.
    pub authorization_endpoint: String,

    /// URL of the OP's Token Endpoint.
    pub token_endpoint: String,

    /// URL of the OP's JSON Web Key Set document.
    pub jwks_uri: String,

    /// Supported OAuth 2.0 `response_type` values.
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported JWS algorithms for the ID Token.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// URL of the OP's UserInfo Endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// Supported scope values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Claim names the OP may supply values for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims_supported: Option<Vec<String>>,

    /// Whether the `claims` request parameter is supported.
    #[serde(default)]
    pub claims_parameter_supported: bool,

    /// URL for RP-initiated logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
}

/// The endpoint pair a relying party redirects to and exchanges codes at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Authorization endpoint.
    pub auth_url: Url,
    /// Token endpoint.
    pub token_url: Url,
}

impl OidcDiscoveryDocument {
    /// Parses the endpoint pair.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is not a valid URL or uses a
    /// scheme other than HTTPS (HTTP only when `allow_http` is set).
    pub fn endpoint(&self, allow_http: bool) -> Result<Endpoint, DiscoveryError> {
        Ok(Endpoint {
            auth_url: parse_endpoint(
                "authorization_endpoint",
                &self.authorization_endpoint,
                allow_http,
            )?,
            token_url: parse_endpoint("token_endpoint", &self.token_endpoint, allow_http)?,
        })
    }

    /// Parses the JWKS URI.
    ///
    /// # Errors
    ///
    /// Same rules as [`endpoint`](Self::endpoint).
    pub fn jwks_url(&self, allow_http: bool) -> Result<Url, DiscoveryError> {
        parse_endpoint("jwks_uri", &self.jwks_uri, allow_http)
    }
}

fn parse_endpoint(field: &str, value: &str, allow_http: bool) -> Result<Url, DiscoveryError> {
    if value.is_empty() {
        return Err(DiscoveryError::MissingField(field.to_string()));
    }
    let url = Url::parse(value).map_err(|e| DiscoveryError::InvalidEndpoint {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_http => Ok(url),
        other => Err(DiscoveryError::InvalidScheme(other.to_string())),
    }
}
