//! OAuth 2.0 client configuration, authorization URLs and code exchange.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::IdpError;
use super::oidc::Endpoint;

/// OAuth token response from the provider.
///
/// Provider-specific fields (such as `id_token`) are kept in
/// [`extra`](Self::extra).
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// The token type (usually "Bearer").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Token expiration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Optional refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// All other fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    /// Creates a response carrying only an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".to_string()),
            expires_in: None,
            refresh_token: None,
            scope: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Adds a provider-specific field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns the `id_token` field if it is a non-empty string.
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.extra
            .get("id_token")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .field("id_token", &self.id_token().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// OAuth error response from the provider.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// An extra authorization request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUrlParam {
    /// Parameter name.
    pub key: String,
    /// Parameter value.
    pub value: String,
}

impl AuthUrlParam {
    /// Creates a parameter.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `prompt=<value>`.
    #[must_use]
    pub fn prompt(value: impl Into<String>) -> Self {
        Self::new("prompt", value)
    }
}

/// Everything needed to run an authorization code flow against one provider.
#[derive(Clone)]
pub struct OAuth2Config {
    /// Client ID.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Discovered endpoint pair.
    pub endpoint: Endpoint,
    /// Effective scopes, in request order.
    pub scopes: Vec<String>,
    /// Where the provider redirects back to.
    pub redirect_url: Url,
    /// Value of the `claims` request parameter. Only set when the provider
    /// advertises support for it.
    pub claims: Option<serde_json::Value>,
}

impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("scopes", &self.scopes)
            .field("redirect_url", &self.redirect_url.as_str())
            .field("claims", &self.claims)
            .finish()
    }
}

impl OAuth2Config {
    /// Builds the URL the user is redirected to.
    ///
    /// `params` are the per-flow options; the configured `claims` request
    /// parameter is added independently of them.
    #[must_use]
    pub fn auth_code_url(&self, state: &str, params: &[AuthUrlParam]) -> Url {
        let mut url = self.endpoint.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", self.redirect_url.as_str());
            query.append_pair("scope", &self.scopes.join(" "));
            query.append_pair("state", state);
            if let Some(claims) = &self.claims {
                query.append_pair("claims", &claims.to_string());
            }
            for param in params {
                query.append_pair(&param.key, &param.value);
            }
        }
        url
    }

    /// Exchanges an authorization code at the token endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the endpoint is unreachable, `TokenEndpoint` on
    /// an error status and `InvalidTokenResponse` if the body cannot be
    /// parsed.
    pub async fn exchange(
        &self,
        http_client: &reqwest::Client,
        code: &str,
    ) -> Result<TokenResponse, IdpError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        tracing::debug!(token_endpoint = %self.endpoint.token_url, "exchanging authorization code");

        let response = http_client
            .post(self.endpoint.token_url.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| IdpError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = match serde_json::from_str::<OAuthErrorResponse>(&body) {
                Ok(oauth) => match oauth.error_description {
                    Some(description) => format!("{} - {}", oauth.error, description),
                    None => oauth.error,
                },
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            };
            tracing::warn!(status = status.as_u16(), %error, "token exchange rejected");
            return Err(IdpError::token_endpoint(status.as_u16(), error));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| IdpError::InvalidTokenResponse(e.to_string()))
    }
}
