//! Identity provider configuration and the provider capability trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::claims::Claims;
use super::token::{AuthUrlParam, OAuth2Config, TokenResponse};
use crate::AuthResult;
use crate::config::ConfigError;
use crate::context::RequestContext;
use crate::error::AuthError;
use crate::flow::LoginFlow;

/// Issuer used by Google when none is configured.
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Which provider implementation serves a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenID Connect provider reachable through discovery.
    #[default]
    Generic,
    /// Google, with its `offline_access` and issuer conventions.
    Google,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Google => write!(f, "google"),
        }
    }
}

/// Static configuration of one external identity provider for one tenant.
///
/// Immutable for the lifetime of the provider client built from it.
///
/// # Example (TOML)
///
/// ```toml
/// [[federation.providers]]
/// id = "okta"
/// kind = "generic"
/// issuer_url = "https://example.okta.com"
/// client_id = "0oa1b2c3"
/// client_secret = "..."
/// scopes = ["email", "profile"]
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider ID, unique per tenant. Appears in the callback URL.
    pub id: String,

    /// Provider implementation.
    #[serde(default)]
    pub kind: ProviderKind,

    /// Issuer URL used for discovery. Optional for Google.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<Url>,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Requested scopes. `openid` is always added.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Location of the claims mapper used by the identity layer. Passed
    /// through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapper_url: Option<String>,

    /// Value of the OIDC `claims` request parameter, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_claims: Option<serde_json::Value>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("issuer_url", &self.issuer_url.as_ref().map(Url::as_str))
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("mapper_url", &self.mapper_url)
            .field("requested_claims", &self.requested_claims)
            .finish()
    }
}

impl ProviderConfig {
    /// Creates a configuration with no secret and no extra scopes.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ProviderKind, client_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            issuer_url: None,
            client_id: client_id.into(),
            client_secret: String::new(),
            scopes: Vec::new(),
            mapper_url: None,
            requested_claims: None,
        }
    }

    /// Sets the issuer URL.
    #[must_use]
    pub fn with_issuer(mut self, issuer_url: Url) -> Self {
        self.issuer_url = Some(issuer_url);
        self
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = secret.into();
        self
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the `claims` request parameter.
    #[must_use]
    pub fn with_requested_claims(mut self, claims: serde_json::Value) -> Self {
        self.requested_claims = Some(claims);
        self
    }

    /// The issuer to discover, applying per-kind defaults.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no issuer is configured and the kind has
    /// no default.
    pub fn effective_issuer(&self) -> AuthResult<Url> {
        match (&self.issuer_url, self.kind) {
            (Some(url), _) => Ok(url.clone()),
            (None, ProviderKind::Google) => Url::parse(GOOGLE_ISSUER)
                .map_err(|e| AuthError::configuration(e.to_string())),
            (None, ProviderKind::Generic) => Err(AuthError::configuration(format!(
                "provider {} has no issuer_url",
                self.id
            ))),
        }
    }

    /// The callback URL for this provider:
    /// `{public_base}/self-service/methods/oidc/callback/{id}`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `public_base` cannot carry a path.
    pub fn redirect_url(&self, public_base: &Url) -> AuthResult<Url> {
        let mut url = public_base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| {
                AuthError::configuration(format!("public base URL {} cannot be a base", public_base))
            })?
            .pop_if_empty()
            .extend(["self-service", "methods", "oidc", "callback", self.id.as_str()]);
        Ok(url)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for an empty ID or client ID, or a
    /// generic provider without an issuer, and `ConfigError::InvalidValue`
    /// for an ID that is not URL-safe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Missing("provider id".to_string()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ConfigError::InvalidValue(format!(
                "provider id '{}' may only contain letters, digits, '-', '_' and '.'",
                self.id
            )));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing(format!(
                "client_id for provider {}",
                self.id
            )));
        }
        if self.kind == ProviderKind::Generic && self.issuer_url.is_none() {
            return Err(ConfigError::Missing(format!(
                "issuer_url for provider {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Capabilities every external identity provider offers.
///
/// Each provider kind is a separate implementation selected by
/// [`ProviderKind`]; the registry hands them out as `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The static configuration this client was built from.
    fn config(&self) -> &ProviderConfig;

    /// Builds the OAuth 2.0 client configuration, discovering the provider
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` if discovery fails.
    async fn oauth2_config(&self, ctx: &RequestContext) -> AuthResult<OAuth2Config>;

    /// Extra authorization request parameters for `flow`.
    fn auth_code_url_options(&self, flow: &LoginFlow) -> Vec<AuthUrlParam>;

    /// Extracts and verifies the identity token carried by `token`.
    ///
    /// This is the exchange-and-verify step for a token response the caller
    /// already holds; [`exchange_and_verify`](Self::exchange_and_verify)
    /// starts from an authorization code instead.
    ///
    /// # Errors
    ///
    /// Returns `IdentityTokenMissing` without any verification attempt if
    /// the response has no `id_token`, `ProviderUnavailable` if discovery or
    /// key retrieval fails, and `ClaimsInvalid` if verification fails.
    async fn claims(&self, ctx: &RequestContext, token: &TokenResponse) -> AuthResult<Claims>;

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` on network failures and 5xx responses,
    /// `TokenExchangeFailed` when the provider rejects the code.
    async fn exchange_code(&self, ctx: &RequestContext, code: &str) -> AuthResult<TokenResponse>;

    /// The provider ID.
    fn id(&self) -> &str {
        &self.config().id
    }

    /// Builds the URL to redirect the user to for `flow`.
    ///
    /// # Errors
    ///
    /// Same as [`oauth2_config`](Self::oauth2_config).
    async fn authorization_url(
        &self,
        ctx: &RequestContext,
        flow: &LoginFlow,
        state: &str,
    ) -> AuthResult<Url> {
        let config = self.oauth2_config(ctx).await?;
        Ok(config.auth_code_url(state, &self.auth_code_url_options(flow)))
    }

    /// Exchanges `code` and verifies the resulting identity token.
    ///
    /// Equivalent to [`exchange_code`](Self::exchange_code) followed by
    /// [`claims`](Self::claims) on the returned token response.
    ///
    /// # Errors
    ///
    /// Fails at the first failing step: exchange, token extraction, then
    /// verification.
    async fn exchange_and_verify(&self, ctx: &RequestContext, code: &str) -> AuthResult<Claims> {
        let token = self.exchange_code(ctx, code).await?;
        self.claims(ctx, &token).await
    }
}
