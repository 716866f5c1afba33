//! Generic OpenID Connect provider client.
//!
//! A client starts with only its static configuration. The first call that
//! needs provider metadata runs discovery and caches the result, together
//! with the provider's key set and a claims verifier, for the lifetime of
//! this instance. Concurrent first callers share one discovery; a failed
//! discovery caches nothing, so the next call tries again.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use super::ClientSettings;
use super::claims::Claims;
use super::discovery::OidcDiscoveryClient;
use super::error::IdpError;
use super::jwks::RemoteKeySet;
use super::oidc::{Endpoint, OidcDiscoveryDocument};
use super::provider::{Provider, ProviderConfig};
use super::token::{AuthUrlParam, OAuth2Config, TokenResponse};
use super::verifier::{ClaimsVerifier, key_id};
use crate::AuthResult;
use crate::context::RequestContext;
use crate::flow::LoginFlow;

/// Scope every OpenID Connect request must carry.
pub const OPENID_SCOPE: &str = "openid";

/// Returns `requested` with `openid` appended if it is missing.
///
/// Order is preserved and nothing else is deduplicated.
#[must_use]
pub fn with_openid_scope(requested: &[String]) -> Vec<String> {
    let mut scopes = requested.to_vec();
    if !scopes.iter().any(|s| s == OPENID_SCOPE) {
        scopes.push(OPENID_SCOPE.to_string());
    }
    scopes
}

/// Provider metadata resolved by discovery.
pub struct DiscoveredProvider {
    /// The validated discovery document.
    pub document: OidcDiscoveryDocument,
    /// Authorization and token endpoints.
    pub endpoint: Endpoint,
    /// The provider's signing keys.
    pub keys: RemoteKeySet,
    /// Verifier bound to the discovered issuer and this client ID.
    pub verifier: ClaimsVerifier,
}

/// Client for one OpenID Connect provider.
pub struct GenericOidcProvider {
    config: ProviderConfig,
    issuer: Url,
    redirect_url: Url,
    settings: ClientSettings,
    http_client: reqwest::Client,
    discovery: OidcDiscoveryClient,
    accepted_issuers: Vec<String>,
    discovered: OnceCell<DiscoveredProvider>,
}

impl GenericOidcProvider {
    /// Creates a client. No network access happens here.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the issuer or redirect URL cannot be
    /// derived from the configuration.
    pub fn new(
        config: ProviderConfig,
        settings: &ClientSettings,
        http_client: reqwest::Client,
    ) -> AuthResult<Self> {
        let issuer = config.effective_issuer()?;
        let redirect_url = config.redirect_url(&settings.public_base_url)?;
        let discovery = OidcDiscoveryClient::new(
            http_client.clone(),
            settings.max_response_size,
            settings.allow_http,
        );

        Ok(Self {
            config,
            issuer,
            redirect_url,
            settings: settings.clone(),
            http_client,
            discovery,
            accepted_issuers: Vec::new(),
            discovered: OnceCell::new(),
        })
    }

    /// Also accepts `issuer` as the `iss` of ID tokens.
    #[must_use]
    pub fn with_accepted_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.accepted_issuers.push(issuer.into());
        self
    }

    /// The issuer this client discovers.
    #[must_use]
    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    /// Returns `true` once discovery succeeded.
    #[must_use]
    pub fn is_discovered(&self) -> bool {
        self.discovered.initialized()
    }

    /// Returns the discovered provider metadata, running discovery on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` if discovery fails, or
    /// `DeadlineExceeded` if the context deadline passes first. Neither is
    /// cached.
    pub async fn provider(&self, ctx: &RequestContext) -> AuthResult<&DiscoveredProvider> {
        ctx.run(self.discovered.get_or_try_init(|| self.discover()))
            .await
    }

    async fn discover(&self) -> AuthResult<DiscoveredProvider> {
        let id = self.config.id.as_str();
        debug!(provider = id, issuer = %self.issuer, "running OIDC discovery");

        let fail = |e: IdpError| {
            warn!(provider = id, error = %e, "OIDC discovery failed");
            e.into_auth(id)
        };

        let document = self
            .discovery
            .discover(&self.issuer)
            .await
            .map_err(|e| fail(e.into()))?;
        let endpoint = document
            .endpoint(self.settings.allow_http)
            .map_err(|e| fail(e.into()))?;
        let jwks_uri = document
            .jwks_url(self.settings.allow_http)
            .map_err(|e| fail(e.into()))?;

        let keys = RemoteKeySet::new(jwks_uri, self.http_client.clone(), self.settings.jwks.clone());
        let verifier = self.accepted_issuers.iter().fold(
            ClaimsVerifier::new(&document.issuer, self.config.client_id.clone())
                .with_leeway(self.settings.clock_skew_tolerance),
            |verifier, issuer| verifier.with_accepted_issuer(issuer),
        );

        Ok(DiscoveredProvider {
            document,
            endpoint,
            keys,
            verifier,
        })
    }

    /// The `claims` request parameter, if configured and supported by the
    /// provider.
    fn requested_claims(&self, document: &OidcDiscoveryDocument) -> Option<serde_json::Value> {
        let claims = self.config.requested_claims.as_ref()?;
        if !document.claims_parameter_supported {
            warn!(
                provider = %self.config.id,
                "provider does not support the claims parameter, not sending it"
            );
            return None;
        }
        Some(claims.clone())
    }
}

#[async_trait]
impl Provider for GenericOidcProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn oauth2_config(&self, ctx: &RequestContext) -> AuthResult<OAuth2Config> {
        let discovered = self.provider(ctx).await?;
        Ok(OAuth2Config {
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            endpoint: discovered.endpoint.clone(),
            scopes: with_openid_scope(&self.config.scopes),
            redirect_url: self.redirect_url.clone(),
            claims: self.requested_claims(&discovered.document),
        })
    }

    fn auth_code_url_options(&self, flow: &LoginFlow) -> Vec<AuthUrlParam> {
        if flow.is_forced() {
            vec![AuthUrlParam::prompt("login")]
        } else {
            Vec::new()
        }
    }

    #[instrument(skip_all, fields(provider = %self.config.id))]
    async fn claims(&self, ctx: &RequestContext, token: &TokenResponse) -> AuthResult<Claims> {
        let id = self.config.id.as_str();
        let reject = |e: IdpError| {
            if e.is_validation_error() {
                warn!(reason = %e, "ID token rejected");
            }
            e.into_auth(id)
        };

        let raw = token
            .id_token()
            .ok_or_else(|| reject(IdpError::IdentityTokenMissing))?;

        let discovered = self.provider(ctx).await?;

        let kid = key_id(raw).map_err(|e| reject(e.into()))?;
        let keys = ctx
            .run(async {
                discovered
                    .keys
                    .keys_for(&kid)
                    .await
                    .map_err(|e| IdpError::from(e).into_auth(id))
            })
            .await?;

        let claims = discovered
            .verifier
            .verify(&keys, raw)
            .map_err(|e| reject(e.into()))?;

        debug!("ID token verified");
        Ok(claims)
    }

    #[instrument(skip_all, fields(provider = %self.config.id))]
    async fn exchange_code(&self, ctx: &RequestContext, code: &str) -> AuthResult<TokenResponse> {
        let config = self.oauth2_config(ctx).await?;
        ctx.run(async {
            config
                .exchange(&self.http_client, code)
                .await
                .map_err(|e| e.into_auth(&self.config.id))
        })
        .await
    }
}
