//! Google OpenID Connect dialect.
//!
//! Google does not support the `offline_access` scope. Refresh tokens are
//! requested with `access_type=offline` instead, and Google only returns one
//! on the consent screen, so `prompt=consent` is added as well. Google's ID
//! tokens use either `https://accounts.google.com` or `accounts.google.com`
//! as issuer.

use async_trait::async_trait;

use super::ClientSettings;
use super::claims::Claims;
use super::generic::GenericOidcProvider;
use super::provider::{Provider, ProviderConfig};
use super::token::{AuthUrlParam, OAuth2Config, TokenResponse};
use crate::AuthResult;
use crate::context::RequestContext;
use crate::flow::LoginFlow;

const OFFLINE_ACCESS_SCOPE: &str = "offline_access";
const BARE_ISSUER: &str = "accounts.google.com";

/// Client for Google.
pub struct GoogleProvider {
    inner: GenericOidcProvider,
    offline: bool,
}

impl GoogleProvider {
    /// Creates a client. No network access happens here.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the redirect URL cannot be derived.
    pub fn new(
        config: ProviderConfig,
        settings: &ClientSettings,
        http_client: reqwest::Client,
    ) -> AuthResult<Self> {
        let offline = config.scopes.iter().any(|s| s == OFFLINE_ACCESS_SCOPE);
        let inner =
            GenericOidcProvider::new(config, settings, http_client)?.with_accepted_issuer(BARE_ISSUER);
        Ok(Self { inner, offline })
    }

    /// The underlying OpenID Connect client.
    #[must_use]
    pub fn inner(&self) -> &GenericOidcProvider {
        &self.inner
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn config(&self) -> &ProviderConfig {
        self.inner.config()
    }

    async fn oauth2_config(&self, ctx: &RequestContext) -> AuthResult<OAuth2Config> {
        let mut config = self.inner.oauth2_config(ctx).await?;
        config.scopes.retain(|scope| scope != OFFLINE_ACCESS_SCOPE);
        Ok(config)
    }

    fn auth_code_url_options(&self, flow: &LoginFlow) -> Vec<AuthUrlParam> {
        let mut params = Vec::new();
        let mut prompts = Vec::new();

        if flow.is_forced() {
            prompts.push("login");
        }
        if self.offline {
            params.push(AuthUrlParam::new("access_type", "offline"));
            prompts.push("consent");
        }
        if !prompts.is_empty() {
            params.push(AuthUrlParam::prompt(prompts.join(" ")));
        }
        params
    }

    async fn claims(&self, ctx: &RequestContext, token: &TokenResponse) -> AuthResult<Claims> {
        self.inner.claims(ctx, token).await
    }

    async fn exchange_code(&self, ctx: &RequestContext, code: &str) -> AuthResult<TokenResponse> {
        self.inner.exchange_code(ctx, code).await
    }
}
