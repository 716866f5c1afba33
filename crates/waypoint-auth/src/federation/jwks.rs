//! Provider JWKS fetching and caching.
//!
//! Each provider client owns one [`RemoteKeySet`] for the `jwks_uri` it
//! discovered. The key set is cached with a TTL derived from the provider's
//! `Cache-Control: max-age`, clamped to configured bounds. A token signed
//! with a key ID the cached set does not know triggers one refresh, which is
//! how provider key rotation is picked up.
//!
//! Refreshes are single-flight: concurrent callers that all miss wait for
//! one fetch and then share its result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use tokio::sync::{Mutex, RwLock};
use url::Url;

/// Configuration for a provider key set cache.
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// TTL when the provider sends no `Cache-Control: max-age` (default: 1 hour).
    pub default_ttl: Duration,

    /// Upper bound for the TTL (default: 24 hours).
    pub max_ttl: Duration,

    /// Lower bound for the TTL (default: 5 minutes).
    pub min_ttl: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(300),
            max_response_size: 1024 * 1024,
        }
    }
}

impl JwksCacheConfig {
    /// Sets the default TTL (used when Cache-Control is absent).
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the TTL bounds.
    #[must_use]
    pub fn with_ttl_bounds(mut self, min_ttl: Duration, max_ttl: Duration) -> Self {
        self.min_ttl = min_ttl;
        self.max_ttl = max_ttl;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }
}

/// Errors that can occur while fetching a JWKS.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// A network error occurred while fetching the JWKS.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The JWKS response could not be parsed as JSON.
    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

struct CachedJwks {
    jwks: Arc<JwkSet>,
    fetched_at: Instant,
    expires_at: Instant,
}

/// The signing keys published at one provider's `jwks_uri`.
pub struct RemoteKeySet {
    jwks_uri: Url,
    http_client: reqwest::Client,
    config: JwksCacheConfig,
    cached: RwLock<Option<CachedJwks>>,
    refresh_lock: Mutex<()>,
}

impl RemoteKeySet {
    /// Creates an empty key set. Nothing is fetched until first use.
    #[must_use]
    pub fn new(jwks_uri: Url, http_client: reqwest::Client, config: JwksCacheConfig) -> Self {
        Self {
            jwks_uri,
            http_client,
            config,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The JWKS endpoint.
    #[must_use]
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Returns a key set that should contain `kid`.
    ///
    /// When the cached set does not know `kid`, the set is refreshed once.
    /// The returned set may still lack the key; the verifier reports that.
    ///
    /// # Errors
    ///
    /// Returns an error if a fetch was needed and failed.
    pub async fn keys_for(&self, kid: &str) -> Result<Arc<JwkSet>, JwksError> {
        let Some((jwks, fetched_at)) = self.fresh().await else {
            return self.refresh(None).await;
        };
        if jwks.find(kid).is_some() {
            return Ok(jwks);
        }
        tracing::debug!(jwks_uri = %self.jwks_uri, kid, "unknown key id, refreshing JWKS");
        self.refresh(Some(fetched_at)).await
    }

    async fn fresh(&self) -> Option<(Arc<JwkSet>, Instant)> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|c| Instant::now() < c.expires_at)
            .map(|c| (Arc::clone(&c.jwks), c.fetched_at))
    }

    /// Fetches the key set unless another caller already replaced the
    /// version `seen` while this one waited for the lock.
    async fn refresh(&self, seen: Option<Instant>) -> Result<Arc<JwkSet>, JwksError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some((jwks, fetched_at)) = self.fresh().await
            && Some(fetched_at) != seen
        {
            return Ok(jwks);
        }

        let (jwks, ttl) = self.fetch().await?;
        let jwks = Arc::new(jwks);
        let now = Instant::now();
        *self.cached.write().await = Some(CachedJwks {
            jwks: Arc::clone(&jwks),
            fetched_at: now,
            expires_at: now + ttl,
        });
        Ok(jwks)
    }

    async fn fetch(&self) -> Result<(JwkSet, Duration), JwksError> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "fetching JWKS");

        let response = self
            .http_client
            .get(self.jwks_uri.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(jwks_uri = %self.jwks_uri, error = %e, "failed to fetch JWKS");
                JwksError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(JwksError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(JwksError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let ttl = ttl_from_headers(response.headers(), &self.config);

        let body = response
            .bytes()
            .await
            .map_err(|e| JwksError::NetworkError(e.to_string()))?;
        if body.len() > self.config.max_response_size {
            return Err(JwksError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(jwks_uri = %self.jwks_uri, error = %e, "failed to parse JWKS");
            JwksError::ParseError(e.to_string())
        })?;

        tracing::debug!(
            jwks_uri = %self.jwks_uri,
            keys = jwks.keys.len(),
            ttl_secs = ttl.as_secs(),
            "cached JWKS"
        );

        Ok((jwks, ttl))
    }
}

/// Extracts `max-age` from `Cache-Control` and clamps it between `min_ttl`
/// and `max_ttl`. Falls back to `default_ttl`.
fn ttl_from_headers(headers: &reqwest::header::HeaderMap, config: &JwksCacheConfig) -> Duration {
    let ttl = headers
        .get(reqwest::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split(',').find_map(|directive| {
                directive
                    .trim()
                    .strip_prefix("max-age=")
                    .and_then(|secs| secs.parse::<u64>().ok())
            })
        })
        .map(Duration::from_secs)
        .unwrap_or(config.default_ttl);

    ttl.min(config.max_ttl).max(config.min_ttl)
}
