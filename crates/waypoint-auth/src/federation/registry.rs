//! Provider registry.
//!
//! Maps `(tenant, provider id)` to a provider configuration and caches one
//! client per pair. Clients are built on first lookup, at most once per key:
//! concurrent lookups for the same pair wait on the map entry and receive the
//! same `Arc`. Replacing a configuration drops the cached client, so the next
//! lookup builds a fresh one; a live client is never mutated.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::ClientSettings;
use super::generic::GenericOidcProvider;
use super::google::GoogleProvider;
use super::provider::{Provider, ProviderConfig, ProviderKind};
use crate::AuthResult;
use crate::context::{Nid, RequestContext, TenantResolver};
use crate::error::AuthError;

type ProviderKey = (Nid, String);

/// Builds the client for `config` according to its kind.
///
/// # Errors
///
/// Returns `Configuration` if the configuration cannot produce a client.
pub fn build_provider(
    config: ProviderConfig,
    settings: &ClientSettings,
    http_client: reqwest::Client,
) -> AuthResult<Arc<dyn Provider>> {
    Ok(match config.kind {
        ProviderKind::Generic => Arc::new(GenericOidcProvider::new(config, settings, http_client)?),
        ProviderKind::Google => Arc::new(GoogleProvider::new(config, settings, http_client)?),
    })
}

/// Per-tenant provider configurations and their cached clients.
pub struct ProviderRegistry {
    configs: DashMap<ProviderKey, ProviderConfig>,
    clients: DashMap<ProviderKey, Arc<dyn Provider>>,
    tenants: Arc<dyn TenantResolver>,
    settings: ClientSettings,
    http_client: reqwest::Client,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the shared HTTP client cannot be built.
    pub fn new(settings: ClientSettings, tenants: Arc<dyn TenantResolver>) -> AuthResult<Self> {
        let http_client = settings.http_client()?;
        Ok(Self {
            configs: DashMap::new(),
            clients: DashMap::new(),
            tenants,
            settings,
            http_client,
        })
    }

    /// Adds or replaces a provider configuration for `nid`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid.
    pub fn upsert_config(&self, nid: Nid, config: ProviderConfig) -> AuthResult<()> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let key = (nid, config.id.clone());
        self.configs.insert(key.clone(), config);
        if self.clients.remove(&key).is_some() {
            info!(%nid, provider = %key.1, "provider configuration replaced");
        }
        Ok(())
    }

    /// Removes a provider configuration and its cached client.
    pub fn remove_config(&self, nid: Nid, provider_id: &str) -> Option<ProviderConfig> {
        let key = (nid, provider_id.to_string());
        let removed = self.configs.remove(&key).map(|(_, config)| config);
        self.clients.remove(&key);
        removed
    }

    /// Resolves `provider_id` under the request's tenant.
    ///
    /// # Errors
    ///
    /// Returns `TenantUnresolved` if no tenant applies, `ProviderNotFound`
    /// if the tenant has no such provider, and `Configuration` if the client
    /// cannot be built.
    pub fn provider(&self, ctx: &RequestContext, provider_id: &str) -> AuthResult<Arc<dyn Provider>> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        let key = (nid, provider_id.to_string());

        if let Some(client) = self.clients.get(&key) {
            return Ok(Arc::clone(client.value()));
        }

        match self.clients.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let config = self
                    .configs
                    .get(entry.key())
                    .map(|c| c.value().clone())
                    .ok_or_else(|| AuthError::provider_not_found(provider_id))?;
                let client = build_provider(config, &self.settings, self.http_client.clone())?;
                debug!(%nid, provider = provider_id, "provider client constructed");
                entry.insert(Arc::clone(&client));
                Ok(client)
            }
        }
    }

    /// IDs of the providers configured for the request's tenant, sorted.
    ///
    /// # Errors
    ///
    /// Returns `TenantUnresolved` if no tenant applies.
    pub fn provider_ids(&self, ctx: &RequestContext) -> AuthResult<Vec<String>> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        let mut ids: Vec<String> = self
            .configs
            .iter()
            .filter(|entry| entry.key().0 == nid)
            .map(|entry| entry.key().1.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of constructed clients across all tenants.
    #[must_use]
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}
