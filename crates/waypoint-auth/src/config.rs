//! Self-service configuration.
//!
//! Loaded from TOML. Every section has defaults, so a file only needs to
//! name what it changes.
//!
//! # Example (TOML)
//!
//! ```toml
//! public_base_url = "https://login.example.com"
//! default_tenant = "2f3e4c1a-1b2c-4d5e-8f90-a1b2c3d4e5f6"
//!
//! [flows]
//! lifespan = "1h"
//!
//! [flows.sweep]
//! limit = 1000
//! batch_size = 100
//! grace = "10m"
//!
//! [federation]
//! request_timeout = "10s"
//!
//! [[federation.providers]]
//! id = "google"
//! kind = "google"
//! client_id = "1234.apps.googleusercontent.com"
//! client_secret = "..."
//! scopes = ["email", "profile"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;
use crate::context::{ContextualTenant, Nid};
use crate::error::AuthError;
use crate::federation::{ClientSettings, JwksCacheConfig, ProviderConfig, ProviderRegistry};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SelfServiceConfig {
    /// Public base URL of the self-service API.
    pub public_base_url: String,

    /// Network ID used when a request carries no tenant. Required for
    /// single-tenant deployments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tenant: Option<Nid>,

    /// Login flow settings.
    pub flows: FlowConfig,

    /// External identity provider settings.
    pub federation: FederationConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for SelfServiceConfig {
    fn default() -> Self {
        Self {
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            default_tenant: None,
            flows: FlowConfig::default(),
            federation: FederationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:4433/";

/// Login flow settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowConfig {
    /// How long a new flow stays completable.
    #[serde(with = "humantime_serde")]
    pub lifespan: Duration,

    /// Expiry sweep settings.
    pub sweep: SweepConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            lifespan: Duration::from_secs(3600), // 1 hour
            sweep: SweepConfig::default(),
        }
    }
}

/// Expiry sweep settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Maximum rows deleted per invocation.
    pub limit: u64,

    /// Maximum rows deleted per pass.
    pub batch_size: u64,

    /// Only flows that expired at least this long ago are deleted.
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            limit: 1000,
            batch_size: 100,
            grace: Duration::ZERO,
        }
    }
}

/// External identity provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Timeout for every request to a provider.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Clock skew tolerated when checking `exp` and `nbf`.
    #[serde(with = "humantime_serde")]
    pub clock_skew_tolerance: Duration,

    /// Allow plain HTTP provider URLs. Only for local development.
    pub allow_http: bool,

    /// JWKS TTL when the provider sends no `Cache-Control`.
    #[serde(with = "humantime_serde")]
    pub jwks_default_ttl: Duration,

    /// Lower bound for the JWKS TTL.
    #[serde(with = "humantime_serde")]
    pub jwks_min_ttl: Duration,

    /// Upper bound for the JWKS TTL.
    #[serde(with = "humantime_serde")]
    pub jwks_max_ttl: Duration,

    /// Maximum size of discovery and JWKS responses, in bytes.
    pub max_response_size: usize,

    /// Configured providers.
    pub providers: Vec<TenantProviderConfig>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            clock_skew_tolerance: Duration::from_secs(60),
            allow_http: false,
            jwks_default_ttl: Duration::from_secs(3600), // 1 hour
            jwks_min_ttl: Duration::from_secs(300),      // 5 minutes
            jwks_max_ttl: Duration::from_secs(86400),    // 24 hours
            max_response_size: 1024 * 1024,              // 1 MB
            providers: Vec::new(),
        }
    }
}

/// A provider configuration bound to a tenant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantProviderConfig {
    /// Owning tenant. Falls back to `default_tenant`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Nid>,

    /// The provider itself.
    #[serde(flatten)]
    pub provider: ProviderConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// The file.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        AuthError::configuration(err.to_string())
    }
}

impl SelfServiceConfig {
    /// Parses a TOML document. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed input.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Reads and parses a TOML file. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` or `ConfigError::Parse`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The flow lifespan or sweep batch size is zero
    /// - The sweep batch size exceeds the sweep limit
    /// - The JWKS TTL bounds are inverted
    /// - A provider is invalid or configured twice for one tenant
    ///
    /// Returns `ConfigError::Missing` if a provider has no tenant and there
    /// is no `default_tenant`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.flows.lifespan.is_zero() {
            return Err(ConfigError::InvalidValue(
                "flows.lifespan must be > 0".to_string(),
            ));
        }

        let sweep = &self.flows.sweep;
        if sweep.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "flows.sweep.batch_size must be > 0".to_string(),
            ));
        }
        if sweep.batch_size > sweep.limit {
            return Err(ConfigError::InvalidValue(format!(
                "flows.sweep.batch_size ({}) must not exceed flows.sweep.limit ({})",
                sweep.batch_size, sweep.limit
            )));
        }

        let federation = &self.federation;
        if federation.jwks_min_ttl > federation.jwks_max_ttl {
            return Err(ConfigError::InvalidValue(
                "federation.jwks_min_ttl must not exceed federation.jwks_max_ttl".to_string(),
            ));
        }
        if federation.max_response_size == 0 {
            return Err(ConfigError::InvalidValue(
                "federation.max_response_size must be > 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &federation.providers {
            entry.provider.validate()?;
            let tenant = entry.tenant.or(self.default_tenant).ok_or_else(|| {
                ConfigError::Missing(format!(
                    "tenant for provider {} (no default_tenant configured)",
                    entry.provider.id
                ))
            })?;
            if !seen.insert((tenant, entry.provider.id.as_str())) {
                return Err(ConfigError::InvalidValue(format!(
                    "provider {} is configured twice for tenant {}",
                    entry.provider.id, tenant
                )));
            }
        }

        Ok(())
    }

    /// The tenant resolver implied by `default_tenant`.
    #[must_use]
    pub fn tenant_resolver(&self) -> ContextualTenant {
        match self.default_tenant {
            Some(nid) => ContextualTenant::new(nid),
            None => ContextualTenant::strict(),
        }
    }

    /// The parsed public base URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if it is not an absolute base URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.public_base_url).map_err(|e| {
            ConfigError::InvalidValue(format!("public_base_url '{}': {}", self.public_base_url, e))
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue(format!(
                "public_base_url '{}' cannot be a base URL",
                self.public_base_url
            )));
        }
        Ok(url)
    }

    /// Provider client settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the public base URL is invalid.
    pub fn client_settings(&self) -> Result<ClientSettings, ConfigError> {
        let federation = &self.federation;
        let settings = ClientSettings::new(self.base_url()?)
            .with_request_timeout(federation.request_timeout)
            .with_clock_skew_tolerance(federation.clock_skew_tolerance)
            .with_allow_http(federation.allow_http)
            .with_jwks(
                JwksCacheConfig::default()
                    .with_default_ttl(federation.jwks_default_ttl)
                    .with_ttl_bounds(federation.jwks_min_ttl, federation.jwks_max_ttl)
                    .with_max_response_size(federation.max_response_size),
            );
        Ok(ClientSettings {
            max_response_size: federation.max_response_size,
            ..settings
        })
    }

    /// Builds a provider registry loaded with every configured provider.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if validation fails.
    pub fn provider_registry(&self) -> AuthResult<ProviderRegistry> {
        self.validate()?;
        let settings = self.client_settings()?;
        let registry = ProviderRegistry::new(settings, Arc::new(self.tenant_resolver()))?;
        for entry in &self.federation.providers {
            let tenant = entry
                .tenant
                .or(self.default_tenant)
                .ok_or(AuthError::TenantUnresolved)?;
            registry.upsert_config(tenant, entry.provider.clone())?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::context::{RequestContext, TenantResolver};
    use crate::federation::ProviderKind;

    #[test]
    fn test_default_config_validates() {
        let config = SelfServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flows.sweep.batch_size, 100);
        assert_eq!(config.flows.lifespan, Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_toml() {
        let config = SelfServiceConfig::from_toml_str(
            r#"
            public_base_url = "https://login.example.com"
            default_tenant = "2f3e4c1a-1b2c-4d5e-8f90-a1b2c3d4e5f6"

            [flows]
            lifespan = "10m"

            [flows.sweep]
            limit = 500
            batch_size = 50
            grace = "1h"

            [[federation.providers]]
            id = "google"
            kind = "google"
            client_id = "abc.apps.googleusercontent.com"
            scopes = ["email", "offline_access"]

            [[federation.providers]]
            id = "okta"
            tenant = "8a7b6c5d-1111-4222-8333-944455556666"
            issuer_url = "https://example.okta.com"
            client_id = "0oa1"
            "#,
        )
        .unwrap();

        assert_eq!(config.flows.lifespan, Duration::from_secs(600));
        assert_eq!(config.flows.sweep.grace, Duration::from_secs(3600));
        assert_eq!(config.federation.providers.len(), 2);
        assert_eq!(config.federation.providers[0].provider.kind, ProviderKind::Google);
        assert_eq!(config.federation.providers[1].provider.kind, ProviderKind::Generic);
        assert!(config.federation.providers[1].tenant.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = SelfServiceConfig {
            public_base_url: "not a url".to_string(),
            ..SelfServiceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let config = SelfServiceConfig {
            public_base_url: "mailto:ops@example.com".to_string(),
            ..SelfServiceConfig::default()
        };
        assert!(config.client_settings().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = SelfServiceConfig::default();
        config.flows.sweep.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_batch_larger_than_limit_rejected() {
        let mut config = SelfServiceConfig::default();
        config.flows.sweep.limit = 10;
        config.flows.sweep.batch_size = 100;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_provider_without_tenant_requires_default() {
        let mut config = SelfServiceConfig::default();
        config.federation.providers.push(TenantProviderConfig {
            tenant: None,
            provider: ProviderConfig::new("google", ProviderKind::Google, "c"),
        });
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        config.default_tenant = Some(Nid::new());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let mut config = SelfServiceConfig {
            default_tenant: Some(Nid::new()),
            ..SelfServiceConfig::default()
        };
        for _ in 0..2 {
            config.federation.providers.push(TenantProviderConfig {
                tenant: None,
                provider: ProviderConfig::new("google", ProviderKind::Google, "c"),
            });
        }
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[flows.sweep]\nlimit = 20\nbatch_size = 5").unwrap();

        let config = SelfServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.flows.sweep.limit, 20);

        let err = SelfServiceConfig::from_file("/nonexistent/waypoint.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_tenant_resolver_and_registry() {
        let nid = Nid::new();
        let mut config = SelfServiceConfig {
            default_tenant: Some(nid),
            ..SelfServiceConfig::default()
        };
        config.federation.providers.push(TenantProviderConfig {
            tenant: None,
            provider: ProviderConfig::new("google", ProviderKind::Google, "c"),
        });

        let resolver = config.tenant_resolver();
        assert_eq!(resolver.resolve_tenant(&RequestContext::new()).unwrap(), nid);

        let registry = config.provider_registry().unwrap();
        assert_eq!(
            registry.provider_ids(&RequestContext::new()).unwrap(),
            vec!["google"]
        );
    }
}
