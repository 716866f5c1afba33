//! Shared fixtures: RSA signing keys and a fake OpenID Connect provider.

#![allow(dead_code)]

use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use url::Url;
use waypoint_auth::{
    ClientSettings, ContextualTenant, Nid, ProviderConfig, ProviderKind, ProviderRegistry,
    TenantResolver,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "waypoint-client";
pub const CLIENT_SECRET: &str = "s3cret";

pub static KEY_A: LazyLock<SigningKey> = LazyLock::new(|| SigningKey::generate("rotation-a"));
pub static KEY_B: LazyLock<SigningKey> = LazyLock::new(|| SigningKey::generate("rotation-b"));

pub struct SigningKey {
    pub kid: String,
    encoding: EncodingKey,
    jwk: Value,
}

impl SigningKey {
    fn generate(kid: &str) -> Self {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let public_key = private_key.to_public_key();
        Self {
            kid: kid.to_string(),
            encoding: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
            jwk: json!({
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": kid,
                "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            }),
        }
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding).unwrap()
    }
}

pub fn jwks(keys: &[&SigningKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk.clone()).collect::<Vec<_>>() })
}

pub fn id_token_claims(issuer: &str, subject: &str) -> Value {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "sub": subject,
        "iat": now,
        "exp": now + 600,
        "email": format!("{subject}@example.com"),
        "email_verified": true,
        "name": "Ada Lovelace",
    })
}

/// A wiremock server posing as an OpenID Connect provider.
pub struct FakeIdp {
    pub server: MockServer,
}

impl FakeIdp {
    /// Starts the server without mounting anything.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Starts the server and mounts discovery plus a key set with `keys`.
    pub async fn with_keys(keys: &[&SigningKey]) -> Self {
        let idp = Self::start().await;
        idp.mount_discovery().await;
        idp.mount_jwks(keys).await;
        idp
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn issuer_url(&self) -> Url {
        Url::parse(&self.server.uri()).unwrap()
    }

    pub fn discovery_document(&self) -> Value {
        let base = self.server.uri();
        json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "jwks_uri": format!("{base}/jwks"),
            "response_types_supported": ["code"],
            "id_token_signing_alg_values_supported": ["RS256"],
            "scopes_supported": ["openid", "email", "profile"],
            "claims_parameter_supported": true,
        })
    }

    pub async fn mount_discovery(&self) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.discovery_document()))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_jwks(&self, keys: &[&SigningKey]) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint answering with an ID token signed by `key`.
    pub async fn mount_token(&self, key: &SigningKey, subject: &str) {
        let id_token = key.sign(&id_token_claims(&self.issuer(), subject));
        self.mount_token_response(
            ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-123",
                "token_type": "Bearer",
                "expires_in": 3600,
                "id_token": id_token,
            })),
        )
        .await;
    }

    pub async fn mount_token_response(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Number of requests the server received for `request_path`.
    pub async fn hits(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }
}

pub fn settings() -> ClientSettings {
    ClientSettings::new(Url::parse("https://login.example.com").unwrap()).with_allow_http(true)
}

pub fn generic_config(id: &str, issuer: Url) -> ProviderConfig {
    ProviderConfig::new(id, ProviderKind::Generic, CLIENT_ID)
        .with_issuer(issuer)
        .with_client_secret(CLIENT_SECRET)
        .with_scopes(["email", "profile"])
}

pub fn strict_tenants() -> Arc<dyn TenantResolver> {
    Arc::new(ContextualTenant::strict())
}

pub fn registry_with(nid: Nid, config: ProviderConfig) -> ProviderRegistry {
    let registry = ProviderRegistry::new(settings(), strict_tenants()).unwrap();
    registry.upsert_config(nid, config).unwrap();
    registry
}
