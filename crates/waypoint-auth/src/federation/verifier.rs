//! ID token verification.
//!
//! [`ClaimsVerifier`] is a pure function of (signing keys, raw token) to
//! [`Claims`]. It holds only the issuer, the expected audience and the clock
//! skew leeway; the key set is supplied by the caller on every call.
//!
//! Checks, in order:
//!
//! 1. The header parses and names an asymmetric algorithm (RS*, PS*, ES*).
//! 2. The header carries a `kid` that resolves to a signing key in the set.
//! 3. The key's own `alg`, when published, agrees with the header.
//! 4. Signature, `iss`, `aud`, `exp` and `nbf` (with leeway).
//! 5. `sub` is non-empty.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};

use super::claims::Claims;

/// Why an ID token was rejected.
///
/// Messages never include the token or key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The token is not a well-formed JWS.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The header has no `kid`.
    #[error("token header has no key id")]
    MissingKeyId,

    /// No signing key with this ID is published.
    #[error("no signing key with id '{0}'")]
    UnknownKey(String),

    /// The algorithm is not an accepted asymmetric algorithm.
    #[error("algorithm {0} is not accepted")]
    UnsupportedAlgorithm(String),

    /// The header algorithm differs from the key's published algorithm.
    #[error("token algorithm does not match the signing key")]
    AlgorithmMismatch,

    /// The published key cannot be used for verification.
    #[error("signing key is unusable")]
    InvalidKey,

    /// The signature does not verify.
    #[error("signature verification failed")]
    BadSignature,

    /// `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("token not yet valid")]
    NotYetValid,

    /// `iss` does not match the provider.
    #[error("issuer mismatch")]
    IssuerMismatch,

    /// `aud` does not contain the client ID.
    #[error("audience mismatch")]
    AudienceMismatch,

    /// A required claim is missing or empty.
    #[error("missing required claim '{0}'")]
    MissingClaim(String),
}

/// Verifies ID tokens issued to one client by one provider.
#[derive(Debug, Clone)]
pub struct ClaimsVerifier {
    issuers: Vec<String>,
    client_id: String,
    leeway: Duration,
}

impl ClaimsVerifier {
    /// Creates a verifier for tokens issued by `issuer` to `client_id`.
    #[must_use]
    pub fn new(issuer: &str, client_id: impl Into<String>) -> Self {
        Self {
            issuers: issuer_variants(issuer),
            client_id: client_id.into(),
            leeway: Duration::from_secs(60),
        }
    }

    /// Accepts an additional `iss` value, for providers that use more than
    /// one spelling.
    #[must_use]
    pub fn with_accepted_issuer(mut self, issuer: &str) -> Self {
        self.issuers.extend(issuer_variants(issuer));
        self
    }

    /// Sets the clock skew tolerance for `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The audience this verifier requires.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Verifies `raw` against `keys` and decodes its claims.
    ///
    /// # Errors
    ///
    /// Returns the first check that failed.
    pub fn verify(&self, keys: &JwkSet, raw: &str) -> Result<Claims, VerifyError> {
        let header = decode_header(raw).map_err(|e| VerifyError::Malformed(e.to_string()))?;

        if !is_accepted_algorithm(header.alg) {
            return Err(VerifyError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;
        let jwk = find_signing_key(keys, &kid).ok_or_else(|| VerifyError::UnknownKey(kid))?;

        if let Some(key_alg) = jwk_algorithm(jwk)
            && key_alg != header.alg
        {
            return Err(VerifyError::AlgorithmMismatch);
        }

        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|_| VerifyError::InvalidKey)?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(self.issuers.as_slice());
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = self.leeway.as_secs();

        let claims = decode::<Claims>(raw, &decoding_key, &validation)
            .map_err(|e| map_jwt_error(e.kind()))?
            .claims;

        if claims.subject.is_empty() {
            return Err(VerifyError::MissingClaim("sub".to_string()));
        }

        Ok(claims)
    }
}

/// Reads the `kid` from a token header without verifying anything.
///
/// # Errors
///
/// Returns `Malformed` if the header cannot be decoded and `MissingKeyId`
/// if it has no `kid`.
pub fn key_id(raw: &str) -> Result<String, VerifyError> {
    decode_header(raw)
        .map_err(|e| VerifyError::Malformed(e.to_string()))?
        .kid
        .ok_or(VerifyError::MissingKeyId)
}

fn issuer_variants(issuer: &str) -> Vec<String> {
    let trimmed = issuer.trim_end_matches('/');
    vec![trimmed.to_string(), format!("{}/", trimmed)]
}

fn is_accepted_algorithm(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
    )
}

fn find_signing_key<'a>(keys: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    keys.keys.iter().find(|jwk| {
        jwk.common.key_id.as_deref() == Some(kid)
            && !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption))
    })
}

/// Extracts the algorithm from a JWK.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        _ => None,
    })
}

fn map_jwt_error(kind: &ErrorKind) -> VerifyError {
    match kind {
        ErrorKind::InvalidSignature => VerifyError::BadSignature,
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::ImmatureSignature => VerifyError::NotYetValid,
        ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch,
        ErrorKind::InvalidAudience => VerifyError::AudienceMismatch,
        ErrorKind::MissingRequiredClaim(claim) => VerifyError::MissingClaim(claim.clone()),
        ErrorKind::InvalidAlgorithm => VerifyError::AlgorithmMismatch,
        ErrorKind::InvalidKeyFormat => VerifyError::InvalidKey,
        ErrorKind::Json(_) => VerifyError::Malformed("claims are not valid JSON".to_string()),
        _ => VerifyError::Malformed("token could not be decoded".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    use super::*;
    use crate::federation::test_support::{self, OTHER_KEY, SIGNING_KEY};

    const ISSUER: &str = "https://idp.example.com";
    const CLIENT: &str = "client-123";

    fn verifier() -> ClaimsVerifier {
        ClaimsVerifier::new(ISSUER, CLIENT).with_leeway(Duration::from_secs(5))
    }

    fn keys() -> JwkSet {
        test_support::jwks(&[&*SIGNING_KEY])
    }

    #[test]
    fn test_valid_token() {
        let token = SIGNING_KEY.sign(&test_support::claims(ISSUER, CLIENT, "user-1"));
        let claims = verifier().verify(&keys(), &token).unwrap();
        assert_eq!(claims.subject, "user-1");
        assert_eq!(claims.email.as_deref(), Some("user-1@example.com"));
    }

    #[test]
    fn test_issuer_with_trailing_slash_accepted() {
        let token = SIGNING_KEY.sign(&test_support::claims(
            "https://idp.example.com/",
            CLIENT,
            "user-1",
        ));
        assert!(verifier().verify(&keys(), &token).is_ok());
    }

    #[test]
    fn test_wrong_signer() {
        // Signed by another key that claims the published kid.
        let token = OTHER_KEY.sign_as(&SIGNING_KEY.kid, &test_support::claims(ISSUER, CLIENT, "u"));
        assert_eq!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::BadSignature
        );
    }

    #[test]
    fn test_unknown_kid() {
        let token = OTHER_KEY.sign(&test_support::claims(ISSUER, CLIENT, "u"));
        assert!(matches!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::UnknownKey(_)
        ));
    }

    #[test]
    fn test_wrong_audience() {
        let token = SIGNING_KEY.sign(&test_support::claims(ISSUER, "someone-else", "u"));
        assert_eq!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::AudienceMismatch
        );
    }

    #[test]
    fn test_wrong_issuer() {
        let token = SIGNING_KEY.sign(&test_support::claims("https://evil.example.com", CLIENT, "u"));
        assert_eq!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::IssuerMismatch
        );
    }

    #[test]
    fn test_expired() {
        let mut claims = test_support::claims(ISSUER, CLIENT, "u");
        claims["exp"] = json!(test_support::now() - 3600);
        let token = SIGNING_KEY.sign(&claims);
        assert_eq!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::Expired
        );
    }

    #[test]
    fn test_not_yet_valid() {
        let mut claims = test_support::claims(ISSUER, CLIENT, "u");
        claims["nbf"] = json!(test_support::now() + 3600);
        let token = SIGNING_KEY.sign(&claims);
        assert_eq!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::NotYetValid
        );
    }

    #[test]
    fn test_empty_subject() {
        let token = SIGNING_KEY.sign(&test_support::claims(ISSUER, CLIENT, ""));
        assert_eq!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::MissingClaim("sub".to_string())
        );
    }

    #[test]
    fn test_missing_kid() {
        let token = SIGNING_KEY.sign_without_kid(&test_support::claims(ISSUER, CLIENT, "u"));
        assert_eq!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::MissingKeyId
        );
    }

    #[test]
    fn test_malformed_token() {
        assert!(matches!(
            verifier().verify(&keys(), "not.a.jwt").unwrap_err(),
            VerifyError::Malformed(_)
        ));
        assert!(matches!(
            verifier().verify(&keys(), "").unwrap_err(),
            VerifyError::Malformed(_)
        ));
    }

    #[test]
    fn test_hmac_downgrade_rejected() {
        let header = jsonwebtoken::Header {
            kid: Some(SIGNING_KEY.kid.clone()),
            ..jsonwebtoken::Header::new(Algorithm::HS256)
        };
        let token = jsonwebtoken::encode(
            &header,
            &test_support::claims(ISSUER, CLIENT, "u"),
            &jsonwebtoken::EncodingKey::from_secret(b"public-key-as-secret"),
        )
        .unwrap();
        assert!(matches!(
            verifier().verify(&keys(), &token).unwrap_err(),
            VerifyError::UnsupportedAlgorithm(_)
        ));
    }

    #[test]
    fn test_alg_none_rejected() {
        let header = URL_SAFE_NO_PAD.encode(
            json!({"alg": "none", "kid": SIGNING_KEY.kid}).to_string(),
        );
        let body = URL_SAFE_NO_PAD.encode(test_support::claims(ISSUER, CLIENT, "u").to_string());
        let token = format!("{}.{}.", header, body);
        let err = verifier().verify(&keys(), &token).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Malformed(_) | VerifyError::UnsupportedAlgorithm(_)
        ));
    }

    #[test]
    fn test_error_never_contains_token() {
        let token = OTHER_KEY.sign_as(&SIGNING_KEY.kid, &test_support::claims(ISSUER, CLIENT, "u"));
        let err = verifier().verify(&keys(), &token).unwrap_err();
        assert!(!err.to_string().contains(&token));
    }

    #[test]
    fn test_key_id() {
        let token = SIGNING_KEY.sign(&test_support::claims(ISSUER, CLIENT, "u"));
        assert_eq!(key_id(&token).unwrap(), SIGNING_KEY.kid);
        assert!(matches!(key_id("garbage"), Err(VerifyError::Malformed(_))));
    }
}
