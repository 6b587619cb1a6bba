//! Access token construction, signing and verification.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokenbridge_core::{Error, Provider, Result, Signer, SigningAlgorithm, VerifiedIdentity};

use crate::jwks::Jwks;

/// Claims the bridge sets itself; callers may not override them.
pub const RESERVED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "iat", "nbf", "jti", "provider"];

/// RFC 8693 token type of every issued token.
pub const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

/// Claims of an access token issued by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub provider: Provider,
    /// Provider claims and caller-supplied custom claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccessTokenClaims {
    /// Create a new builder for access token claims.
    pub fn builder(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        provider: Provider,
    ) -> AccessTokenClaimsBuilder {
        AccessTokenClaimsBuilder::new(issuer, subject, provider)
    }

    /// Builder seeded from a verified upstream identity.
    pub fn for_identity(issuer: impl Into<String>, identity: &VerifiedIdentity) -> AccessTokenClaimsBuilder {
        let mut builder = AccessTokenClaimsBuilder::new(issuer, identity.subject.clone(), identity.provider)
            .audience(identity.audience.clone());
        for (key, value) in &identity.claims {
            builder = builder.claim(key.clone(), value.clone());
        }
        builder
    }
}

/// Builder for access token claims.
pub struct AccessTokenClaimsBuilder {
    issuer: String,
    subject: String,
    provider: Provider,
    audience: Vec<String>,
    ttl: Duration,
    jwt_id: Option<String>,
    extra: Map<String, Value>,
}

impl AccessTokenClaimsBuilder {
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>, provider: Provider) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            provider,
            audience: vec![],
            ttl: Duration::seconds(900),
            jwt_id: None,
            extra: Map::new(),
        }
    }

    pub fn audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn jwt_id(mut self, jti: impl Into<String>) -> Self {
        self.jwt_id = Some(jti.into());
        self
    }

    /// Set a provider claim. Reserved names are ignored.
    pub fn claim(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !RESERVED_CLAIMS.contains(&key.as_str()) {
            self.extra.insert(key, value);
        }
        self
    }

    /// Merge caller-supplied claims. Empty keys are skipped. Reserved keys,
    /// provider identity claims and claims already set fail the whole request.
    pub fn custom_claims(mut self, claims: &Map<String, Value>) -> Result<Self> {
        for (key, value) in claims {
            if key.is_empty() {
                continue;
            }
            if self.is_protected(key) {
                return Err(Error::ReservedClaim(key.clone()));
            }
            self.extra.insert(key.clone(), value.clone());
        }
        Ok(self)
    }

    fn is_protected(&self, key: &str) -> bool {
        RESERVED_CLAIMS.contains(&key)
            || self.provider.identity_claims().contains(&key)
            || self.extra.contains_key(key)
    }

    pub fn build(self) -> AccessTokenClaims {
        let now = Utc::now();
        let exp = now + self.ttl;

        AccessTokenClaims {
            iss: self.issuer,
            sub: self.subject,
            aud: self.audience,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: self.jwt_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            provider: self.provider,
            extra: self.extra,
        }
    }
}

fn jose_algorithm(algorithm: SigningAlgorithm) -> Algorithm {
    match algorithm {
        SigningAlgorithm::RS256 => Algorithm::RS256,
    }
}

/// Encode `claims` as a compact JWS, delegating the signature to `signer`.
pub async fn encode_jws<T: Serialize>(header: &Header, claims: &T, signer: &dyn Signer) -> Result<String> {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header)?);
    let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header_b64, claims_b64);

    let signature = signer.sign(signing_input.as_bytes()).await?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Signs access tokens with the delegated key.
#[derive(Clone)]
pub struct TokenIssuer {
    signer: Arc<dyn Signer>,
}

impl TokenIssuer {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }

    pub fn key_id(&self) -> &str {
        self.signer.key_id()
    }

    /// Sign claims and produce a JWT whose `kid` names the signing key.
    pub async fn issue(&self, claims: &AccessTokenClaims) -> Result<String> {
        let mut header = Header::new(jose_algorithm(self.signer.algorithm()));
        header.kid = Some(self.signer.key_id().to_string());

        encode_jws(&header, claims, self.signer.as_ref()).await
    }
}

/// Read the `iss` claim without verifying the token.
///
/// Only for routing a credential to the verifier that owns its issuer.
pub fn unverified_issuer(token: &str) -> Result<String> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::CredentialRejected("malformed JWT".to_string()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| Error::CredentialRejected("malformed JWT payload".to_string()))?;
    let claims: Map<String, Value> = serde_json::from_slice(&bytes)
        .map_err(|_| Error::CredentialRejected("malformed JWT claims".to_string()))?;

    claims
        .get("iss")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::CredentialRejected("missing iss claim".to_string()))
}

pub(crate) fn map_jwt_error(err: jsonwebtoken::errors::Error) -> Error {
    match err.kind() {
        ErrorKind::ExpiredSignature => Error::CredentialExpired,
        _ => Error::CredentialRejected(err.to_string()),
    }
}

/// Verifies tokens issued by the bridge against its published key set.
pub struct JwtVerifier {
    keys: HashMap<String, (DecodingKey, Algorithm)>,
    issuer: String,
    audience: String,
}

impl JwtVerifier {
    /// Create a verifier from a published JWKS document.
    pub fn from_jwks(jwks: &Jwks, issuer: &str, audience: &str) -> Result<Self> {
        let mut keys = HashMap::new();
        for jwk in jwks.keys.iter().filter(|k| k.is_signing_key()) {
            let algorithm = jwk.algorithm()?.unwrap_or(Algorithm::RS256);
            keys.insert(jwk.kid.clone(), (jwk.decoding_key()?, algorithm));
        }

        if keys.is_empty() {
            return Err(Error::KeyUnavailable("key set holds no signing keys".to_string()));
        }

        Ok(Self {
            keys,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        })
    }

    /// Verify and decode a JWT.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims> {
        let header = decode_header(token).map_err(map_jwt_error)?;
        let kid = header
            .kid
            .ok_or_else(|| Error::CredentialRejected("token has no kid".to_string()))?;
        let (key, algorithm) = self
            .keys
            .get(&kid)
            .ok_or_else(|| Error::CredentialRejected(format!("unknown kid {}", kid)))?;

        if header.alg != *algorithm {
            return Err(Error::CredentialRejected(format!(
                "algorithm {:?} does not match key {}",
                header.alg, kid
            )));
        }

        let mut validation = Validation::new(*algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_nbf = true;

        let token_data = decode::<AccessTokenClaims>(token, key, &validation).map_err(map_jwt_error)?;
        Ok(token_data.claims)
    }
}

/// Token exchange response (RFC 8693).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub issued_token_type: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn new(access_token: String, expires_at: i64) -> Self {
        let expires_in = (expires_at - Utc::now().timestamp()).max(0);
        Self {
            access_token,
            issued_token_type: JWT_TOKEN_TYPE.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::Jwk;
    use crate::local::LocalKey;
    use once_cell::sync::Lazy;
    use serde_json::json;
    use tokenbridge_core::{KeyProvider, PublicKeyReader};

    static KEY: Lazy<LocalKey> = Lazy::new(|| LocalKey::generate("jwt-test-key").unwrap());

    async fn published_jwks() -> Jwks {
        let material = KEY.public_key_reader().public_key().await.unwrap();
        let mut jwks = Jwks::new();
        jwks.add_key(Jwk::from_public_key(&material).unwrap());
        jwks
    }

    #[test]
    fn test_claims_builder() {
        let claims = AccessTokenClaims::builder(
            "https://bridge.example.com",
            "repo:acme/app:ref:refs/heads/main",
            Provider::Github,
        )
        .audience(vec!["sts.amazonaws.com".to_string()])
        .jwt_id("req_1")
        .claim("repository", json!("acme/app"))
        .build();

        assert_eq!(claims.iss, "https://bridge.example.com");
        assert_eq!(claims.jti, "req_1");
        assert_eq!(claims.extra["repository"], json!("acme/app"));
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_custom_claims_cannot_overwrite_reserved() {
        let mut custom = Map::new();
        custom.insert("team".to_string(), json!("platform"));
        custom.insert("sub".to_string(), json!("root"));

        let err = AccessTokenClaims::builder("iss", "sub", Provider::Github)
            .custom_claims(&custom)
            .err()
            .unwrap();
        assert!(matches!(err, Error::ReservedClaim(ref k) if k == "sub"));
    }

    #[test]
    fn test_custom_claims_cannot_overwrite_identity_claims() {
        let identity = VerifiedIdentity::new(Provider::Github, "https://upstream", "repo:acme/app")
            .with_claim("repository", "acme/app");

        let mut custom = Map::new();
        custom.insert("repository".to_string(), json!("victim/prod"));
        let err = AccessTokenClaims::for_identity("iss", &identity)
            .custom_claims(&custom)
            .err()
            .unwrap();
        assert!(matches!(err, Error::ReservedClaim(ref k) if k == "repository"));

        // Absent from this credential, still vouched for by the provider.
        let mut custom = Map::new();
        custom.insert("environment".to_string(), json!("prod"));
        let err = AccessTokenClaims::for_identity("iss", &identity)
            .custom_claims(&custom)
            .err()
            .unwrap();
        assert!(matches!(err, Error::ReservedClaim(ref k) if k == "environment"));
    }

    #[test]
    fn test_custom_claims_cannot_overwrite_earlier_claims() {
        let mut custom = Map::new();
        custom.insert("credential_len".to_string(), json!("forged"));

        let err = AccessTokenClaims::builder("iss", "sub", Provider::Kubernetes)
            .claim("credential_len", json!(3))
            .custom_claims(&custom)
            .err()
            .unwrap();
        assert!(matches!(err, Error::ReservedClaim(ref k) if k == "credential_len"));
    }

    #[test]
    fn test_custom_claims_skip_empty_keys() {
        let mut custom = Map::new();
        custom.insert(String::new(), json!("ignored"));
        custom.insert("team".to_string(), json!("platform"));

        let claims = AccessTokenClaims::builder("iss", "sub", Provider::Kubernetes)
            .custom_claims(&custom)
            .unwrap()
            .build();
        assert_eq!(claims.extra.len(), 1);
        assert_eq!(claims.extra["team"], json!("platform"));
    }

    #[test]
    fn test_provider_claims_cannot_shadow_reserved() {
        let claims = AccessTokenClaims::builder("iss", "sub", Provider::Github)
            .claim("iss", json!("https://evil.example"))
            .build();
        assert_eq!(claims.iss, "iss");
        assert!(claims.extra.is_empty());
    }

    #[tokio::test]
    async fn test_issue_and_verify_roundtrip() {
        let issuer = TokenIssuer::new(KEY.signer());
        let claims = AccessTokenClaims::builder("https://bridge.example.com", "user", Provider::Github)
            .audience(vec!["tokenbridge".to_string()])
            .claim("repository", json!("acme/app"))
            .build();

        let token = issuer.issue(&claims).await.unwrap();
        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("jwt-test-key"));
        assert_eq!(header.alg, Algorithm::RS256);

        let verifier =
            JwtVerifier::from_jwks(&published_jwks().await, "https://bridge.example.com", "tokenbridge").unwrap();
        let verified = verifier.verify(&token).unwrap();
        assert_eq!(verified, claims);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_audience() {
        let issuer = TokenIssuer::new(KEY.signer());
        let claims = AccessTokenClaims::builder("https://bridge.example.com", "user", Provider::Github)
            .audience(vec!["other".to_string()])
            .build();
        let token = issuer.issue(&claims).await.unwrap();

        let verifier =
            JwtVerifier::from_jwks(&published_jwks().await, "https://bridge.example.com", "tokenbridge").unwrap();
        assert!(matches!(verifier.verify(&token), Err(Error::CredentialRejected(_))));
    }

    #[tokio::test]
    async fn test_verify_rejects_expired() {
        let issuer = TokenIssuer::new(KEY.signer());
        let claims = AccessTokenClaims::builder("https://bridge.example.com", "user", Provider::Github)
            .audience(vec!["tokenbridge".to_string()])
            .ttl(Duration::seconds(-3600))
            .build();
        let token = issuer.issue(&claims).await.unwrap();

        let verifier =
            JwtVerifier::from_jwks(&published_jwks().await, "https://bridge.example.com", "tokenbridge").unwrap();
        assert!(matches!(verifier.verify(&token), Err(Error::CredentialExpired)));
    }

    #[tokio::test]
    async fn test_unverified_issuer() {
        let issuer = TokenIssuer::new(KEY.signer());
        let claims = AccessTokenClaims::builder("https://issuer.example", "user", Provider::Github).build();
        let token = issuer.issue(&claims).await.unwrap();

        assert_eq!(unverified_issuer(&token).unwrap(), "https://issuer.example");
        assert!(unverified_issuer("not-a-jwt").is_err());
        assert!(unverified_issuer("a.b.c.d").is_err());
    }

    #[test]
    fn test_token_response() {
        let response = TokenResponse::new("tok".to_string(), Utc::now().timestamp() + 60);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.issued_token_type, JWT_TOKEN_TYPE);
        assert!(response.expires_in > 55 && response.expires_in <= 60);
    }
}
