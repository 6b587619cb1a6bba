//! Upstream OIDC credential verification.
//!
//! Resolves the issuer's JWKS through OIDC discovery (or an explicit
//! `jwks_uri`), caches it, and validates presented ID tokens against it.

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokenbridge_core::{Error, Result};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::jwks::Jwks;
use crate::jwt::map_jwt_error;

/// Algorithms accepted on upstream credentials.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
];

/// Settings for one trusted upstream issuer.
#[derive(Debug, Clone)]
pub struct OidcVerifierConfig {
    pub issuer: String,
    /// A credential is accepted when its `aud` contains any of these.
    pub audiences: Vec<String>,
    /// Skip discovery and fetch keys from here.
    pub jwks_uri: Option<String>,
    pub leeway_secs: u64,
    pub jwks_ttl: Duration,
    /// SHA-256 thumbprints (hex) of accepted issuer TLS certificates.
    /// Empty disables pinning.
    pub tls_thumbprints: Vec<String>,
}

impl OidcVerifierConfig {
    pub fn new(issuer: impl Into<String>, audiences: Vec<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audiences,
            jwks_uri: None,
            leeway_secs: 60,
            jwks_ttl: Duration::from_secs(3600),
            tls_thumbprints: vec![],
        }
    }

    pub fn with_jwks_uri(mut self, jwks_uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(jwks_uri.into());
        self
    }

    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    pub fn with_tls_thumbprints(mut self, thumbprints: Vec<String>) -> Self {
        self.tls_thumbprints = thumbprints;
        self
    }
}

/// HTTP client for upstream issuers. Exposes the peer certificate so
/// thumbprint pinning can inspect it.
pub fn upstream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .tls_info(true)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Hex SHA-256 of a DER certificate.
pub fn certificate_thumbprint(der: &[u8]) -> String {
    Sha256::digest(der).iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    issuer: String,
    jwks_uri: String,
}

struct CachedJwks {
    jwks: Arc<Jwks>,
    fetched_at: Instant,
}

/// Verifies ID tokens from one OIDC issuer.
pub struct OidcVerifier {
    config: OidcVerifierConfig,
    client: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
}

impl OidcVerifier {
    pub fn new(config: OidcVerifierConfig) -> Self {
        Self::with_client(config, upstream_client())
    }

    /// `client` must be built with `tls_info(true)` when thumbprints are
    /// pinned; otherwise every fetch fails.
    pub fn with_client(config: OidcVerifierConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            cache: RwLock::new(None),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    async fn jwks_uri(&self) -> Result<String> {
        if let Some(uri) = &self.config.jwks_uri {
            return Ok(uri.clone());
        }

        let url = format!(
            "{}/.well-known/openid-configuration",
            self.config.issuer.trim_end_matches('/')
        );
        debug!(url = %url, "Fetching OIDC discovery document");

        let discovery: DiscoveryResponse = self.get_json(&url, "discovery document").await?;

        if discovery.issuer.trim_end_matches('/') != self.config.issuer.trim_end_matches('/') {
            return Err(Error::ProviderUnavailable(format!(
                "discovery document names issuer {}",
                discovery.issuer
            )));
        }

        Ok(discovery.jwks_uri)
    }

    async fn fetch_jwks(&self) -> Result<Arc<Jwks>> {
        let uri = self.jwks_uri().await?;
        debug!(issuer = %self.config.issuer, uri = %uri, "Fetching upstream JWKS");

        let jwks: Jwks = self.get_json(&uri, "JWKS").await?;
        Ok(Arc::new(jwks))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::ProviderUnavailable(format!("{} fetch failed: {}", what, e)))?;
        self.check_pinned(&response)?;

        response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("invalid {}: {}", what, e)))
    }

    fn check_pinned(&self, response: &reqwest::Response) -> Result<()> {
        let pins = &self.config.tls_thumbprints;
        if pins.is_empty() {
            return Ok(());
        }

        let certificate = response
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .ok_or_else(|| {
                warn!(issuer = %self.config.issuer, "Issuer presented no TLS certificate to pin");
                Error::ProviderUnavailable("no TLS certificate to check against pinned thumbprints".to_string())
            })?;

        let thumbprint = certificate_thumbprint(certificate);
        if pins.iter().any(|pin| pin.eq_ignore_ascii_case(&thumbprint)) {
            return Ok(());
        }
        warn!(issuer = %self.config.issuer, thumbprint = %thumbprint, "Issuer certificate is not pinned");
        Err(Error::ProviderUnavailable(format!(
            "certificate thumbprint {} is not pinned",
            thumbprint
        )))
    }

    /// Cached key set, refetched once the TTL lapses or when `refresh` is set.
    async fn jwks(&self, refresh: bool) -> Result<Arc<Jwks>> {
        if !refresh {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.config.jwks_ttl {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        let jwks = self.fetch_jwks().await?;
        *self.cache.write().await = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }

    /// Verify `token` and return its claims.
    pub async fn verify(&self, token: &str) -> Result<Map<String, Value>> {
        let header = decode_header(token).map_err(map_jwt_error)?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(Error::CredentialRejected(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let kid = header.kid.as_deref();
        let mut jwks = self.jwks(false).await?;
        if jwks.find(kid).is_none() {
            // The issuer may have rotated since the last fetch.
            debug!(kid = ?kid, "Key not in cached JWKS, refreshing");
            jwks = self.jwks(true).await?;
        }

        let jwk = jwks.find(kid).ok_or_else(|| {
            warn!(issuer = %self.config.issuer, kid = ?kid, "No matching upstream key");
            Error::CredentialRejected("no matching signing key".to_string())
        })?;

        if let Some(pinned) = jwk.algorithm()? {
            if pinned != header.alg {
                return Err(Error::CredentialRejected(format!(
                    "algorithm {:?} does not match key",
                    header.alg
                )));
            }
        }

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(self.config.audiences.as_slice());
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = self.config.leeway_secs;

        let data = decode::<Map<String, Value>>(token, &jwk.decoding_key()?, &validation)
            .map_err(map_jwt_error)?;
        Ok(data.claims)
    }
}
