//! Credential exchange: verify upstream, then sign.

use chrono::Duration;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokenbridge_core::{Error, IdentityVerifier, Provider, RequestId, Result, Signer};
use tracing::{debug, info, warn};

use crate::jwt::{AccessTokenClaims, TokenIssuer, TokenResponse, unverified_issuer};

/// One exchange attempt.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    /// Upstream credential as presented.
    pub credential: String,
    /// `iss` of the token to issue.
    pub issuer: String,
    pub request_id: RequestId,
    pub custom_claims: Map<String, Value>,
}

impl ExchangeRequest {
    pub fn new(credential: impl Into<String>, issuer: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            credential: credential.into(),
            issuer: issuer.into(),
            request_id,
            custom_claims: Map::new(),
        }
    }

    pub fn with_custom_claims(mut self, claims: Map<String, Value>) -> Self {
        self.custom_claims = claims;
        self
    }
}

/// A signed access token and the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: AccessTokenClaims,
}

impl IssuedToken {
    pub fn response(&self) -> TokenResponse {
        TokenResponse::new(self.token.clone(), self.claims.exp)
    }
}

/// Exchanges credentials of one identity provider.
pub struct TokenBridge {
    verifier: Arc<dyn IdentityVerifier>,
    issuer: TokenIssuer,
    ttl: Duration,
    audience: Option<Vec<String>>,
}

impl TokenBridge {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, signer: Arc<dyn Signer>) -> Self {
        Self {
            verifier,
            issuer: TokenIssuer::new(signer),
            ttl: Duration::seconds(900),
            audience: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue tokens for this audience instead of the upstream one.
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = Some(audience);
        self
    }

    pub fn provider(&self) -> Provider {
        self.verifier.provider()
    }

    pub fn upstream_issuer(&self) -> &str {
        self.verifier.issuer()
    }

    /// Verify the credential and, only if that succeeds, sign a new token.
    pub async fn exchange(&self, request: ExchangeRequest) -> Result<IssuedToken> {
        let provider = self.provider();
        let identity = self.verifier.verify(&request.credential).await.map_err(|e| {
            warn!(request_id = %request.request_id, provider = %provider, error = %e, "Credential verification failed");
            e
        })?;

        let mut builder = AccessTokenClaims::for_identity(request.issuer, &identity)
            .ttl(self.ttl)
            .jwt_id(request.request_id.to_string());
        if let Some(audience) = &self.audience {
            builder = builder.audience(audience.clone());
        }
        let claims = builder.custom_claims(&request.custom_claims)?.build();

        debug!(request_id = %request.request_id, subject = %claims.sub, "Signing access token");
        let token = self.issuer.issue(&claims).await?;

        info!(
            request_id = %request.request_id,
            provider = %provider,
            subject = %claims.sub,
            kid = %self.issuer.key_id(),
            "Issued access token"
        );
        Ok(IssuedToken { token, claims })
    }
}

/// Routes a credential to the bridge owning its issuer.
#[derive(Default)]
pub struct TokenBridgeSet {
    bridges: Vec<TokenBridge>,
}

impl TokenBridgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bridge(mut self, bridge: TokenBridge) -> Self {
        self.bridges.push(bridge);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.bridges.iter().map(TokenBridge::provider)
    }

    /// Select by the unverified `iss` claim. The selected bridge still
    /// verifies the credential in full.
    pub fn select(&self, credential: &str) -> Result<&TokenBridge> {
        let iss = unverified_issuer(credential)?;
        let iss = iss.trim_end_matches('/');
        self.bridges
            .iter()
            .find(|b| b.upstream_issuer().trim_end_matches('/') == iss)
            .ok_or_else(|| Error::UnknownIssuer(iss.to_string()))
    }

    pub async fn exchange(&self, request: ExchangeRequest) -> Result<IssuedToken> {
        self.select(&request.credential)?.exchange(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokenbridge_core::{SigningAlgorithm, VerifiedIdentity};

    struct FakeVerifier {
        provider: Provider,
        issuer: String,
        accept: bool,
    }

    #[async_trait]
    impl IdentityVerifier for FakeVerifier {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn issuer(&self) -> &str {
            &self.issuer
        }

        async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
            if !self.accept {
                return Err(Error::CredentialExpired);
            }
            Ok(VerifiedIdentity::new(self.provider, &self.issuer, "workload")
                .with_audience(vec!["upstream-aud".to_string()])
                .with_claim("credential_len", credential.len() as u64))
        }
    }

    #[derive(Default)]
    struct CountingSigner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Signer for CountingSigner {
        fn key_id(&self) -> &str {
            "counting"
        }

        fn algorithm(&self) -> SigningAlgorithm {
            SigningAlgorithm::RS256
        }

        async fn sign(&self, _message: &[u8]) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        }
    }

    fn bridge(accept: bool, signer: Arc<CountingSigner>) -> TokenBridge {
        TokenBridge::new(
            Arc::new(FakeVerifier {
                provider: Provider::Github,
                issuer: "https://upstream.example".to_string(),
                accept,
            }),
            signer,
        )
    }

    fn unsigned_token(iss: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(json!({ "iss": iss }).to_string());
        format!("e30.{}.sig", payload)
    }

    #[tokio::test]
    async fn test_rejected_credential_never_signs() {
        let signer = Arc::new(CountingSigner::default());
        let bridge = bridge(false, signer.clone());

        let result = bridge
            .exchange(ExchangeRequest::new("tok", "https://bridge", RequestId::new()))
            .await;

        assert!(matches!(result, Err(Error::CredentialExpired)));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exchange_builds_claims() {
        let signer = Arc::new(CountingSigner::default());
        let bridge = bridge(true, signer.clone());
        let request_id = RequestId::new();

        let mut custom = Map::new();
        custom.insert("team".to_string(), json!("platform"));
        let issued = bridge
            .exchange(ExchangeRequest::new("tok", "https://bridge", request_id).with_custom_claims(custom))
            .await
            .unwrap();

        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(issued.claims.iss, "https://bridge");
        assert_eq!(issued.claims.sub, "workload");
        assert_eq!(issued.claims.aud, vec!["upstream-aud"]);
        assert_eq!(issued.claims.jti, request_id.to_string());
        assert_eq!(issued.claims.extra["team"], json!("platform"));
        assert_eq!(issued.token.split('.').count(), 3);
        assert_eq!(issued.response().token_type, "Bearer");
    }

    #[tokio::test]
    async fn test_audience_override() {
        let signer = Arc::new(CountingSigner::default());
        let bridge = bridge(true, signer).with_audience(vec!["sts.amazonaws.com".to_string()]);

        let issued = bridge
            .exchange(ExchangeRequest::new("tok", "https://bridge", RequestId::new()))
            .await
            .unwrap();
        assert_eq!(issued.claims.aud, vec!["sts.amazonaws.com"]);
    }

    #[tokio::test]
    async fn test_reserved_custom_claim_never_signs() {
        let signer = Arc::new(CountingSigner::default());
        let bridge = bridge(true, signer.clone());

        let mut custom = Map::new();
        custom.insert("exp".to_string(), json!(0));
        let result = bridge
            .exchange(ExchangeRequest::new("tok", "https://bridge", RequestId::new()).with_custom_claims(custom))
            .await;

        assert!(matches!(result, Err(Error::ReservedClaim(_))));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_custom_claim_cannot_replace_verified_claim() {
        let signer = Arc::new(CountingSigner::default());
        let bridge = bridge(true, signer.clone());

        let mut custom = Map::new();
        custom.insert("credential_len".to_string(), json!("forged"));
        let result = bridge
            .exchange(ExchangeRequest::new("tok", "https://bridge", RequestId::new()).with_custom_claims(custom))
            .await;

        assert!(matches!(result, Err(Error::ReservedClaim(ref k)) if k == "credential_len"));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_selects_by_issuer() {
        let signer = Arc::new(CountingSigner::default());
        let set = TokenBridgeSet::new().with_bridge(bridge(true, signer.clone()));

        let ok = set
            .exchange(ExchangeRequest::new(
                unsigned_token("https://upstream.example/"),
                "https://bridge",
                RequestId::new(),
            ))
            .await;
        assert!(ok.is_ok());

        let unknown = set
            .exchange(ExchangeRequest::new(
                unsigned_token("https://elsewhere.example"),
                "https://bridge",
                RequestId::new(),
            ))
            .await;
        assert!(matches!(unknown, Err(Error::UnknownIssuer(_))));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
    }
}
