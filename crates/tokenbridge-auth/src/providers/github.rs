//! GitHub Actions OIDC credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokenbridge_core::{Error, IdentityVerifier, Provider, Result, VerifiedIdentity};
use tracing::{debug, warn};

use super::identity_from_claims;
use crate::oidc::{OidcVerifier, OidcVerifierConfig, upstream_client};

pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// GitHub provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub enabled: bool,
    pub issuer: String,
    pub audiences: Vec<String>,
    /// Only accept workflows of these repository owners. Empty allows all.
    pub allowed_owners: Vec<String>,
    pub jwks_uri: Option<String>,
    /// Hex SHA-256 thumbprints of the issuer's TLS certificate. Empty
    /// trusts any certificate the system roots accept.
    pub tls_thumbprints: Vec<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer: GITHUB_ACTIONS_ISSUER.to_string(),
            audiences: vec!["tokenbridge".to_string()],
            allowed_owners: vec![],
            jwks_uri: None,
            tls_thumbprints: vec![],
        }
    }
}

/// Verifies GitHub Actions ID tokens.
pub struct GithubVerifier {
    oidc: OidcVerifier,
    allowed_owners: Vec<String>,
}

impl GithubVerifier {
    pub fn new(config: GithubConfig) -> Self {
        Self::with_client(config, upstream_client())
    }

    pub fn with_client(config: GithubConfig, client: reqwest::Client) -> Self {
        let mut oidc_config =
            OidcVerifierConfig::new(config.issuer, config.audiences).with_tls_thumbprints(config.tls_thumbprints);
        if let Some(uri) = config.jwks_uri {
            oidc_config = oidc_config.with_jwks_uri(uri);
        }

        Self {
            oidc: OidcVerifier::with_client(oidc_config, client),
            allowed_owners: config.allowed_owners,
        }
    }

    fn owner_allowed(&self, owner: Option<&str>) -> bool {
        if self.allowed_owners.is_empty() {
            return true;
        }
        owner.is_some_and(|owner| {
            self.allowed_owners
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(owner))
        })
    }
}

#[async_trait]
impl IdentityVerifier for GithubVerifier {
    fn provider(&self) -> Provider {
        Provider::Github
    }

    fn issuer(&self) -> &str {
        self.oidc.issuer()
    }

    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
        let claims = self.oidc.verify(credential).await?;

        let owner = claims.get("repository_owner").and_then(|v| v.as_str());
        if !self.owner_allowed(owner) {
            warn!(owner = ?owner, "Repository owner not allowed");
            return Err(Error::CredentialRejected(format!(
                "repository owner {} is not allowed",
                owner.unwrap_or("<none>")
            )));
        }

        let mut identity = identity_from_claims(Provider::Github, self.issuer(), &claims)?;
        for name in Provider::Github.identity_claims() {
            if let Some(value) = claims.get(*name) {
                identity = identity.with_claim(*name, value.clone());
            }
        }

        debug!(subject = %identity.subject, "Verified GitHub Actions credential");
        Ok(identity)
    }
}
