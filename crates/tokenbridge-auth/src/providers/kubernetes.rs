//! Kubernetes service account tokens.
//!
//! Projected service account tokens carry their workload identity under the
//! `kubernetes.io` claim:
//!
//! ```json
//! {"kubernetes.io": {"namespace": "ci", "serviceaccount": {"name": "builder", "uid": "..."}, "pod": {"name": "..."}}}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokenbridge_core::{Error, IdentityVerifier, Provider, Result, VerifiedIdentity};
use tracing::{debug, warn};

use super::identity_from_claims;
use crate::oidc::{OidcVerifier, OidcVerifierConfig, upstream_client};

/// Kubernetes provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub enabled: bool,
    /// Cluster service account issuer (`--service-account-issuer`).
    pub issuer: String,
    pub audiences: Vec<String>,
    /// Clusters without a public discovery endpoint publish keys here.
    pub jwks_uri: Option<String>,
    /// Only accept service accounts from these namespaces. Empty allows all.
    pub allowed_namespaces: Vec<String>,
}

#[derive(Debug)]
struct WorkloadClaims {
    namespace: String,
    service_account: String,
    service_account_uid: Option<String>,
    pod: Option<String>,
}

impl WorkloadClaims {
    fn from_claims(claims: &Map<String, Value>) -> Result<Self> {
        let k8s = claims
            .get("kubernetes.io")
            .ok_or_else(|| Error::CredentialRejected("missing kubernetes.io claim".to_string()))?;

        let text = |pointer: &str| k8s.pointer(pointer).and_then(Value::as_str).map(str::to_string);

        let namespace = text("/namespace")
            .ok_or_else(|| Error::CredentialRejected("missing namespace".to_string()))?;
        let service_account = text("/serviceaccount/name")
            .ok_or_else(|| Error::CredentialRejected("missing service account".to_string()))?;

        Ok(Self {
            namespace,
            service_account,
            service_account_uid: text("/serviceaccount/uid"),
            pod: text("/pod/name"),
        })
    }

    fn subject(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.service_account)
    }
}

/// Verifies projected service account tokens from one cluster.
pub struct KubernetesVerifier {
    oidc: OidcVerifier,
    allowed_namespaces: Vec<String>,
}

impl KubernetesVerifier {
    pub fn new(config: KubernetesConfig) -> Result<Self> {
        Self::with_client(config, upstream_client())
    }

    pub fn with_client(config: KubernetesConfig, client: reqwest::Client) -> Result<Self> {
        if config.issuer.is_empty() {
            return Err(Error::InvalidConfig(
                "kubernetes provider requires an issuer".to_string(),
            ));
        }
        if config.audiences.is_empty() {
            return Err(Error::InvalidConfig(
                "kubernetes provider requires at least one audience".to_string(),
            ));
        }

        let mut oidc_config = OidcVerifierConfig::new(config.issuer, config.audiences);
        if let Some(uri) = config.jwks_uri {
            oidc_config = oidc_config.with_jwks_uri(uri);
        }

        Ok(Self {
            oidc: OidcVerifier::with_client(oidc_config, client),
            allowed_namespaces: config.allowed_namespaces,
        })
    }
}

#[async_trait]
impl IdentityVerifier for KubernetesVerifier {
    fn provider(&self) -> Provider {
        Provider::Kubernetes
    }

    fn issuer(&self) -> &str {
        self.oidc.issuer()
    }

    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
        let claims = self.oidc.verify(credential).await?;
        let workload = WorkloadClaims::from_claims(&claims)?;

        let identity = identity_from_claims(Provider::Kubernetes, self.issuer(), &claims)?;
        if identity.subject != workload.subject() {
            return Err(Error::CredentialRejected(format!(
                "subject {} does not match service account",
                identity.subject
            )));
        }

        if !self.allowed_namespaces.is_empty() && !self.allowed_namespaces.contains(&workload.namespace) {
            warn!(namespace = %workload.namespace, "Namespace not allowed");
            return Err(Error::CredentialRejected(format!(
                "namespace {} is not allowed",
                workload.namespace
            )));
        }

        let mut identity = identity
            .with_claim("namespace", workload.namespace)
            .with_claim("service_account", workload.service_account);
        if let Some(uid) = workload.service_account_uid {
            identity = identity.with_claim("service_account_uid", uid);
        }
        if let Some(pod) = workload.pod {
            identity = identity.with_claim("pod", pod);
        }

        debug!(subject = %identity.subject, "Verified Kubernetes service account");
        Ok(identity)
    }
}
