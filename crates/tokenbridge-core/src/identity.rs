//! Identities established by upstream credential verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// External identity provider a credential was issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Github,
    Kubernetes,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Kubernetes => "kubernetes",
        }
    }

    /// Path segment used by the per-provider exchange routes.
    pub fn route_segment(&self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Kubernetes => "k8s",
        }
    }

    /// Claims this provider vouches for. Issued tokens take them from the
    /// verified credential only.
    pub fn identity_claims(&self) -> &'static [&'static str] {
        match self {
            Provider::Github => &[
                "repository",
                "repository_owner",
                "repository_id",
                "ref",
                "ref_type",
                "sha",
                "workflow",
                "job_workflow_ref",
                "actor",
                "event_name",
                "run_id",
                "environment",
            ],
            Provider::Kubernetes => &["namespace", "service_account", "service_account_uid", "pod"],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential that passed verification against its identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub provider: Provider,
    pub issuer: String,
    pub subject: String,
    pub audience: Vec<String>,
    pub expires_at: DateTime<Utc>,
    /// Provider-specific claims carried over into the issued token.
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl VerifiedIdentity {
    pub fn new(provider: Provider, issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            provider,
            issuer: issuer.into(),
            subject: subject.into(),
            audience: vec![],
            expires_at: Utc::now(),
            claims: Map::new(),
        }
    }

    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn claim_str(&self, key: &str) -> Option<&str> {
        self.claims.get(key).and_then(Value::as_str)
    }
}
