//! Fake upstream OIDC issuers.

use chrono::Utc;
use jsonwebtoken::{Algorithm, Header};
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use tokenbridge_auth::{Jwk, Jwks, LocalKey, OidcDiscoveryDocument, encode_jws};
use tokenbridge_core::{KeyProvider, PublicKeyReader};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Audience every fake credential is minted for.
pub const UPSTREAM_AUDIENCE: &str = "tokenbridge";

const KEYS_PATH: &str = "/keys";

// RSA generation dominates test time; share keys across the binary.
static RUNNER_KEY: Lazy<LocalKey> = Lazy::new(|| LocalKey::generate("runner-1").unwrap());
static CLUSTER_KEY: Lazy<LocalKey> = Lazy::new(|| LocalKey::generate("cluster-1").unwrap());
static ROGUE_KEY: Lazy<LocalKey> = Lazy::new(|| LocalKey::generate("rogue").unwrap());

/// Signing key of the bridge under test.
pub static BRIDGE_KEY: Lazy<LocalKey> = Lazy::new(|| LocalKey::generate("bridge-test-key").unwrap());

/// An OIDC issuer serving discovery and JWKS, and minting tokens with its key.
pub struct FakeIssuer {
    pub server: MockServer,
    key: &'static LocalKey,
}

impl FakeIssuer {
    /// Issuer in the shape of `token.actions.githubusercontent.com`.
    pub async fn github() -> Self {
        Self::start(&RUNNER_KEY).await
    }

    /// Issuer in the shape of a cluster's service account issuer.
    pub async fn kubernetes() -> Self {
        Self::start(&CLUSTER_KEY).await
    }

    async fn start(key: &'static LocalKey) -> Self {
        let server = MockServer::start().await;

        let material = key
            .public_key_reader()
            .public_key()
            .await
            .expect("Failed to read issuer public key");
        let mut jwks = Jwks::new();
        jwks.add_key(Jwk::from_public_key(&material).expect("Failed to build JWK"));

        let discovery = OidcDiscoveryDocument::new(&server.uri(), &format!("{}{}", server.uri(), KEYS_PATH));

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&discovery))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(&jwks))
            .mount(&server)
            .await;

        Self { server, key }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Sign `claims` with the issuer's key.
    pub async fn mint(&self, claims: &Value) -> String {
        mint_with(self.key, self.key.key_id(), claims).await
    }

    /// Sign `claims` with a foreign key under the issuer's `kid`.
    pub async fn forge(&self, claims: &Value) -> String {
        mint_with(&ROGUE_KEY, self.key.key_id(), claims).await
    }

    /// Claims of a GitHub Actions run on `main` of `<owner>/app`.
    pub fn workflow_claims(&self, owner: &str) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": self.uri(),
            "sub": format!("repo:{}/app:ref:refs/heads/main", owner),
            "aud": UPSTREAM_AUDIENCE,
            "iat": now,
            "nbf": now,
            "exp": now + 300,
            "jti": format!("{}-run", owner),
            "repository": format!("{}/app", owner),
            "repository_owner": owner,
            "ref": "refs/heads/main",
            "sha": "e3b0c44298fc1c149afbf4c8996fb92427ae41e4",
            "workflow": "ci",
            "actor": "octocat",
            "event_name": "push",
            "run_id": "42",
        })
    }

    pub async fn workflow_token(&self, owner: &str) -> String {
        self.mint(&self.workflow_claims(owner)).await
    }

    /// Claims of a projected service account token.
    pub fn service_account_claims(&self, namespace: &str, name: &str) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": self.uri(),
            "sub": format!("system:serviceaccount:{}:{}", namespace, name),
            "aud": [UPSTREAM_AUDIENCE],
            "iat": now,
            "nbf": now,
            "exp": now + 600,
            "kubernetes.io": {
                "namespace": namespace,
                "serviceaccount": { "name": name, "uid": "6f1c3f4e-9a5b-4d2e-8b1a-0c9d8e7f6a5b" },
                "pod": { "name": format!("{}-7d9f8", name), "uid": "a1b2c3d4" },
            },
        })
    }

    pub async fn service_account_token(&self, namespace: &str, name: &str) -> String {
        self.mint(&self.service_account_claims(namespace, name)).await
    }
}

async fn mint_with(key: &LocalKey, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode_jws(&header, claims, key.signer().as_ref())
        .await
        .expect("Failed to sign fixture token")
}

/// Set `key` on a claims object.
pub fn with_claim(mut claims: Value, key: &str, value: Value) -> Value {
    claims[key] = value;
    claims
}
