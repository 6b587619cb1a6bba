//! Tests against a real KMS key.
//!
//! Run with: `KMS_KEY_ID=<key> cargo test -p tokenbridge-tests --test kms_tests --features integration`

#![cfg(feature = "integration")]

use std::sync::Arc;
use std::time::Duration;
use tokenbridge_api::build_app;
use tokenbridge_auth::{GithubConfig, GithubVerifier, Jwk, Jwks, JwtVerifier, TokenResponse};
use tokenbridge_core::{IdentityVerifier, KeyProvider};
use tokenbridge_kms::{KmsKey, load_client};
use tokenbridge_tests::{
    ApiTestClient, FakeIssuer, context::default_settings, init_test_logging, start_test_server,
};

async fn kms_key() -> KmsKey {
    init_test_logging();
    let key_id = std::env::var("KMS_KEY_ID").expect("KMS_KEY_ID must be set");
    KmsKey::new(load_client(None).await, key_id, Duration::from_secs(300))
}

#[tokio::test]
async fn test_kms_public_key_is_published() {
    let key = kms_key().await;

    let material = key
        .public_key_reader()
        .public_key()
        .await
        .expect("GetPublicKey failed");
    let jwk = Jwk::from_public_key(&material).expect("KMS key is not publishable");

    assert_eq!(jwk.kid, key.key_id());
    assert!(jwk.is_signing_key());
}

#[tokio::test]
async fn test_kms_signed_token_verifies() {
    let key = kms_key().await;
    let github = FakeIssuer::github().await;

    let verifiers: Vec<Arc<dyn IdentityVerifier>> = vec![Arc::new(GithubVerifier::new(GithubConfig {
        issuer: github.uri(),
        ..Default::default()
    }))];
    let settings = default_settings();
    let app = build_app(&settings, &key, &verifiers).expect("Failed to build app");
    let (addr, _handle) = start_test_server(app).await.expect("Failed to start server");
    let client = ApiTestClient::new(addr);

    let resp = client
        .exchange("/github/exchange", &github.workflow_token("acme").await)
        .await
        .expect("Request failed");
    assert!(resp.status().is_success());
    let body: TokenResponse = resp.json().await.unwrap();

    let jwks: Jwks = client
        .get("/.well-known/jwks.json")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let claims = JwtVerifier::from_jwks(&jwks, settings.issuer_url.as_deref().unwrap(), "tokenbridge")
        .unwrap()
        .verify(&body.access_token)
        .expect("KMS-signed token does not verify");
    assert_eq!(claims.sub, "repo:acme/app:ref:refs/heads/main");
}
