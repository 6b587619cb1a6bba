//! Test context providing access to all test infrastructure.

use std::net::SocketAddr;
use std::sync::Arc;
use tokenbridge_api::{ApiSettings, build_app};
use tokenbridge_auth::{
    AccessTokenClaims, GithubConfig, GithubVerifier, Jwks, JwtVerifier, KubernetesConfig,
    KubernetesVerifier,
};
use tokenbridge_core::IdentityVerifier;

use crate::fixtures::{BRIDGE_KEY, FakeIssuer, UPSTREAM_AUDIENCE};
use crate::helpers::{ApiTestClient, start_test_server};

/// Issuer URL of the bridge under test.
pub const BRIDGE_ISSUER: &str = "https://tokenbridge.test";

/// A running bridge with both providers enabled.
///
/// Drop this to stop the server and the fake issuers.
pub struct TestContext {
    pub github: FakeIssuer,
    pub kubernetes: FakeIssuer,
    pub addr: SocketAddr,
    pub client: ApiTestClient,
    handle: tokio::task::JoinHandle<()>,
}

impl TestContext {
    /// Per-provider layout, no stage.
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_settings(default_settings()).await
    }

    /// Start with custom settings; the issuer URL defaults to [`BRIDGE_ISSUER`].
    pub async fn with_settings(mut settings: ApiSettings) -> anyhow::Result<Self> {
        crate::init_test_logging();

        settings.issuer_url.get_or_insert_with(|| BRIDGE_ISSUER.to_string());

        let (github, kubernetes) = tokio::join!(FakeIssuer::github(), FakeIssuer::kubernetes());

        let verifiers: Vec<Arc<dyn IdentityVerifier>> = vec![
            Arc::new(GithubVerifier::new(GithubConfig {
                issuer: github.uri(),
                ..Default::default()
            })),
            Arc::new(KubernetesVerifier::new(KubernetesConfig {
                enabled: true,
                issuer: kubernetes.uri(),
                audiences: vec![UPSTREAM_AUDIENCE.to_string()],
                ..Default::default()
            })?),
        ];

        let app = build_app(&settings, &*BRIDGE_KEY, &verifiers)?;
        let (addr, handle) = start_test_server(app).await?;

        Ok(Self {
            github,
            kubernetes,
            addr,
            client: ApiTestClient::new(addr),
            handle,
        })
    }

    /// Verify an issued token against the JWKS served at `jwks_path`.
    pub async fn verify_issued(
        &self,
        token: &str,
        jwks_path: &str,
    ) -> anyhow::Result<AccessTokenClaims> {
        let jwks: Jwks = self.client.get(jwks_path).await?.error_for_status()?.json().await?;
        let verifier = JwtVerifier::from_jwks(&jwks, BRIDGE_ISSUER, UPSTREAM_AUDIENCE)?;
        Ok(verifier.verify(token)?)
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn default_settings() -> ApiSettings {
    ApiSettings {
        issuer_url: Some(BRIDGE_ISSUER.to_string()),
        ..Default::default()
    }
}
