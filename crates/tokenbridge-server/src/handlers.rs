//! Command handlers.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tokenbridge_api::{Topology, build_app};
use tokenbridge_auth::{
    GithubVerifier, Jwks, JwtVerifier, KubernetesVerifier, LocalKey, generate_pkcs8_pem,
};
use tokenbridge_core::{IdentityVerifier, KeyProvider};
use tokenbridge_kms::{KmsKey, create_key as create_kms_key, load_client};
use tracing::{info, warn};

use crate::config::{AppConfig, SigningBackend};

/// Run the server until ctrl-c.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let key = build_key(config).await?;
    let verifiers = build_verifiers(config)?;
    let app = build_app(&config.api_settings(), key.as_ref(), &verifiers)?;

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;

    info!(
        listen = %config.server.listen,
        key_id = %key.key_id(),
        layout = ?config.routing.layout,
        "tokenbridge listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("tokenbridge stopped");
    Ok(())
}

/// Print the IAM policy document of every handler.
pub fn policy(config: &AppConfig, key_arn: Option<String>) -> Result<()> {
    let topology = topology(config)?;
    let policy = topology.key_policy(config.key_id());
    policy.validate()?;

    let resource = key_arn.unwrap_or_else(|| config.key_id().to_string());
    println!(
        "{}",
        serde_json::to_string_pretty(&policy.to_iam_documents(&resource))?
    );
    Ok(())
}

/// Validate configuration and list the routes.
pub fn check(config: &AppConfig) -> Result<()> {
    let topology = topology(config)?;
    topology.key_policy(config.key_id()).validate()?;

    println!("{} Configuration is valid", style("✓").green());
    println!("  Key:    {}", style(config.key_id()).bold());
    println!("  Layout: {:?}", config.routing.layout);
    if let Some(stage) = &topology.stage {
        println!("  Stage:  {}", stage);
    }
    println!("  Routes:");
    for route in &topology.routes {
        println!("    {}{}", style(topology.prefix()).dim(), route);
    }
    Ok(())
}

/// Provision a signing key.
pub async fn create_key(config: &AppConfig, description: &str, out: Option<&Path>) -> Result<()> {
    if let Some(path) = out {
        if path.exists() {
            println!("{} {} already exists", style("!").yellow(), path.display());
            return Ok(());
        }
        tokio::fs::write(path, generate_pkcs8_pem()?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{} Wrote local signing key to {}", style("✓").green(), path.display());
        return Ok(());
    }

    let client = load_client(config.signing.region.clone()).await;
    let key_id = create_kms_key(&client, description).await?;

    println!("{} Created KMS key {}", style("✓").green(), style(&key_id).bold());
    println!("  export KMS_KEY_ID={}", key_id);
    Ok(())
}

/// Verify a token against a JWKS URL and print its claims.
pub async fn verify(jwks_url: &str, issuer: &str, audience: &str, token: &str) -> Result<()> {
    let jwks: Jwks = reqwest::get(jwks_url)
        .await?
        .error_for_status()?
        .json()
        .await
        .with_context(|| format!("invalid JWKS at {}", jwks_url))?;

    let claims = JwtVerifier::from_jwks(&jwks, issuer, audience)?.verify(token)?;

    println!("{} Token is valid", style("✓").green());
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}

fn topology(config: &AppConfig) -> Result<Topology> {
    Ok(Topology::new(
        config.routing.layout,
        config.routing.stage.clone(),
        &config.providers.enabled(),
    )?)
}

async fn build_key(config: &AppConfig) -> Result<Box<dyn KeyProvider>> {
    let signing = &config.signing;
    match signing.backend {
        SigningBackend::Kms => {
            let client = load_client(signing.region.clone()).await;
            Ok(Box::new(KmsKey::new(
                client,
                config.key_id(),
                config.public_key_ttl(),
            )))
        }
        SigningBackend::Local => match &signing.local_key_path {
            Some(path) => Ok(Box::new(
                LocalKey::from_pem_file(signing.local_key_id.clone(), path).await?,
            )),
            None => {
                warn!("No local key configured; generated an ephemeral signing key");
                Ok(Box::new(LocalKey::generate(signing.local_key_id.clone())?))
            }
        },
    }
}

fn build_verifiers(config: &AppConfig) -> Result<Vec<Arc<dyn IdentityVerifier>>> {
    let mut verifiers: Vec<Arc<dyn IdentityVerifier>> = vec![];
    if config.providers.github.enabled {
        verifiers.push(Arc::new(GithubVerifier::new(config.providers.github.clone())));
    }
    if config.providers.kubernetes.enabled {
        verifiers.push(Arc::new(KubernetesVerifier::new(
            config.providers.kubernetes.clone(),
        )?));
    }
    Ok(verifiers)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
