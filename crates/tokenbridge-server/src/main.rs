//! tokenbridge entrypoint.

use clap::Parser;
use std::path::{Path, PathBuf};

mod commands;
mod config;
mod handlers;
mod telemetry;

use commands::Commands;
use config::AppConfig;

#[derive(Parser)]
#[command(name = "tokenbridge")]
#[command(author, version, about = "Exchange workload OIDC tokens for KMS-signed access tokens", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./tokenbridge.{yaml,toml,json})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let Cli { config, command } = Cli::parse();
    let config = config.as_deref();

    match command {
        Commands::Serve => handlers::serve(&load(config)?).await?,
        Commands::Policy { key_arn } => handlers::policy(&load(config)?, key_arn)?,
        Commands::Check => handlers::check(&load(config)?)?,
        Commands::CreateKey { description, out } => {
            let config = AppConfig::load_unvalidated(config)?;
            telemetry::init(&config.logging);
            handlers::create_key(&config, &description, out.as_deref()).await?
        }
        // Talks to a remote bridge; needs no local configuration.
        Commands::Verify {
            jwks_url,
            issuer,
            audience,
            token,
        } => handlers::verify(&jwks_url, &issuer, &audience, &token).await?,
    }

    Ok(())
}

fn load(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load(path)?;
    telemetry::init(&config.logging);
    Ok(config)
}
