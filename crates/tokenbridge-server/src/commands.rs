//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the token exchange server
    Serve,

    /// Print the IAM policy documents of every handler
    Policy {
        /// Key ARN to use as the policy resource
        #[arg(long)]
        key_arn: Option<String>,
    },

    /// Validate configuration and list the routes that would be mounted
    Check,

    /// Provision a new RSA-2048 signing key
    CreateKey {
        /// Key description (KMS backend)
        #[arg(short, long, default_value = "tokenbridge token signing key")]
        description: String,

        /// Write a local PKCS#8 PEM key here instead of calling KMS
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Verify a token issued by a running bridge
    Verify {
        /// JWKS URL of the bridge
        #[arg(long)]
        jwks_url: String,

        /// Expected issuer
        #[arg(long)]
        issuer: String,

        /// Expected audience
        #[arg(long)]
        audience: String,

        /// The token
        token: String,
    },
}
