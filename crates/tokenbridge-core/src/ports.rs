//! Port traits (hexagonal architecture).
//!
//! The signing key is split into two capabilities. Exchange handlers hold a
//! [`Signer`] and nothing else; the JWKS handler holds a [`PublicKeyReader`]
//! and nothing else. Neither trait offers a way to read private key material.

use crate::identity::{Provider, VerifiedIdentity};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// JWS signature algorithm produced by a [`Signer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    RS256,
}

impl SigningAlgorithm {
    /// The JOSE `alg` header value.
    pub fn as_jose(&self) -> &'static str {
        match self {
            SigningAlgorithm::RS256 => "RS256",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_jose())
    }
}

/// Public half of the signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyMaterial {
    pub key_id: String,
    pub algorithm: SigningAlgorithm,
    /// DER-encoded SubjectPublicKeyInfo.
    pub spki_der: Vec<u8>,
}

/// Delegated signing over the process-wide key.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Identifier of the key, published as `kid`.
    fn key_id(&self) -> &str;

    fn algorithm(&self) -> SigningAlgorithm;

    /// Sign `message`; the key service hashes it.
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Read access to the public half of the process-wide key.
#[async_trait]
pub trait PublicKeyReader: Send + Sync {
    fn key_id(&self) -> &str;

    async fn public_key(&self) -> Result<PublicKeyMaterial>;
}

/// A provisioned signing key able to hand out either capability.
///
/// Handlers never see a `KeyProvider`; capabilities are issued through a
/// [`Grant`](crate::policy::Grant) of the key policy.
pub trait KeyProvider: Send + Sync {
    fn key_id(&self) -> &str;

    fn signer(&self) -> Arc<dyn Signer>;

    fn public_key_reader(&self) -> Arc<dyn PublicKeyReader>;
}

/// Verifies credentials issued by one external identity provider.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    fn provider(&self) -> Provider;

    /// Issuer URL expected in the `iss` claim of credentials.
    fn issuer(&self) -> &str;

    /// Authenticate `credential`. Must not have side effects on the signing key.
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity>;
}
