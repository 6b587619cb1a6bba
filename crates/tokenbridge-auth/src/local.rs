//! In-process RSA signing key.
//!
//! Used for local development and tests. The private key never leaves this
//! module: callers get a [`Signer`] or a [`PublicKeyReader`] through the key
//! policy, exactly as with the KMS backend.

use async_trait::async_trait;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer as RsaSigner};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;
use std::sync::Arc;
use tokenbridge_core::{
    Error, KeyProvider, PublicKeyMaterial, PublicKeyReader, Result, Signer, SigningAlgorithm,
};
use tracing::info;

const KEY_BITS: usize = 2048;

/// RSA key held in memory.
pub struct LocalKey {
    key_id: String,
    signer: Arc<LocalSigner>,
    reader: Arc<LocalPublicKeyReader>,
}

impl LocalKey {
    /// Generate a fresh 2048-bit key.
    pub fn generate(key_id: impl Into<String>) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS)
            .map_err(|e| Error::Internal(format!("RSA key generation failed: {}", e)))?;
        Self::from_private_key(key_id.into(), private)
    }

    /// Load a PKCS#8 (or PKCS#1) PEM private key.
    pub fn from_pem(key_id: impl Into<String>, pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::InvalidConfig(format!("invalid RSA private key: {}", e)))?;
        Self::from_private_key(key_id.into(), private)
    }

    pub async fn from_pem_file(key_id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = tokio::fs::read_to_string(path).await?;
        let key = Self::from_pem(key_id, &pem)?;
        info!(key_id = %key.key_id, path = %path.display(), "Loaded local signing key");
        Ok(key)
    }

    fn from_private_key(key_id: String, private: RsaPrivateKey) -> Result<Self> {
        let spki_der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(|e| Error::UnsupportedKey(e.to_string()))?
            .as_bytes()
            .to_vec();

        Ok(Self {
            signer: Arc::new(LocalSigner {
                key_id: key_id.clone(),
                key: SigningKey::<Sha256>::new(private),
            }),
            reader: Arc::new(LocalPublicKeyReader {
                material: PublicKeyMaterial {
                    key_id: key_id.clone(),
                    algorithm: SigningAlgorithm::RS256,
                    spki_der,
                },
            }),
            key_id,
        })
    }
}

/// Generate a new 2048-bit key and render it as PKCS#8 PEM.
pub fn generate_pkcs8_pem() -> Result<String> {
    let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS)
        .map_err(|e| Error::Internal(format!("RSA key generation failed: {}", e)))?;
    let pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(pem.to_string())
}

impl KeyProvider for LocalKey {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }

    fn public_key_reader(&self) -> Arc<dyn PublicKeyReader> {
        self.reader.clone()
    }
}

struct LocalSigner {
    key_id: String,
    key: SigningKey<Sha256>,
}

#[async_trait]
impl Signer for LocalSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::RS256
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .key
            .try_sign(message)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

struct LocalPublicKeyReader {
    material: PublicKeyMaterial,
}

#[async_trait]
impl PublicKeyReader for LocalPublicKeyReader {
    fn key_id(&self) -> &str {
        &self.material.key_id
    }

    async fn public_key(&self) -> Result<PublicKeyMaterial> {
        Ok(self.material.clone())
    }
}
