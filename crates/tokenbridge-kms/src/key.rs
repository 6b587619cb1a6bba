//! KMS-held signing key.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::Client;
use aws_sdk_kms::config::Region;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{KeySpec, KeyUsageType, MessageType, SigningAlgorithmSpec};
use std::sync::Arc;
use std::time::Duration;
use tokenbridge_core::{
    Error, KeyProvider, PublicKeyMaterial, PublicKeyReader, Result, Signer, SigningAlgorithm,
};
use tracing::{debug, info};

use crate::cache::CachedPublicKeyReader;

/// Build a KMS client from the default AWS credential and region chain.
pub async fn load_client(region: Option<String>) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }
    Client::new(&loader.load().await)
}

/// Create an `RSA_2048` / `SIGN_VERIFY` key and return its id.
pub async fn create_key(client: &Client, description: &str) -> Result<String> {
    let output = client
        .create_key()
        .key_spec(KeySpec::Rsa2048)
        .key_usage(KeyUsageType::SignVerify)
        .description(description)
        .send()
        .await
        .map_err(|e| Error::Network(format!("CreateKey failed: {}", DisplayErrorContext(e))))?;

    let key_id = output
        .key_metadata()
        .map(|m| m.key_id().to_string())
        .ok_or_else(|| Error::Internal("CreateKey returned no key metadata".to_string()))?;

    info!(key_id = %key_id, "Created KMS signing key");
    Ok(key_id)
}

/// Calls `kms:Sign`. Holds no other permission.
pub struct KmsSigner {
    client: Client,
    key_id: String,
}

impl KmsSigner {
    pub fn new(client: Client, key_id: impl Into<String>) -> Self {
        Self {
            client,
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl Signer for KmsSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::RS256
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        debug!(key_id = %self.key_id, len = message.len(), "Requesting KMS signature");

        // RAW: KMS computes the SHA-256 digest itself.
        let output = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message(Blob::new(message))
            .message_type(MessageType::Raw)
            .signing_algorithm(SigningAlgorithmSpec::RsassaPkcs1V15Sha256)
            .send()
            .await
            .map_err(|e| Error::Signing(DisplayErrorContext(e).to_string()))?;

        output
            .signature()
            .map(|sig| sig.as_ref().to_vec())
            .ok_or_else(|| Error::Signing("KMS returned no signature".to_string()))
    }
}

/// Calls `kms:GetPublicKey`. Holds no other permission.
pub struct KmsPublicKeyReader {
    client: Client,
    key_id: String,
}

impl KmsPublicKeyReader {
    pub fn new(client: Client, key_id: impl Into<String>) -> Self {
        Self {
            client,
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl PublicKeyReader for KmsPublicKeyReader {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn public_key(&self) -> Result<PublicKeyMaterial> {
        let output = self
            .client
            .get_public_key()
            .key_id(&self.key_id)
            .send()
            .await
            .map_err(|e| Error::KeyUnavailable(DisplayErrorContext(e).to_string()))?;

        if output.key_usage() != Some(&KeyUsageType::SignVerify) {
            return Err(Error::UnsupportedKey(format!(
                "key {} is not a SIGN_VERIFY key",
                self.key_id
            )));
        }
        if !output
            .signing_algorithms()
            .contains(&SigningAlgorithmSpec::RsassaPkcs1V15Sha256)
        {
            return Err(Error::UnsupportedKey(format!(
                "key {} does not support RSASSA_PKCS1_V1_5_SHA_256",
                self.key_id
            )));
        }

        let spki_der = output
            .public_key()
            .map(|key| key.as_ref().to_vec())
            .ok_or_else(|| Error::KeyUnavailable("KMS returned no public key".to_string()))?;

        Ok(PublicKeyMaterial {
            key_id: self.key_id.clone(),
            algorithm: SigningAlgorithm::RS256,
            spki_der,
        })
    }
}

/// The provisioned KMS key.
pub struct KmsKey {
    key_id: String,
    signer: Arc<KmsSigner>,
    reader: Arc<CachedPublicKeyReader>,
}

impl KmsKey {
    /// `public_key_ttl` bounds how stale a published public key may be.
    pub fn new(client: Client, key_id: impl Into<String>, public_key_ttl: Duration) -> Self {
        let key_id = key_id.into();
        let reader = KmsPublicKeyReader::new(client.clone(), key_id.clone());

        Self {
            signer: Arc::new(KmsSigner::new(client, key_id.clone())),
            reader: Arc::new(CachedPublicKeyReader::new(Arc::new(reader), public_key_ttl)),
            key_id,
        }
    }
}

impl KeyProvider for KmsKey {
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

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_kms::config::Credentials;
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde_json::json;
    use tokenbridge_auth::LocalKey;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY_ID: &str = "1234abcd-12ab-34cd-56ef-1234567890ab";

    fn client(server: &MockServer) -> Client {
        let config = aws_sdk_kms::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-central-1"))
            .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .endpoint_url(server.uri())
            .build();
        Client::from_conf(config)
    }

    fn kms_json(status: u16, body: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_raw(body.to_string(), "application/x-amz-json-1.1")
    }

    #[tokio::test]
    async fn test_sign_returns_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "TrentService.Sign"))
            .respond_with(kms_json(200, json!({
                "KeyId": KEY_ID,
                "Signature": STANDARD.encode([7u8, 7, 7]),
                "SigningAlgorithm": "RSASSA_PKCS1_V1_5_SHA_256",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = KmsKey::new(client(&server), KEY_ID, Duration::from_secs(300));
        let signature = key.signer().sign(b"header.payload").await.unwrap();

        assert_eq!(signature, vec![7, 7, 7]);
        assert_eq!(key.signer().key_id(), KEY_ID);
    }

    #[tokio::test]
    async fn test_sign_failure_maps_to_signing_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "TrentService.Sign"))
            .respond_with(kms_json(
                400,
                json!({
                    "__type": "AccessDeniedException",
                    "message": "not authorized to perform kms:Sign",
                }),
            ))
            .mount(&server)
            .await;

        let signer = KmsSigner::new(client(&server), KEY_ID);
        assert!(matches!(signer.sign(b"x").await, Err(Error::Signing(_))));
    }

    #[tokio::test]
    async fn test_public_key_is_cached() {
        let local = LocalKey::generate("unused").unwrap();
        let spki = local.public_key_reader().public_key().await.unwrap().spki_der;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "TrentService.GetPublicKey"))
            .respond_with(kms_json(200, json!({
                "KeyId": format!("arn:aws:kms:eu-central-1:111122223333:key/{}", KEY_ID),
                "PublicKey": STANDARD.encode(&spki),
                "KeySpec": "RSA_2048",
                "KeyUsage": "SIGN_VERIFY",
                "SigningAlgorithms": ["RSASSA_PKCS1_V1_5_SHA_256", "RSASSA_PSS_SHA_256"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = KmsKey::new(client(&server), KEY_ID, Duration::from_secs(300));
        let reader = key.public_key_reader();
        for _ in 0..3 {
            let material = reader.public_key().await.unwrap();
            assert_eq!(material.key_id, KEY_ID);
            assert_eq!(material.spki_der, spki);
        }
    }

    #[tokio::test]
    async fn test_rejects_encrypt_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "TrentService.GetPublicKey"))
            .respond_with(kms_json(200, json!({
                "KeyId": KEY_ID,
                "PublicKey": STANDARD.encode([1u8]),
                "KeySpec": "RSA_2048",
                "KeyUsage": "ENCRYPT_DECRYPT",
                "EncryptionAlgorithms": ["RSAES_OAEP_SHA_256"],
            })))
            .mount(&server)
            .await;

        let reader = KmsPublicKeyReader::new(client(&server), KEY_ID);
        assert!(matches!(reader.public_key().await, Err(Error::UnsupportedKey(_))));
    }
}
