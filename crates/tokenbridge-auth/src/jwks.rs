//! JSON Web Keys and the OIDC discovery document.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokenbridge_core::{Error, PublicKeyMaterial, Result};

/// Smallest RSA modulus accepted for a published key.
const MIN_RSA_BITS: usize = 2048;

/// OIDC discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcDiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub subject_types_supported: Vec<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub claims_supported: Vec<String>,
}

impl OidcDiscoveryDocument {
    /// Discovery document for tokens issued by this bridge.
    pub fn new(issuer: &str, jwks_uri: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            jwks_uri: jwks_uri.to_string(),
            response_types_supported: vec!["id_token".to_string()],
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec!["RS256".to_string()],
            claims_supported: [
                "sub",
                "aud",
                "exp",
                "iat",
                "iss",
                "jti",
                "nbf",
                "provider",
                "repository",
                "repository_owner",
                "ref",
                "sha",
                "actor",
                "environment",
                "namespace",
                "service_account",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }
}

/// JSON Web Key.
///
/// Only public parameters exist on this type, so a serialized key set can
/// never carry private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Build the JWK for the signing key's public half.
    pub fn from_public_key(material: &PublicKeyMaterial) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_der(&material.spki_der)
            .map_err(|e| Error::UnsupportedKey(format!("not an RSA public key: {}", e)))?;

        let bits = key.size() * 8;
        if bits < MIN_RSA_BITS {
            return Err(Error::UnsupportedKey(format!(
                "RSA modulus of {} bits is below {}",
                bits, MIN_RSA_BITS
            )));
        }

        Ok(Self {
            kty: "RSA".to_string(),
            kid: material.key_id.clone(),
            key_use: Some("sig".to_string()),
            alg: Some(material.algorithm.as_jose().to_string()),
            n: Some(URL_SAFE_NO_PAD.encode(key.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(key.e().to_bytes_be())),
            crv: None,
            x: None,
            y: None,
        })
    }

    /// Whether the key may verify signatures.
    pub fn is_signing_key(&self) -> bool {
        self.key_use.as_deref().is_none_or(|u| u == "sig")
    }

    /// The algorithm pinned by the key, if any.
    pub fn algorithm(&self) -> Result<Option<Algorithm>> {
        self.alg
            .as_deref()
            .map(|alg| {
                Algorithm::from_str(alg)
                    .map_err(|_| Error::UnsupportedKey(format!("unknown algorithm {}", alg)))
            })
            .transpose()
    }

    pub fn decoding_key(&self) -> Result<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let (Some(n), Some(e)) = (&self.n, &self.e) else {
                    return Err(Error::UnsupportedKey(format!(
                        "RSA key '{}' is missing modulus or exponent",
                        self.kid
                    )));
                };
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| Error::UnsupportedKey(e.to_string()))
            }
            "EC" => {
                let (Some(x), Some(y)) = (&self.x, &self.y) else {
                    return Err(Error::UnsupportedKey(format!(
                        "EC key '{}' is missing coordinates",
                        self.kid
                    )));
                };
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| Error::UnsupportedKey(e.to_string()))
            }
            kty => Err(Error::UnsupportedKey(format!("key type {}", kty))),
        }
    }
}

/// JSON Web Key Set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    pub fn new() -> Self {
        Self { keys: vec![] }
    }

    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// Find the signing key for `kid`. Without a `kid` a set holding exactly
    /// one signing key resolves to that key.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        let mut signing = self.keys.iter().filter(|k| k.is_signing_key());
        match kid {
            Some(kid) => signing.find(|k| k.kid == kid),
            None => {
                let first = signing.next()?;
                signing.next().is_none().then_some(first)
            }
        }
    }
}

impl Default for Jwks {
    fn default() -> Self {
        Self::new()
    }
}
