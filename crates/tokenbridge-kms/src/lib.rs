//! AWS KMS backend for the tokenbridge signing key.
//!
//! The key is an asymmetric `RSA_2048` / `SIGN_VERIFY` KMS key. Its private
//! half never leaves KMS: [`KmsKey`] hands out a signer that calls
//! `kms:Sign` and a reader that calls `kms:GetPublicKey`, and nothing else.

pub mod cache;
pub mod key;

pub use cache::CachedPublicKeyReader;
pub use key::{KmsKey, KmsPublicKeyReader, KmsSigner, create_key, load_client};
