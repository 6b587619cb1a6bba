//! tokenbridge core
//!
//! Shared vocabulary for the token bridge: the error type, the identity model
//! produced by upstream verification, the key capability ports handed to
//! request handlers, and the key policy that decides which handler may hold
//! which capability.

pub mod error;
pub mod identity;
pub mod ids;
pub mod policy;
pub mod ports;

pub use error::{Error, Result};
pub use identity::{Provider, VerifiedIdentity};
pub use ids::RequestId;
pub use policy::{Grant, HandlerRole, KeyPermission, KeyPolicy};
pub use ports::{IdentityVerifier, KeyProvider, PublicKeyMaterial, PublicKeyReader, Signer, SigningAlgorithm};
