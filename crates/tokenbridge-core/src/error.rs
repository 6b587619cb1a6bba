//! Error types for tokenbridge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Custom claim '{0}' cannot overwrite reserved claims")]
    ReservedClaim(String),

    // Credential errors
    #[error("Credential rejected: {0}")]
    CredentialRejected(String),

    #[error("Credential expired")]
    CredentialExpired,

    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    // Key service errors
    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Public key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    // Provisioning errors
    #[error("Permission misconfigured: {0}")]
    PermissionMisconfigured(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Infrastructure errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures caused by the presented credential rather than by
    /// this service. These never reach the signing key.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::CredentialRejected(_)
                | Error::CredentialExpired
                | Error::UnknownIssuer(_)
                | Error::ProviderUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
