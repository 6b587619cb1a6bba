//! Credential verification and access token issuance for tokenbridge.
//!
//! Upstream credentials (GitHub Actions ID tokens, Kubernetes service
//! account tokens) are verified against their issuer's published keys, then
//! exchanged for a short-lived access token signed through a delegated
//! [`Signer`](tokenbridge_core::Signer).

pub mod exchange;
pub mod jwks;
pub mod jwt;
pub mod local;
pub mod oidc;
pub mod providers;

pub use exchange::{ExchangeRequest, IssuedToken, TokenBridge, TokenBridgeSet};
pub use jwks::{Jwk, Jwks, OidcDiscoveryDocument};
pub use jwt::{
    AccessTokenClaims, AccessTokenClaimsBuilder, JWT_TOKEN_TYPE, JwtVerifier, RESERVED_CLAIMS,
    TokenIssuer, TokenResponse, encode_jws, unverified_issuer,
};
pub use local::{LocalKey, generate_pkcs8_pem};
pub use oidc::{OidcVerifier, OidcVerifierConfig, certificate_thumbprint, upstream_client};
pub use providers::{
    github::{GITHUB_ACTIONS_ISSUER, GithubConfig, GithubVerifier},
    kubernetes::{KubernetesConfig, KubernetesVerifier},
};
