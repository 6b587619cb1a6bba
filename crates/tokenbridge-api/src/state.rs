//! Per-handler state.
//!
//! Each handler gets only what it needs. Exchange state carries bridges
//! built over a [`Signer`](tokenbridge_core::Signer); JWKS state carries a
//! [`PublicKeyReader`]; discovery state carries no key capability at all.

use std::sync::Arc;
use std::time::Duration;
use tokenbridge_auth::TokenBridgeSet;
use tokenbridge_core::PublicKeyReader;

use crate::handlers::PublicIssuer;

/// State of one exchange route.
pub struct ExchangeState {
    /// Handler name in the key policy.
    pub handler: String,
    pub bridges: TokenBridgeSet,
    pub issuer: PublicIssuer,
}

/// State of the JWKS route.
pub struct JwksState {
    pub reader: Arc<dyn PublicKeyReader>,
    /// Advertised in `Cache-Control: max-age`.
    pub max_age: Duration,
}

/// State of the discovery route.
pub struct DiscoveryState {
    pub issuer: PublicIssuer,
    /// JWKS path including any stage prefix.
    pub jwks_path: String,
}
