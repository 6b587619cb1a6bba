//! HTTP routing layer for tokenbridge.
//!
//! Maps fixed (method, path) pairs to the exchange, JWKS, discovery and
//! health handlers behind one stage-wide throttle.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod throttle;
pub mod topology;

use axum::Router;
use std::sync::Arc;
use tokenbridge_core::{IdentityVerifier, KeyProvider, Result};

pub use error::ApiError;
pub use handlers::PublicIssuer;
pub use routes::{ApiSettings, create_router};
pub use throttle::{StageThrottle, ThrottleConfig};
pub use topology::{RouteLayout, RouteSpec, Topology};

/// Build the application with the least-privilege key policy for its
/// topology.
pub fn build_app(
    settings: &ApiSettings,
    key: &dyn KeyProvider,
    verifiers: &[Arc<dyn IdentityVerifier>],
) -> Result<Router> {
    let topology = settings.topology(verifiers)?;
    let policy = topology.key_policy(key.key_id());
    create_router(settings, &topology, &policy, key, verifiers)
}
