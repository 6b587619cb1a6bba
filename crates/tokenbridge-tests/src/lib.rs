//! Integration test infrastructure for tokenbridge.
//!
//! Runs the full router on a loopback port in front of wiremock-backed OIDC
//! issuers, so every exchange goes through discovery, JWKS retrieval and
//! signature verification exactly as it does against GitHub or a cluster.
//!
//! # Usage
//!
//! ```ignore
//! use tokenbridge_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     let token = ctx.github.workflow_token("acme").await;
//!     // Use ctx.client, ctx.github, ctx.kubernetes, etc.
//! }
//! ```

pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,tokenbridge_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
