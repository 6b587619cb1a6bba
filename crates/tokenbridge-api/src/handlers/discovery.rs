//! OIDC discovery document for issued tokens.

use axum::{Json, extract::State, http::HeaderMap};
use std::sync::Arc;
use tokenbridge_auth::OidcDiscoveryDocument;

use crate::error::ApiError;
use crate::state::DiscoveryState;

/// `GET /.well-known/openid-configuration`
pub async fn openid_configuration(
    State(state): State<Arc<DiscoveryState>>,
    headers: HeaderMap,
) -> Result<Json<OidcDiscoveryDocument>, ApiError> {
    let issuer = state.issuer.resolve(&headers)?;
    let jwks_uri = format!("{}{}", issuer, state.jwks_path);
    Ok(Json(OidcDiscoveryDocument::new(&issuer, &jwks_uri)))
}
