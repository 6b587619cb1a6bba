//! Public key set handler.

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokenbridge_auth::{Jwk, Jwks};
use tracing::{debug, error};

use crate::error::ApiError;
use crate::state::JwksState;

/// `GET /.well-known/jwks.json`
pub async fn jwks(State(state): State<Arc<JwksState>>) -> Result<Response, ApiError> {
    let material = state.reader.public_key().await.map_err(|e| {
        error!(kid = %state.reader.key_id(), error = %e, "Failed to get public key");
        ApiError::JwksFailed
    })?;

    let jwk = Jwk::from_public_key(&material).map_err(|e| {
        error!(kid = %material.key_id, error = %e, "Failed to build JWK");
        ApiError::JwksFailed
    })?;

    let mut jwks = Jwks::new();
    jwks.add_key(jwk);
    debug!(kid = %material.key_id, "Serving JWKS");

    let mut response = Json(jwks).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", state.max_age.as_secs())) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    Ok(response)
}
