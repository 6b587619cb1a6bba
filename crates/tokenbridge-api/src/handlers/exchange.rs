//! Credential exchange handlers.

use axum::{
    Extension, Form, Json,
    extract::{FromRequest, Request, State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokenbridge_auth::{ExchangeRequest, JWT_TOKEN_TYPE};
use tokenbridge_core::RequestId;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::state::ExchangeState;

const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// JSON body of the per-provider exchange routes.
#[derive(Debug, Deserialize)]
pub struct ProviderExchangeBody {
    #[serde(default, alias = "subject_token")]
    pub id_token: String,
    #[serde(default)]
    pub custom_claims: Map<String, Value>,
}

/// RFC 8693 form body, accepted on every exchange route.
#[derive(Debug, Deserialize)]
pub struct TokenExchangeForm {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub subject_token: String,
    #[serde(default)]
    pub subject_token_type: Option<String>,
}

impl TokenExchangeForm {
    /// Check the grant and token types and return the subject token.
    fn into_subject_token(self, request_id: RequestId) -> Result<String, ApiError> {
        if self.subject_token.is_empty() {
            warn!(request_id = %request_id, "subject_token is missing in the payload");
            return Err(ApiError::BadRequest("subject_token is missing".to_string()));
        }
        if self.grant_type.as_deref().is_some_and(|g| g != TOKEN_EXCHANGE_GRANT) {
            return Err(ApiError::BadRequest("unsupported grant_type".to_string()));
        }
        if self
            .subject_token_type
            .as_deref()
            .is_some_and(|t| t != ID_TOKEN_TYPE && t != JWT_TOKEN_TYPE)
        {
            return Err(ApiError::BadRequest("unsupported subject_token_type".to_string()));
        }
        Ok(self.subject_token)
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE))
}

/// `POST /github/exchange`, `POST /k8s/exchange`.
///
/// Takes the RFC 8693 form when the body is form-encoded, else the JSON
/// body with optional custom claims.
pub async fn provider_exchange(
    State(state): State<Arc<ExchangeState>>,
    Extension(request_id): Extension<RequestId>,
    request: Request,
) -> Result<Response, ApiError> {
    let headers = request.headers().clone();

    let (credential, custom_claims) = if is_form(&headers) {
        let Form(form) = Form::<TokenExchangeForm>::from_request(request, &()).await.map_err(|e| {
            warn!(request_id = %request_id, handler = %state.handler, error = %e, "Failed to parse form payload");
            ApiError::BadRequest("failed to parse form payload".to_string())
        })?;
        (form.into_subject_token(request_id)?, Map::new())
    } else {
        let Json(body) = Json::<ProviderExchangeBody>::from_request(request, &()).await.map_err(|e| {
            warn!(request_id = %request_id, handler = %state.handler, error = %e, "Failed to decode JSON payload");
            ApiError::BadRequest("failed to decode JSON payload".to_string())
        })?;
        if body.id_token.is_empty() {
            warn!(request_id = %request_id, handler = %state.handler, "ID token is missing in the payload");
            return Err(ApiError::BadRequest("ID token is missing".to_string()));
        }
        (body.id_token, body.custom_claims)
    };

    let request = ExchangeRequest::new(credential, state.issuer.resolve(&headers)?, request_id)
        .with_custom_claims(custom_claims);
    exchange(&state, request).await
}

/// `POST /exchange` (RFC 8693 form).
pub async fn unified_exchange(
    State(state): State<Arc<ExchangeState>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    form: Result<Form<TokenExchangeForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form.map_err(|e| {
        warn!(request_id = %request_id, error = %e, "Failed to parse form payload");
        ApiError::BadRequest("failed to parse form payload".to_string())
    })?;

    let request = ExchangeRequest::new(
        form.into_subject_token(request_id)?,
        state.issuer.resolve(&headers)?,
        request_id,
    );
    exchange(&state, request).await
}

async fn exchange(state: &ExchangeState, request: ExchangeRequest) -> Result<Response, ApiError> {
    let request_id = request.request_id;
    info!(request_id = %request_id, handler = %state.handler, "Handling token exchange");

    let issued = state.bridges.exchange(request).await.map_err(|e| {
        let message = e.to_string();
        let api_error = ApiError::from_exchange(e);
        if api_error.status().is_client_error() {
            warn!(request_id = %request_id, handler = %state.handler, error = %message, "Token exchange failed");
        } else {
            error!(request_id = %request_id, handler = %state.handler, error = %message, "Token exchange errored");
        }
        api_error
    })?;

    let mut response = Json(issued.response()).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
