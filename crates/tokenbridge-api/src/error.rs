//! HTTP error responses.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokenbridge_core::Error;

/// Error returned by a handler.
///
/// Messages are coarse: a rejected credential never tells the
/// caller which check failed.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("token exchange failed")]
    ExchangeFailed,

    #[error("failed to sign access token")]
    SigningFailed,

    #[error("failed to get JWKS")]
    JwksFailed,

    #[error("too many requests")]
    TooManyRequests { retry_after: Duration },

    #[error("{0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ExchangeFailed => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::SigningFailed | ApiError::JwksFailed | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Map a failed exchange. A refused custom claim answers like a
    /// rejected credential.
    pub fn from_exchange(err: Error) -> Self {
        match err {
            e if e.is_authentication_failure() => ApiError::ExchangeFailed,
            Error::ReservedClaim(_) => ApiError::ExchangeFailed,
            Error::InvalidRequest(msg) => ApiError::BadRequest(msg),
            _ => ApiError::SigningFailed,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            ApiError::TooManyRequests { retry_after } => Some(retry_after.as_secs_f64().ceil().max(1.0) as u64),
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_mapping() {
        assert_eq!(
            ApiError::from_exchange(Error::CredentialExpired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from_exchange(Error::UnknownIssuer("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from_exchange(Error::Signing("kms".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let reserved = ApiError::from_exchange(Error::ReservedClaim("sub".into()));
        assert_eq!(reserved.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(reserved.to_string(), "token exchange failed");
    }

    #[test]
    fn test_rejection_message_is_generic() {
        let err = ApiError::from_exchange(Error::CredentialRejected("audience mismatch".into()));
        assert_eq!(err.to_string(), "token exchange failed");
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::TooManyRequests {
            retry_after: Duration::from_millis(20),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
