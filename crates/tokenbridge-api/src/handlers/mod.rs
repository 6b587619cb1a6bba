//! Request handlers.

pub mod discovery;
pub mod exchange;
pub mod health;
pub mod jwks;

use axum::http::{HeaderMap, header};
use tracing::warn;

use crate::error::ApiError;

/// Where the `iss` of issued tokens comes from.
///
/// A configured URL always wins. Otherwise the `Host` header is used, but
/// only when it names one of the allowed hosts.
#[derive(Debug, Clone)]
pub struct PublicIssuer {
    configured: Option<String>,
    allowed_hosts: Vec<String>,
}

impl PublicIssuer {
    pub fn new(configured: Option<String>, allowed_hosts: Vec<String>) -> Self {
        Self {
            configured: configured.map(|url| url.trim_end_matches('/').to_string()),
            allowed_hosts,
        }
    }

    /// True when some request can resolve an issuer.
    pub fn is_resolvable(&self) -> bool {
        self.configured.is_some() || !self.allowed_hosts.is_empty()
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        if let Some(url) = &self.configured {
            return Ok(url.clone());
        }

        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing Host header".to_string()))?;

        if !self.allowed_hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)) {
            warn!(host = %host, "Rejected request for a host that is not allowed");
            return Err(ApiError::BadRequest("Host is not allowed".to_string()));
        }
        Ok(format!("https://{}", host.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const GATEWAY_HOST: &str = "abc.execute-api.eu-central-1.amazonaws.com";

    fn with_host(host: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static(host));
        headers
    }

    #[test]
    fn test_configured_issuer_ignores_host() {
        let issuer = PublicIssuer::new(Some("https://tokens.example.com/".to_string()), vec![]);
        assert_eq!(
            issuer.resolve(&with_host("attacker.example")).unwrap(),
            "https://tokens.example.com"
        );
    }

    #[test]
    fn test_host_must_be_allowed() {
        let issuer = PublicIssuer::new(None, vec![GATEWAY_HOST.to_string()]);

        assert_eq!(
            issuer.resolve(&with_host(GATEWAY_HOST)).unwrap(),
            format!("https://{}", GATEWAY_HOST)
        );
        assert!(issuer.resolve(&with_host("attacker.example")).is_err());
        assert!(issuer.resolve(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_unresolvable_without_url_or_hosts() {
        assert!(!PublicIssuer::new(None, vec![]).is_resolvable());
        assert!(PublicIssuer::new(None, vec![GATEWAY_HOST.to_string()]).is_resolvable());
    }
}
