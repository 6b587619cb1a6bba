//! Identity provider verifiers.

pub mod github;
pub mod kubernetes;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tokenbridge_core::{Error, Provider, Result, VerifiedIdentity};

/// Build the common part of a verified identity from validated claims.
pub(crate) fn identity_from_claims(
    provider: Provider,
    issuer: &str,
    claims: &Map<String, Value>,
) -> Result<VerifiedIdentity> {
    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::CredentialRejected("missing sub claim".to_string()))?;

    Ok(VerifiedIdentity::new(provider, issuer, subject)
        .with_audience(audience_of(claims))
        .with_expires_at(expiry_of(claims)?))
}

/// `aud` may be a single string or an array.
fn audience_of(claims: &Map<String, Value>) -> Vec<String> {
    match claims.get("aud") {
        Some(Value::String(aud)) => vec![aud.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => vec![],
    }
}

fn expiry_of(claims: &Map<String, Value>) -> Result<DateTime<Utc>> {
    claims
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
        .ok_or_else(|| Error::CredentialRejected("missing exp claim".to_string()))
}
