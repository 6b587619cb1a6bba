//! Route topology and the key policy derived from it.
//!
//! The topology is fixed at startup: a layout, the enabled providers and an
//! optional stage name determine every (method, path) pair, the handler that
//! serves it and the key capability that handler is granted.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokenbridge_core::{Error, HandlerRole, KeyPolicy, Provider, Result};

pub const JWKS_PATH: &str = "/.well-known/jwks.json";
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const HEALTH_PATH: &str = "/health";

/// Handler name of the JWKS route in the key policy.
pub const JWKS_HANDLER: &str = "jwks";

/// How exchange routes are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteLayout {
    /// One JSON exchange route per provider.
    #[default]
    PerProvider,
    /// A single RFC 8693 form route; the provider is chosen by issuer.
    Unified,
}

/// One mounted route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub method: Method,
    /// Path without the stage prefix.
    pub path: String,
    pub handler: String,
    pub role: HandlerRole,
    /// Providers served by an exchange route.
    pub providers: Vec<Provider>,
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<5} {:<28} -> {}", self.method.as_str(), self.path, self.handler)
    }
}

/// All key-bearing routes of one deployment.
#[derive(Debug, Clone)]
pub struct Topology {
    pub layout: RouteLayout,
    pub stage: Option<String>,
    pub routes: Vec<RouteSpec>,
}

impl Topology {
    pub fn new(layout: RouteLayout, stage: Option<String>, providers: &[Provider]) -> Result<Self> {
        if providers.is_empty() {
            return Err(Error::InvalidConfig("no identity provider is enabled".to_string()));
        }
        for (i, provider) in providers.iter().enumerate() {
            if providers[..i].contains(provider) {
                return Err(Error::InvalidConfig(format!("provider {} configured twice", provider)));
            }
        }
        if let Some(stage) = &stage {
            validate_stage(stage)?;
        }

        let mut routes: Vec<RouteSpec> = match layout {
            RouteLayout::PerProvider => providers
                .iter()
                .map(|provider| RouteSpec {
                    method: Method::POST,
                    path: format!("/{}/exchange", provider.route_segment()),
                    handler: format!("{}-exchange", provider.route_segment()),
                    role: HandlerRole::Exchange,
                    providers: vec![*provider],
                })
                .collect(),
            RouteLayout::Unified => vec![RouteSpec {
                method: Method::POST,
                path: "/exchange".to_string(),
                handler: "exchange".to_string(),
                role: HandlerRole::Exchange,
                providers: providers.to_vec(),
            }],
        };

        routes.push(RouteSpec {
            method: Method::GET,
            path: JWKS_PATH.to_string(),
            handler: JWKS_HANDLER.to_string(),
            role: HandlerRole::Jwks,
            providers: vec![],
        });

        Ok(Self { layout, stage, routes })
    }

    /// Least-privilege policy: `Sign` for exchange handlers, `GetPublicKey`
    /// for the JWKS handler.
    pub fn key_policy(&self, key_id: &str) -> KeyPolicy {
        KeyPolicy::least_privilege(key_id, self.routes.iter().map(|r| (r.handler.clone(), r.role)))
    }

    /// Prefix for every route, empty without a stage.
    pub fn prefix(&self) -> String {
        self.stage.as_ref().map(|s| format!("/{}", s)).unwrap_or_default()
    }

    /// Full path of a route, including the stage prefix.
    pub fn full_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix(), path)
    }
}

fn validate_stage(stage: &str) -> Result<()> {
    let valid = !stage.is_empty()
        && stage
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::InvalidConfig(format!("invalid stage name '{}'", stage)));
    }
    Ok(())
}
