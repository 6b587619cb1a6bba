//! Router assembly.

use axum::{
    Router,
    middleware,
    routing::{MethodRouter, get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokenbridge_auth::{TokenBridge, TokenBridgeSet};
use tokenbridge_core::{Error, HandlerRole, IdentityVerifier, KeyPolicy, KeyProvider, Result, Signer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{PublicIssuer, discovery, exchange, health, jwks};
use crate::middleware::{cors_layer, request_id};
use crate::state::{DiscoveryState, ExchangeState, JwksState};
use crate::throttle::{StageThrottle, ThrottleConfig, throttle};
use crate::topology::{DISCOVERY_PATH, HEALTH_PATH, JWKS_PATH, RouteLayout, RouteSpec, Topology};

/// Settings of the routing layer.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub layout: RouteLayout,
    pub stage: Option<String>,
    /// Public issuer URL of issued tokens.
    pub issuer_url: Option<String>,
    /// Without an issuer URL, `https://<Host>` is used for these hosts only.
    pub allowed_hosts: Vec<String>,
    pub token_ttl: chrono::Duration,
    /// Audience of issued tokens. Defaults to the upstream audience.
    pub token_audience: Option<Vec<String>>,
    pub throttle: ThrottleConfig,
    /// `max-age` of the JWKS response.
    pub jwks_max_age: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            layout: RouteLayout::default(),
            stage: None,
            issuer_url: None,
            allowed_hosts: vec![],
            token_ttl: chrono::Duration::seconds(900),
            token_audience: None,
            throttle: ThrottleConfig::default(),
            jwks_max_age: Duration::from_secs(300),
        }
    }
}

impl ApiSettings {
    /// Topology for the given verifiers.
    pub fn topology(&self, verifiers: &[Arc<dyn IdentityVerifier>]) -> Result<Topology> {
        let providers: Vec<_> = verifiers.iter().map(|v| v.provider()).collect();
        Topology::new(self.layout, self.stage.clone(), &providers)
    }

    pub fn public_issuer(&self) -> PublicIssuer {
        PublicIssuer::new(self.issuer_url.clone(), self.allowed_hosts.clone())
    }
}

/// Build the router, handing each handler only the capability its grant in
/// `policy` allows.
pub fn create_router(
    settings: &ApiSettings,
    topology: &Topology,
    policy: &KeyPolicy,
    key: &dyn KeyProvider,
    verifiers: &[Arc<dyn IdentityVerifier>],
) -> Result<Router> {
    let issuer = settings.public_issuer();
    if !issuer.is_resolvable() {
        return Err(Error::InvalidConfig(
            "an issuer URL or at least one allowed host is required".to_string(),
        ));
    }

    policy.validate()?;
    if policy.key_id != key.key_id() {
        return Err(Error::PermissionMisconfigured(format!(
            "policy is for key {} but the provisioned key is {}",
            policy.key_id,
            key.key_id()
        )));
    }

    let mut routes = Router::new();
    for route in &topology.routes {
        let grant = policy.grant_for(&route.handler)?;
        if grant.role != route.role {
            return Err(Error::PermissionMisconfigured(format!(
                "handler '{}' is granted as {:?} but serves {:?}",
                route.handler, grant.role, route.role
            )));
        }

        let method_router: MethodRouter = match route.role {
            HandlerRole::Exchange => {
                let state = Arc::new(ExchangeState {
                    handler: route.handler.clone(),
                    bridges: exchange_bridges(settings, route, grant.signer(key)?, verifiers)?,
                    issuer: issuer.clone(),
                });
                match topology.layout {
                    RouteLayout::PerProvider => post(exchange::provider_exchange).with_state(state),
                    RouteLayout::Unified => post(exchange::unified_exchange).with_state(state),
                }
            }
            HandlerRole::Jwks => {
                let state = Arc::new(JwksState {
                    reader: grant.public_key_reader(key)?,
                    max_age: settings.jwks_max_age,
                });
                get(jwks::jwks).with_state(state)
            }
        };

        info!(
            method = %route.method,
            path = %topology.full_path(&route.path),
            handler = %route.handler,
            "Mounted route"
        );
        routes = routes.route(&route.path, method_router);
    }

    let discovery_state = Arc::new(DiscoveryState {
        issuer,
        jwks_path: topology.full_path(JWKS_PATH),
    });
    routes = routes
        .route(
            DISCOVERY_PATH,
            get(discovery::openid_configuration).with_state(discovery_state),
        )
        .route(HEALTH_PATH, get(health::health));

    let routes = match &topology.stage {
        Some(stage) => Router::new().nest(&format!("/{}", stage), routes),
        None => routes,
    };

    let stage_throttle = Arc::new(StageThrottle::new(settings.throttle)?);
    Ok(routes
        .layer(middleware::from_fn_with_state(stage_throttle, throttle))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer()))
}

fn exchange_bridges(
    settings: &ApiSettings,
    route: &RouteSpec,
    signer: Arc<dyn Signer>,
    verifiers: &[Arc<dyn IdentityVerifier>],
) -> Result<TokenBridgeSet> {
    let mut bridges = TokenBridgeSet::new();
    for provider in &route.providers {
        let verifier = verifiers
            .iter()
            .find(|v| v.provider() == *provider)
            .ok_or_else(|| Error::InvalidConfig(format!("no verifier for provider {}", provider)))?;

        let mut bridge = TokenBridge::new(verifier.clone(), signer.clone()).with_ttl(settings.token_ttl);
        if let Some(audience) = &settings.token_audience {
            bridge = bridge.with_audience(audience.clone());
        }
        bridges = bridges.with_bridge(bridge);
    }
    Ok(bridges)
}
