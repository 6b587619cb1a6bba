//! Server configuration.
//!
//! Layered, later sources winning:
//!
//! 1. built-in defaults
//! 2. `tokenbridge.{yaml,toml,json}` in the working directory, or `--config <path>`
//! 3. `TOKENBRIDGE__<SECTION>__<KEY>` environment variables
//! 4. `KMS_KEY_ID`, which binds the process to the provisioned key

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, Source};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokenbridge_api::{ApiSettings, RouteLayout, ThrottleConfig};
use tokenbridge_auth::{GithubConfig, KubernetesConfig};
use tokenbridge_core::Provider;

const ENV_PREFIX: &str = "TOKENBRIDGE";
const KMS_KEY_ID_VAR: &str = "KMS_KEY_ID";

/// Keys parsed as comma-separated lists when set from the environment.
const LIST_KEYS: &[&str] = &[
    "token.audience",
    "providers.github.audiences",
    "providers.github.allowed_owners",
    "providers.github.tls_thumbprints",
    "server.allowed_hosts",
    "providers.kubernetes.audiences",
    "providers.kubernetes.allowed_namespaces",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub routing: RoutingSection,
    pub throttle: ThrottleConfig,
    pub signing: SigningSection,
    pub token: TokenSection,
    pub providers: ProvidersSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: String,
    /// Public issuer URL of issued tokens.
    pub issuer_url: Option<String>,
    /// Hosts whose `Host` header may name the issuer (`https://<Host>`)
    /// when `issuer_url` is unset. One of the two is required.
    pub allowed_hosts: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            issuer_url: None,
            allowed_hosts: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub layout: RouteLayout,
    /// Path prefix for every route, e.g. `default` to serve `/default/...`.
    /// Unset serves from `/`, which is what a gateway that strips its own
    /// stage prefix forwards.
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningBackend {
    #[default]
    Kms,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSection {
    pub backend: SigningBackend,
    pub kms_key_id: Option<String>,
    pub region: Option<String>,
    /// PKCS#8 PEM; a throwaway key is generated when unset.
    pub local_key_path: Option<PathBuf>,
    pub local_key_id: String,
    pub public_key_cache_ttl_secs: u64,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            backend: SigningBackend::Kms,
            kms_key_id: None,
            region: None,
            local_key_path: None,
            local_key_id: "local".to_string(),
            public_key_cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSection {
    pub ttl_secs: i64,
    /// Audience of issued tokens; the upstream audience when empty.
    pub audience: Vec<String>,
}

impl Default for TokenSection {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            audience: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    pub github: GithubConfig,
    pub kubernetes: KubernetesConfig,
}

impl ProvidersSection {
    pub fn enabled(&self) -> Vec<Provider> {
        let mut providers = vec![];
        if self.github.enabled {
            providers.push(Provider::Github);
        }
        if self.kubernetes.enabled {
            providers.push(Provider::Kubernetes);
        }
        providers
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info,tokenbridge=debug".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from all layers and validate. `.env` must already be applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::load_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load without validation, for commands that run before a key exists.
    pub fn load_unvalidated(path: Option<&Path>) -> Result<Self> {
        let kms_key_id = std::env::var(KMS_KEY_ID_VAR).ok().filter(|v| !v.is_empty());
        match path {
            Some(path) => Self::build(File::from(path).required(true), kms_key_id),
            None => Self::build(File::with_name("tokenbridge").required(false), kms_key_id),
        }
        .with_context(|| match path {
            Some(path) => format!("failed to load configuration from {}", path.display()),
            None => "failed to load configuration".to_string(),
        })
    }

    fn build<S>(file: S, kms_key_id: Option<String>) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .try_parsing(true);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        Ok(Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(environment)
            .set_override_option("signing.kms_key_id", kms_key_id)?
            .build()?
            .try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.signing.backend == SigningBackend::Kms
            && self.signing.kms_key_id.as_deref().is_none_or(str::is_empty)
        {
            bail!("signing backend kms requires a key id (set {} or signing.kms_key_id)", KMS_KEY_ID_VAR);
        }
        if self.server.issuer_url.as_deref().is_none_or(str::is_empty) && self.server.allowed_hosts.is_empty() {
            bail!("server.issuer_url or server.allowed_hosts must be set");
        }
        if self.providers.enabled().is_empty() {
            bail!("at least one identity provider must be enabled");
        }
        if self.token.ttl_secs <= 0 {
            bail!("token.ttl_secs must be positive");
        }
        self.throttle.validate()?;
        Ok(())
    }

    /// Key id the process is bound to.
    pub fn key_id(&self) -> &str {
        match self.signing.backend {
            SigningBackend::Kms => self.signing.kms_key_id.as_deref().unwrap_or_default(),
            SigningBackend::Local => &self.signing.local_key_id,
        }
    }

    pub fn public_key_ttl(&self) -> Duration {
        Duration::from_secs(self.signing.public_key_cache_ttl_secs)
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            layout: self.routing.layout,
            stage: self.routing.stage.clone(),
            issuer_url: self.server.issuer_url.clone().filter(|url| !url.is_empty()),
            allowed_hosts: self.server.allowed_hosts.clone(),
            token_ttl: chrono::Duration::seconds(self.token.ttl_secs),
            token_audience: (!self.token.audience.is_empty()).then(|| self.token.audience.clone()),
            throttle: self.throttle,
            jwks_max_age: self.public_key_ttl(),
        }
    }
}
