//! Configuration types and loading logic.

use crate::url_sets::UrlSet;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use gateway_tracing::TracingConfig;
use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    pub signing: SigningConfig,

    /// Which (fetch, sign) URL pairs this gateway is authorized to package.
    pub url_sets: Vec<UrlSet>,

    #[serde(default)]
    pub rtv: RtvConfig,

    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Upstream fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Total fetch timeout, connection included.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Signing material and packaging behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// PEM certificate chain, end-entity first.
    pub cert_path: PathBuf,

    /// PKCS#8 PEM ECDSA P-256 private key matching the certificate.
    pub key_path: PathBuf,

    /// Base for cert URLs when the gateway is served from somewhere other
    /// than the signed origin.
    #[serde(default)]
    pub override_base_url: Option<Url>,

    /// Require inbound `AMP-Cache-Transform`/`Accept` negotiation before
    /// signing. Disable only behind a frontend that guarantees them.
    #[serde(default = "default_true")]
    pub require_headers: bool,

    /// Inbound request headers copied onto the upstream fetch.
    #[serde(default)]
    pub forward_request_headers: Vec<String>,
}

/// Fixed runtime-version inputs for the transformer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RtvConfig {
    #[serde(default)]
    pub rtv: String,
    #[serde(default)]
    pub css: String,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (AMPGW_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("AMPGW_").split("__"))
            .extract()?;

        Ok(config)
    }
}
