//! amp-gateway: fetches AMP documents from an origin and serves them to a
//! cache as signed exchanges.

mod certs;
mod config;
mod csp;
mod error;
mod fetch;
mod headers;
mod metrics;
mod negotiation;
mod packager;
mod policy;
mod preload;
mod proxy;
mod rtv;
mod server;
mod transform;
mod url_sets;
mod validate;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use config::GatewayConfig;
use fetch::UpstreamFetcher;
use policy::AlwaysHealthy;
use rtv::StaticRtv;
use server::AppState;
use transform::IdentityTransformer;
use url_sets::UrlSetMatcher;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("AMPGW_CONFIG").ok())
        .unwrap_or_else(|| "amp-gateway.toml".to_string());

    let config = GatewayConfig::load(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let _tracing_guard = gateway_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            url_sets = config.url_sets.len(),
            "Starting amp-gateway"
        );

        run(config).await
    })
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let matcher = UrlSetMatcher::new(&config.url_sets)?;
    let fetcher = UpstreamFetcher::new(
        Duration::from_secs(config.upstream.timeout_secs),
        config.signing.forward_request_headers.clone(),
    )?;
    let cert_provider = certs::StaticCertProvider::from_pem_file(&config.signing.cert_path)?;
    let signing_key = certs::load_signing_key(&config.signing.key_path)?;

    let state = AppState {
        matcher,
        fetcher,
        transformer: Arc::new(IdentityTransformer),
        rtv_cache: Arc::new(StaticRtv {
            rtv: config.rtv.rtv.clone(),
            css: config.rtv.css.clone(),
        }),
        cert_provider: Arc::new(cert_provider),
        signing_key: Arc::new(signing_key),
        health: Arc::new(AlwaysHealthy),
        override_base_url: config.signing.override_base_url.clone(),
        require_headers: config.signing.require_headers,
        clock: SystemTime::now,
    };

    server::run(state, &config.server.listen_address).await
}
