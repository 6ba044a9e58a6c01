//! Axum HTTP server: router, state, handlers, graceful shutdown.

use crate::certs::CertProvider;
use crate::error::HttpError;
use crate::fetch::{InboundRequest, UpstreamFetcher};
use crate::metrics;
use crate::policy::{self, PackagingHealth};
use crate::rtv::RtvCache;
use crate::transform::Transformer;
use crate::url_sets::UrlSetMatcher;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use ring::signature::EcdsaKeyPair;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::Instrument;
use url::Url;

/// Shared application state.
pub struct AppState {
    pub matcher: UrlSetMatcher,
    pub fetcher: UpstreamFetcher,
    pub transformer: Arc<dyn Transformer>,
    pub rtv_cache: Arc<dyn RtvCache>,
    pub cert_provider: Arc<dyn CertProvider>,
    pub signing_key: Arc<EcdsaKeyPair>,
    pub health: Arc<dyn PackagingHealth>,
    pub override_base_url: Option<Url>,
    /// Require inbound `AMP-Cache-Transform` and `Accept` negotiation
    /// before signing.
    pub require_headers: bool,
    /// Injectable for tests; production uses `SystemTime::now`.
    pub clock: fn() -> SystemTime,
}

/// Build and run the HTTP server.
pub async fn run(state: AppState, listen_address: &str) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    tracing::info!(address = %listen_address, "amp-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("amp-gateway shut down gracefully");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/priv/doc", get(handle_doc))
        .route("/priv/doc/{*sign_url}", get(handle_doc_path))
        .route("/healthz", get(handle_healthz))
        .route("/metrics", get(handle_metrics))
        .with_state(Arc::new(state))
}

/// Handler for `GET /priv/doc?sign=…&fetch=…`.
async fn handle_doc(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (fetch, sign) = match doc_params(request.uri().query().unwrap_or("")) {
        Ok(params) => params,
        Err(e) => return with_vary(e.into_response()),
    };
    let inbound = inbound_from(&request);
    with_vary(serve_exchange(&state, inbound, &fetch, &sign).await)
}

/// Handler for `GET /priv/doc/{sign URL}`. The sign URL comes from the
/// path; `sign` form parameters are ignored and at most one `fetch` value
/// is tolerated (and likewise ignored).
async fn handle_doc_path(
    State(state): State<Arc<AppState>>,
    Path(sign): Path<String>,
    request: Request,
) -> Response {
    let query = request.uri().query().unwrap_or("");
    let fetch_values = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == "fetch")
        .count();
    if fetch_values > 1 {
        return with_vary(
            HttpError::BadRequest("more than 1 fetch param".to_string()).into_response(),
        );
    }
    let inbound = inbound_from(&request);
    with_vary(serve_exchange(&state, inbound, "", &sign).await)
}

/// Extract the `fetch` (optional, at most once) and `sign` (required,
/// exactly once) form parameters.
fn doc_params(query: &str) -> Result<(String, String), HttpError> {
    let mut fetch = Vec::new();
    let mut sign = Vec::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "fetch" => fetch.push(value.into_owned()),
            "sign" => sign.push(value.into_owned()),
            _ => {}
        }
    }
    if fetch.len() > 1 {
        return Err(HttpError::BadRequest("more than 1 fetch param".to_string()));
    }
    if sign.len() != 1 {
        return Err(HttpError::BadRequest("not exactly 1 sign param".to_string()));
    }
    Ok((fetch.pop().unwrap_or_default(), sign.pop().unwrap()))
}

fn inbound_from(request: &Request) -> InboundRequest {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default();
    InboundRequest {
        headers: request.headers().clone(),
        host,
        version: request.version(),
    }
}

async fn serve_exchange(
    state: &AppState,
    inbound: InboundRequest,
    fetch: &str,
    sign: &str,
) -> Response {
    let (fetch_url, sign_url, error_on_stateful_headers) =
        match state.matcher.parse_urls(fetch, sign) {
            Ok(parsed) => parsed,
            Err(e) => return e.into_response(),
        };

    let span = gateway_tracing::gateway_request_span!(fetch_url, sign_url);
    async {
        let start = Instant::now();
        let fetched = match state.fetcher.fetch(&fetch_url, &inbound).await {
            Ok(fetched) => fetched,
            Err(e) => return e.into_response(),
        };
        let response =
            policy::package_or_proxy(state, &inbound, fetched, sign_url, error_on_stateful_headers)
                .await;
        tracing::Span::current().record("status", response.status().as_u16());
        tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);
        response
    }
    .instrument(span)
    .await
}

/// Caches negotiate on these; every outer response varies on them.
fn with_vary(mut response: Response) -> Response {
    response.headers_mut().append(
        header::VARY,
        HeaderValue::from_static("Accept, AMP-Cache-Transform"),
    );
    response
}

/// Health check endpoint.
async fn handle_healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Prometheus scrape endpoint.
async fn handle_metrics() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::metrics_output(),
    )
        .into_response()
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::AppState;
    use crate::certs::{CertProvider, CertSet};
    use crate::fetch::UpstreamFetcher;
    use crate::policy::AlwaysHealthy;
    use crate::rtv::StaticRtv;
    use crate::transform::{IdentityTransformer, Transformer};
    use crate::url_sets::UrlSetMatcher;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub const TEST_NOW_UNIX: u64 = 1_700_000_000;

    fn test_clock() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(TEST_NOW_UNIX)
    }

    struct FixedCerts(Arc<CertSet>);

    impl CertProvider for FixedCerts {
        fn latest(&self) -> Arc<CertSet> {
            Arc::clone(&self.0)
        }
    }

    pub fn test_state(require_headers: bool) -> AppState {
        test_state_with_transformer(IdentityTransformer, require_headers)
    }

    pub fn test_state_with_transformer(
        transformer: impl Transformer + 'static,
        require_headers: bool,
    ) -> AppState {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .unwrap();

        AppState {
            matcher: UrlSetMatcher::new(&[]).unwrap(),
            fetcher: UpstreamFetcher::new(Duration::from_secs(60), Vec::new()).unwrap(),
            transformer: Arc::new(transformer),
            rtv_cache: Arc::new(StaticRtv {
                rtv: "012345678901234".to_string(),
                css: String::new(),
            }),
            cert_provider: Arc::new(FixedCerts(Arc::new(
                CertSet::new(vec![b"test certificate der".to_vec()]).unwrap(),
            ))),
            signing_key: Arc::new(key),
            health: Arc::new(AlwaysHealthy),
            override_base_url: None,
            require_headers,
            clock: test_clock,
        }
    }
}
