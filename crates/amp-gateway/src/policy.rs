//! The sign-or-proxy decision tree, run after a successful upstream fetch.
//!
//! Ordering is fixed: health, content negotiation, status dispatch, fetch
//! validation, stateful headers, variants, size admission. Every decision
//! observable as "unsigned passthrough" is made before any destructive
//! header mutation inside the packager.

use crate::fetch::{ConsumeOutcome, FetchedResponse, InboundRequest};
use crate::headers::{get_joined, is_stateful_response_header, STATUS_NOT_MODIFIED_HEADERS};
use crate::server::AppState;
use crate::{negotiation, packager, proxy, validate};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use url::Url;

/// The signable payload length limit. Bodies that hit it are proxied
/// unsigned in full; this bounds per-request memory, which matters because
/// MICE needs the whole payload resident.
pub const MAX_SIGNABLE_BODY: usize = 4 << 20;

/// Inputs to the packaging pipeline, immutable after negotiation.
pub struct SxgParams {
    pub sign_url: Url,
    /// Value to echo on the outer `AMP-Cache-Transform` response header.
    pub amp_cache_transform_header: Option<String>,
    pub transform_version: i64,
}

/// The health gate consulted before packaging. `Err(reason)` downgrades the
/// request to an unsigned proxy without failing it.
pub trait PackagingHealth: Send + Sync {
    fn should_package(&self) -> Result<(), String>;
}

pub struct AlwaysHealthy;

impl PackagingHealth for AlwaysHealthy {
    fn should_package(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Run the decision tree and write either a signed exchange or an unsigned
/// passthrough of the upstream response.
pub async fn package_or_proxy(
    state: &AppState,
    inbound: &InboundRequest,
    fetched: FetchedResponse,
    sign_url: Url,
    error_on_stateful_headers: bool,
) -> Response {
    if let Err(reason) = state.health.should_package() {
        tracing::info!(reason = %reason, "Not packaging because the server is unhealthy");
        return proxy::proxy_unconsumed(fetched);
    }

    let (amp_cache_transform_header, transform_version) = if state.require_headers {
        let header_value = get_joined(&inbound.headers, "amp-cache-transform").unwrap_or_default();
        match negotiation::should_send_sxg(&header_value) {
            Some((echo, version)) => (Some(echo), version),
            None => {
                tracing::info!(
                    header = %header_value,
                    "Not packaging because AMP-Cache-Transform request header is invalid"
                );
                return proxy::proxy_unconsumed(fetched);
            }
        }
    } else {
        match state.transformer.select_version(None) {
            Ok(version) => (None, version),
            Err(e) => {
                tracing::warn!(error = %e, "Not packaging because of internal version selection error");
                return proxy::proxy_unconsumed(fetched);
            }
        }
    };

    if state.require_headers {
        let accept = get_joined(&inbound.headers, "accept").unwrap_or_default();
        if !negotiation::can_satisfy(&accept) {
            tracing::info!(
                accept = %accept,
                version = sxg::VERSION,
                "Not packaging because Accept request header lacks application/signed-exchange"
            );
            return proxy::proxy_unconsumed(fetched);
        }
    }

    match fetched.status.as_u16() {
        200 => {
            package_ok_response(
                state,
                fetched,
                SxgParams {
                    sign_url,
                    amp_cache_transform_header,
                    transform_version,
                },
                error_on_stateful_headers,
            )
            .await
        }

        304 => not_modified_response(&fetched.headers),

        status => {
            tracing::info!(status, "Not packaging because status code is unrecognized");
            proxy::proxy_unconsumed(fetched)
        }
    }
}

async fn package_ok_response(
    state: &AppState,
    fetched: FetchedResponse,
    params: SxgParams,
    error_on_stateful_headers: bool,
) -> Response {
    if let Err(e) = validate::validate_fetch(&fetched.headers) {
        tracing::info!(error = %e, "Not packaging because of invalid fetch");
        return proxy::proxy_unconsumed(fetched);
    }

    if error_on_stateful_headers {
        if let Some(name) = stateful_header_present(&fetched.headers) {
            tracing::info!(
                header = name,
                "Not packaging because fetch response contains a stateful header"
            );
            return proxy::proxy_unconsumed(fetched);
        }
    }

    // Variants are disallowed by the cache. Deleting the headers would
    // misrepresent the origin's intent, so proxy instead.
    if has_variants(&fetched.headers) {
        tracing::info!("Not packaging because response contains a Variants header");
        return proxy::proxy_unconsumed(fetched);
    }

    match fetched.consume(MAX_SIGNABLE_BODY).await {
        Ok(ConsumeOutcome::Complete(consumed)) => {
            packager::serve_signed_exchange(state, consumed, &params)
        }
        Ok(ConsumeOutcome::Oversized { prefix, rest }) => {
            tracing::info!(
                limit = MAX_SIGNABLE_BODY,
                "Not packaging because the document size hit the limit"
            );
            proxy::proxy_partially_consumed(prefix, rest)
        }
        Err(e) => e.into_response(),
    }
}

fn stateful_header_present(headers: &HeaderMap) -> Option<&str> {
    headers
        .keys()
        .map(axum::http::HeaderName::as_str)
        .find(|name| is_stateful_response_header(name) && get_joined(headers, name).is_some())
}

fn has_variants(headers: &HeaderMap) -> bool {
    ["variants", "variant-key", "variants-04", "variant-key-04"]
        .iter()
        .any(|name| headers.contains_key(*name))
}

/// A 304 upstream yields a 304 downstream carrying only the header subset a
/// 304 is allowed to repeat (RFC 7232 §4.1). No body.
fn not_modified_response(headers: &HeaderMap) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    for name in STATUS_NOT_MODIFIED_HEADERS {
        if let Some(joined) = get_joined(headers, name) {
            if let Ok(value) = HeaderValue::from_str(&joined) {
                response.headers_mut().insert(*name, value);
            }
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::test_state;
    use axum::http::Version;

    fn inbound_accepting_sxg() -> InboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert(
            "accept",
            HeaderValue::from_static("application/signed-exchange;v=b3"),
        );
        headers.insert(
            "amp-cache-transform",
            HeaderValue::from_static("google;v=\"1..8\""),
        );
        InboundRequest {
            headers,
            host: "amp.example.com".to_string(),
            version: Version::HTTP_11,
        }
    }

    fn sign_url() -> Url {
        Url::parse("https://amp.example.com/doc.html").unwrap()
    }

    fn html_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        headers
    }

    #[tokio::test]
    async fn redirect_is_proxied_unsigned() {
        let state = test_state(true);
        let mut headers = HeaderMap::new();
        headers.insert("location", HeaderValue::from_static("https://elsewhere.example/"));
        let fetched = FetchedResponse::for_tests(StatusCode::FOUND, headers, b"");

        let response =
            package_or_proxy(&state, &inbound_accepting_sxg(), fetched, sign_url(), false).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "https://elsewhere.example/"
        );
    }

    #[tokio::test]
    async fn not_modified_carries_exact_header_subset() {
        let state = test_state(true);
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"abc\""));
        headers.insert("date", HeaderValue::from_static("Tue, 01 Jan 2030 00:00:00 GMT"));
        headers.insert("cache-control", HeaderValue::from_static("max-age=60"));
        headers.insert("x-extra", HeaderValue::from_static("y"));
        let fetched = FetchedResponse::for_tests(StatusCode::NOT_MODIFIED, headers, b"");

        let response =
            package_or_proxy(&state, &inbound_accepting_sxg(), fetched, sign_url(), false).await;

        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers().get("etag").unwrap(), "\"abc\"");
        assert_eq!(response.headers().get("cache-control").unwrap(), "max-age=60");
        assert!(response.headers().get("x-extra").is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn stateful_header_blocks_sign_when_configured() {
        let state = test_state(true);
        let mut headers = html_headers();
        headers.insert("set-cookie", HeaderValue::from_static("x=1"));
        let fetched = FetchedResponse::for_tests(StatusCode::OK, headers, b"<html></html>");

        let response =
            package_or_proxy(&state, &inbound_accepting_sxg(), fetched, sign_url(), true).await;

        // Proxied unchanged, cookie intact.
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("set-cookie").unwrap(), "x=1");
        assert_ne!(
            response.headers().get("content-type").unwrap(),
            sxg::CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn variants_block_sign() {
        let state = test_state(true);
        let mut headers = html_headers();
        headers.insert("variants", HeaderValue::from_static("Accept-Language;en;fr"));
        let fetched = FetchedResponse::for_tests(StatusCode::OK, headers, b"<html></html>");

        let response =
            package_or_proxy(&state, &inbound_accepting_sxg(), fetched, sign_url(), false).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("variants").is_some());
    }

    #[tokio::test]
    async fn missing_amp_cache_transform_proxies_when_headers_required() {
        let state = test_state(true);
        let fetched =
            FetchedResponse::for_tests(StatusCode::OK, html_headers(), b"<html></html>");
        let inbound = InboundRequest {
            headers: HeaderMap::new(),
            host: "amp.example.com".to_string(),
            version: Version::HTTP_11,
        };

        let response = package_or_proxy(&state, &inbound, fetched, sign_url(), false).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_ne!(
            response.headers().get("content-type").unwrap(),
            sxg::CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn non_html_content_type_is_proxied() {
        let state = test_state(true);
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let fetched = FetchedResponse::for_tests(StatusCode::OK, headers, b"{}");

        let response =
            package_or_proxy(&state, &inbound_accepting_sxg(), fetched, sign_url(), false).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{}");
    }

    #[tokio::test]
    async fn happy_path_produces_signed_exchange() {
        let state = test_state(true);
        let fetched =
            FetchedResponse::for_tests(StatusCode::OK, html_headers(), b"<html amp></html>");

        let response =
            package_or_proxy(&state, &inbound_accepting_sxg(), fetched, sign_url(), true).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            sxg::CONTENT_TYPE
        );
        assert_eq!(
            response.headers().get("amp-cache-transform").unwrap(),
            "google;v=\"1\""
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..8], b"sxg1-b3\0");
    }
}
