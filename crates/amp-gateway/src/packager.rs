//! The packaging pipeline: transform, header mutation, MICE, signature,
//! serialization.
//!
//! Split into two stages so the point of no return is visible in the types:
//! [`prepare`] runs everything that may still fall back to an unsigned
//! proxy (transform, Link formatting, validity window), [`commit`] performs
//! the destructive header mutations and signs. A `commit` failure never
//! proxies the mutated response and never double-writes.

use crate::certs::{CERT_URL_PREFIX, VALIDITY_MAP_PATH};
use crate::csp;
use crate::error::{HttpError, PackagingError};
use crate::fetch::ConsumedFetchResponse;
use crate::headers::STATEFUL_RESPONSE_HEADERS;
use crate::metrics;
use crate::policy::SxgParams;
use crate::preload::format_link_header;
use crate::proxy;
use crate::server::AppState;
use crate::transform::TransformRequest;
use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// MICE record size. The cache-side maximum is cheapest for network and
/// CPU; the memory difference is negligible.
pub const MI_RECORD_SIZE: usize = 16 << 10;

/// Longest allowed signature validity window (7 days).
const MAX_VALIDITY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Backdate signatures against client clock skew.
const DATE_BACKDATE: Duration = Duration::from_secs(24 * 3600);

/// Transform, sign and write the consumed response; fall back to an
/// unsigned proxy of the untouched original on any pre-commit failure.
pub fn serve_signed_exchange(
    state: &AppState,
    consumed: ConsumedFetchResponse,
    params: &SxgParams,
) -> Response {
    let prepared = match prepare(state, &consumed, params) {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::info!(error = %e, "Not packaging due to packaging error");
            return proxy::proxy_consumed(consumed);
        }
    };
    match commit(state, consumed, params, prepared) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Packaging failed after header mutation");
            HttpError::Internal("packaging failed".to_string()).into_response()
        }
    }
}

/// Everything `commit` needs, computed without touching the response.
struct Prepared {
    transformed: Vec<u8>,
    link_header: Option<String>,
    date: SystemTime,
    expires: SystemTime,
}

fn prepare(
    state: &AppState,
    consumed: &ConsumedFetchResponse,
    params: &SxgParams,
) -> Result<Prepared, PackagingError> {
    let (transformed, metadata) = state
        .transformer
        .process(TransformRequest {
            html: String::from_utf8_lossy(&consumed.body).into_owned(),
            document_url: params.sign_url.to_string(),
            rtv: state.rtv_cache.rtv(),
            css: state.rtv_cache.css(),
            version: params.transform_version,
        })
        .map_err(|e| PackagingError::Transform(e.to_string()))?;

    let link_value = format_link_header(&metadata.preloads)?;
    let link_header = (!link_value.is_empty()).then_some(link_value);

    // Validity window, computed before any mutation so a stale max-age
    // still proxies the original response untouched.
    let now = (state.clock)();
    let date = now - DATE_BACKDATE;
    let duration = MAX_VALIDITY.min(Duration::from_secs(metadata.max_age_secs));
    let expires = date + duration;
    if expires <= now {
        return Err(PackagingError::StaleMaxAge(metadata.max_age_secs));
    }

    Ok(Prepared {
        transformed,
        link_header,
        date,
        expires,
    })
}

/// The point of no return: mutates the inner headers, encodes, signs and
/// serializes.
fn commit(
    state: &AppState,
    mut consumed: ConsumedFetchResponse,
    params: &SxgParams,
    prepared: Prepared,
) -> Result<Response, PackagingError> {
    let original_body_len = consumed.body.len();

    for name in STATEFUL_RESPONSE_HEADERS {
        consumed.headers.remove(*name);
    }

    // A Link header survives only if formatting produced one; anything else
    // would leak privacy-violating rel=preload entries.
    match &prepared.link_header {
        Some(value) => {
            consumed
                .headers
                .insert(header::LINK, HeaderValue::from_str(value)?);
        }
        None => {
            consumed.headers.remove(header::LINK);
        }
    }

    consumed.headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(prepared.transformed.len()),
    );
    consumed.headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );

    let fetched_csp = consumed
        .headers
        .get("content-security-policy")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let rewritten_csp = csp::rewrite(fetched_csp);
    consumed.headers.insert(
        "content-security-policy",
        HeaderValue::from_str(&rewritten_csp)?,
    );

    let mut exchange = sxg::Exchange::new(
        params.sign_url.clone(),
        consumed.status,
        consumed.headers,
        prepared.transformed,
    );
    exchange.mi_encode_payload(MI_RECORD_SIZE)?;

    let cert = state.cert_provider.latest();
    let base = state.override_base_url.as_ref().unwrap_or(&params.sign_url);
    let cert_url = base
        .join(&format!(
            "{}{}",
            CERT_URL_PREFIX,
            path_escape(&cert.fingerprint_name)
        ))
        .map_err(PackagingError::CertUrl)?;
    let validity_url = params
        .sign_url
        .join(VALIDITY_MAP_PATH)
        .map_err(PackagingError::ValidityUrl)?;

    exchange.add_signature_header(&sxg::ExchangeSigner {
        date: prepared.date,
        expires: prepared.expires,
        cert_url,
        cert_sha256: cert.sha256,
        validity_url,
        key: Arc::clone(&state.signing_key),
    })?;
    let body = exchange.serialize()?;

    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(sxg::CONTENT_TYPE));
    if let Some(echo) = &params.amp_cache_transform_header {
        headers.insert("amp-cache-transform", HeaderValue::from_str(echo)?);
    }
    // Zero freshness lifetime on the outer resource so naive caching
    // intermediaries cannot inhibit updates on the target cache; cache
    // update strategies key off the inner and outer lifetimes together.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-transform, max-age=0"),
    );
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );

    metrics::SIGNED_DOCUMENT_SIZE.observe(original_body_len as f64);
    metrics::DOCUMENTS_SIGNED_VS_UNSIGNED
        .with_label_values(&[metrics::STATUS_SIGNED])
        .inc();
    Ok(response)
}

/// Percent-escape a single path segment. Certificate fingerprint names are
/// unpadded base64url and normally pass through unchanged.
fn path_escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
