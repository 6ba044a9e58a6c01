//! The upstream document fetch, with faithful request shaping.

use crate::error::HttpError;
use crate::headers::{get_joined, quoted_string, remove_hop_by_hop, CONDITIONAL_REQUEST_HEADERS};
use crate::metrics;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use bytes::Bytes;
use futures_core::Stream;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use url::Url;

/// The user agent to send when issuing fetches. Should look like a mobile
/// device.
pub const USER_AGENT_VALUE: &str = "Mozilla/5.0 (Linux; Android 6.0.1; Nexus 5X Build/MMB29P) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/41.0.2272.96 Mobile \
    Safari/537.36 (compatible; amppackager/0.0.0; +https://github.com/ampproject/amppackager)";

/// Roughly the token grammar of RFC 7230 §3.2.6, extended to permit
/// embedded and edge slashes, applied to the inbound request-line protocol
/// before echoing it into `Via`.
static PROTOCOL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[!#$%&'*+\\-.^_`|~0-9a-zA-Z/]+$").unwrap());

/// The parts of the inbound request that shape the upstream fetch.
pub struct InboundRequest {
    pub headers: HeaderMap,
    pub host: String,
    pub version: Version,
}

/// The upstream response with hop-by-hop headers already stripped and the
/// body not yet read.
pub struct FetchedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: reqwest::Response,
}

/// The upstream response with the body fully in memory. Only this form is
/// eligible for signing.
pub struct ConsumedFetchResponse {
    pub body: Bytes,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Result of reading a fetched body against a size cap.
pub enum ConsumeOutcome {
    Complete(ConsumedFetchResponse),
    /// The cap was reached; `prefix` holds the bytes already read and
    /// `rest` still streams the remainder.
    Oversized {
        prefix: Bytes,
        rest: FetchedResponse,
    },
}

impl FetchedResponse {
    /// Read the body into memory, stopping at `limit` bytes. A body of
    /// exactly `limit` bytes is treated as oversized; the prefix plus the
    /// remaining stream always reproduce the full body.
    pub async fn consume(mut self, limit: usize) -> Result<ConsumeOutcome, HttpError> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            if buf.len() >= limit {
                return Ok(ConsumeOutcome::Oversized {
                    prefix: buf.into(),
                    rest: self,
                });
            }
            match self.body.chunk().await {
                Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                Ok(None) => {
                    return Ok(ConsumeOutcome::Complete(ConsumedFetchResponse {
                        body: buf.into(),
                        status: self.status,
                        headers: self.headers,
                    }))
                }
                Err(e) => return Err(HttpError::BadGateway(format!("reading body: {e}"))),
            }
        }
    }

    pub fn into_parts(
        self,
    ) -> (
        StatusCode,
        HeaderMap,
        impl Stream<Item = Result<Bytes, reqwest::Error>>,
    ) {
        (self.status, self.headers, self.body.bytes_stream())
    }

    #[cfg(test)]
    pub fn for_tests(status: StatusCode, headers: HeaderMap, body: &'static [u8]) -> Self {
        let mut response =
            axum::http::Response::new(reqwest::Body::from(Bytes::from_static(body)));
        *response.status_mut() = status;
        Self {
            status,
            headers,
            body: reqwest::Response::from(response),
        }
    }
}

/// Issues the single upstream `GET` per gateway request.
pub struct UpstreamFetcher {
    client: reqwest::Client,
    forward_request_headers: Vec<String>,
}

impl UpstreamFetcher {
    pub fn new(timeout: Duration, forward_request_headers: Vec<String>) -> anyhow::Result<Self> {
        // Redirects are the origin's intent; they are proxied, not followed.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            forward_request_headers,
        })
    }

    /// Fetch `fetch_url` on behalf of the inbound request.
    ///
    /// Observes `total_gateway_requests_by_code` and the latency histogram
    /// on success; transport failures surface as `BadGateway` and are left
    /// to the outer request accounting.
    pub async fn fetch(
        &self,
        fetch_url: &Url,
        inbound: &InboundRequest,
    ) -> Result<FetchedResponse, HttpError> {
        tracing::info!(url = %fetch_url, "Fetching URL");
        let outbound = self.shape_headers(inbound);

        let start = Instant::now();
        let response = self
            .client
            .get(fetch_url.as_str())
            .headers(outbound)
            .send()
            .await
            .map_err(|e| HttpError::BadGateway(format!("fetching {fetch_url}: {e}")))?;

        let code = response.status().as_u16().to_string();
        metrics::GATEWAY_REQUESTS_TOTAL
            .with_label_values(&[code.as_str()])
            .inc();
        metrics::GATEWAY_REQUEST_LATENCY
            .with_label_values(&[code.as_str()])
            .observe(start.elapsed().as_secs_f64());

        let mut headers = response.headers().clone();
        remove_hop_by_hop(&mut headers);
        Ok(FetchedResponse {
            status: response.status(),
            headers,
            body: response,
        })
    }

    fn shape_headers(&self, inbound: &InboundRequest) -> HeaderMap {
        let mut outbound = HeaderMap::new();
        outbound.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        // Copy the configured allowlist; Host overrides the request target's
        // host rather than becoming a plain header.
        for name in &self.forward_request_headers {
            if name.eq_ignore_ascii_case("host") {
                if let Ok(value) = HeaderValue::from_str(&inbound.host) {
                    outbound.insert(header::HOST, value);
                }
            } else if let Some(joined) = get_joined(&inbound.headers, name) {
                if let (Ok(header_name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(&joined),
                ) {
                    outbound.insert(header_name, value);
                }
            }
        }

        // The HTTP stack does not validate the protocol it parsed from the
        // request line, so validate before echoing it into Via.
        let proto = format!("{:?}", inbound.version);
        if PROTOCOL_TOKEN.is_match(&proto) {
            let mut via = format!("{} amppkg", proto.trim_start_matches("HTTP/"));
            if let Some(upstream_via) = get_joined(&outbound, "via") {
                via = format!("{upstream_via}, {via}");
            }
            if let Ok(value) = HeaderValue::from_str(&via) {
                outbound.insert(header::VIA, value);
            }
        }

        if let Some(quoted_host) = quoted_string(&inbound.host) {
            if let Ok(value) = HeaderValue::from_str(&format!("host={quoted_host}")) {
                outbound.insert(header::FORWARDED, value);
            }
            let forwarded_host = match inbound
                .headers
                .get("x-forwarded-host")
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
            {
                Some(prior) => format!("{prior},{}", inbound.host),
                None => inbound.host.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_host) {
                outbound.insert("x-forwarded-host", value);
            }
        }

        for name in CONDITIONAL_REQUEST_HEADERS {
            if let Some(joined) = get_joined(&inbound.headers, name) {
                if let Ok(value) = HeaderValue::from_str(&joined) {
                    outbound.insert(*name, value);
                }
            }
        }

        outbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(headers: HeaderMap) -> InboundRequest {
        InboundRequest {
            headers,
            host: "amp.example.com".to_string(),
            version: Version::HTTP_11,
        }
    }

    fn fetcher(forward: Vec<String>) -> UpstreamFetcher {
        UpstreamFetcher::new(Duration::from_secs(60), forward).unwrap()
    }

    #[test]
    fn fixed_user_agent_always_set() {
        let outbound = fetcher(Vec::new()).shape_headers(&inbound(HeaderMap::new()));
        assert_eq!(
            outbound.get(header::USER_AGENT).unwrap(),
            USER_AGENT_VALUE
        );
    }

    #[test]
    fn non_allowlisted_headers_are_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        let outbound = fetcher(Vec::new()).shape_headers(&inbound(headers));
        assert!(outbound.get("connection").is_none());
        assert!(outbound.get("te").is_none());
        assert!(outbound.get("cookie").is_none());
    }

    #[test]
    fn allowlisted_headers_are_joined_and_forwarded() {
        let mut headers = HeaderMap::new();
        headers.append("x-custom", HeaderValue::from_static("a"));
        headers.append("x-custom", HeaderValue::from_static("b"));
        let outbound = fetcher(vec!["X-Custom".to_string()]).shape_headers(&inbound(headers));
        assert_eq!(outbound.get("x-custom").unwrap(), "a, b");
    }

    #[test]
    fn host_in_allowlist_overrides_outbound_host() {
        let outbound = fetcher(vec!["Host".to_string()]).shape_headers(&inbound(HeaderMap::new()));
        assert_eq!(outbound.get(header::HOST).unwrap(), "amp.example.com");
    }

    #[test]
    fn via_reflects_inbound_protocol() {
        let outbound = fetcher(Vec::new()).shape_headers(&inbound(HeaderMap::new()));
        assert_eq!(outbound.get(header::VIA).unwrap(), "1.1 amppkg");
    }

    #[test]
    fn forwarded_and_x_forwarded_host_are_set() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-host", HeaderValue::from_static("edge.example"));
        let outbound = fetcher(Vec::new()).shape_headers(&inbound(headers));
        assert_eq!(
            outbound.get(header::FORWARDED).unwrap(),
            "host=\"amp.example.com\""
        );
        assert_eq!(
            outbound.get("x-forwarded-host").unwrap(),
            "edge.example,amp.example.com"
        );
    }

    #[test]
    fn conditional_headers_forwarded_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", HeaderValue::from_static("\"abc\""));
        headers.insert("if-modified-since", HeaderValue::from_static("yesterday"));
        let outbound = fetcher(Vec::new()).shape_headers(&inbound(headers));
        assert_eq!(outbound.get("if-none-match").unwrap(), "\"abc\"");
        assert_eq!(outbound.get("if-modified-since").unwrap(), "yesterday");
        assert!(outbound.get("if-match").is_none());
    }

    #[tokio::test]
    async fn consume_completes_under_cap() {
        let fetched =
            FetchedResponse::for_tests(StatusCode::OK, HeaderMap::new(), b"hello world");
        match fetched.consume(1024).await.unwrap() {
            ConsumeOutcome::Complete(consumed) => {
                assert_eq!(&consumed.body[..], b"hello world");
                assert_eq!(consumed.status, StatusCode::OK);
            }
            ConsumeOutcome::Oversized { .. } => panic!("body under cap was reported oversized"),
        }
    }

    #[tokio::test]
    async fn consume_reports_exact_cap_as_oversized() {
        let fetched = FetchedResponse::for_tests(StatusCode::OK, HeaderMap::new(), b"0123456789");
        match fetched.consume(10).await.unwrap() {
            ConsumeOutcome::Oversized { prefix, .. } => {
                assert_eq!(&prefix[..], b"0123456789");
            }
            ConsumeOutcome::Complete(_) => panic!("body at cap was not reported oversized"),
        }
    }
}
