//! Unsigned passthrough of the upstream response.
//!
//! Three variants, differing only in where the body bytes come from; all
//! copy status and headers verbatim and count as `proxied_unsigned`.

use crate::fetch::{ConsumedFetchResponse, FetchedResponse};
use crate::metrics;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{stream, StreamExt};

fn proxy_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    metrics::DOCUMENTS_SIGNED_VS_UNSIGNED
        .with_label_values(&[metrics::STATUS_PROXIED_UNSIGNED])
        .inc();
    response
}

/// Stream the untouched upstream body to the client.
pub fn proxy_unconsumed(fetched: FetchedResponse) -> Response {
    let (status, headers, body_stream) = fetched.into_parts();
    proxy_response(status, headers, Body::from_stream(body_stream))
}

/// Write the already-read prefix, then stream the rest.
pub fn proxy_partially_consumed(prefix: Bytes, fetched: FetchedResponse) -> Response {
    let (status, headers, body_stream) = fetched.into_parts();
    let chained = stream::once(async move { Ok::<_, reqwest::Error>(prefix) }).chain(body_stream);
    proxy_response(status, headers, Body::from_stream(chained))
}

/// Write the fully buffered body.
pub fn proxy_consumed(consumed: ConsumedFetchResponse) -> Response {
    proxy_response(
        consumed.status,
        consumed.headers,
        Body::from(consumed.body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn upstream_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("cache-control", HeaderValue::from_static("max-age=60"));
        headers.insert("set-cookie", HeaderValue::from_static("x=1"));
        headers
    }

    #[tokio::test]
    async fn consumed_body_and_headers_pass_through_verbatim() {
        let response = proxy_consumed(ConsumedFetchResponse {
            body: Bytes::from_static(b"<html>doc</html>"),
            status: StatusCode::OK,
            headers: upstream_headers(),
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("cache-control").unwrap(), "max-age=60");
        assert_eq!(response.headers().get("set-cookie").unwrap(), "x=1");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<html>doc</html>");
    }

    #[tokio::test]
    async fn partially_consumed_prefix_precedes_stream() {
        let fetched = FetchedResponse::for_tests(
            StatusCode::OK,
            upstream_headers(),
            b" and the rest",
        );
        let response = proxy_partially_consumed(Bytes::from_static(b"prefix"), fetched);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"prefix and the rest");
    }

    #[tokio::test]
    async fn non_ok_status_passes_through() {
        let mut headers = HeaderMap::new();
        headers.insert("location", HeaderValue::from_static("https://elsewhere.example/"));
        let fetched = FetchedResponse::for_tests(StatusCode::FOUND, headers, b"");
        let response = proxy_unconsumed(fetched);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "https://elsewhere.example/"
        );
    }
}
