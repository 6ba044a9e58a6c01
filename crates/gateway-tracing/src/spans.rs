//! Span builder helpers for gateway instrumentation.

/// Create a tracing span for the top-level gateway request.
///
/// Usage: `let span = gateway_request_span!(fetch_url, sign_url);`
///
/// Fields recorded later by the handler:
/// - `status`: HTTP status written downstream
/// - `latency_ms`: milliseconds from admission to last byte
#[macro_export]
macro_rules! gateway_request_span {
    ($fetch_url:expr, $sign_url:expr) => {
        tracing::info_span!(
            "gateway_request",
            fetch_url = %$fetch_url,
            sign_url = %$sign_url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for the upstream document fetch.
#[macro_export]
macro_rules! upstream_fetch_span {
    ($url:expr) => {
        tracing::info_span!(
            "upstream_fetch",
            url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
