//! Prometheus emission points. Names and labels are the contract; the
//! backend is whatever scrapes `/metrics`.

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::LazyLock;

pub const STATUS_SIGNED: &str = "signed";
pub const STATUS_PROXIED_UNSIGNED: &str = "proxied_unsigned";

/// Underlying requests to the document server, by upstream status code.
pub static GATEWAY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "total_gateway_requests_by_code",
        "Total number of underlying requests to the AMP document server, by HTTP response status code",
        &["code"]
    )
    .unwrap()
});

pub static GATEWAY_REQUEST_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "gateway_request_latencies_in_seconds",
        "Latencies (in seconds) of gateway requests to the AMP document server, by HTTP response status code",
        &["code"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Size of documents the gateway decided to sign (pre-transform bytes).
pub static SIGNED_DOCUMENT_SIZE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "signed_amp_documents_size_in_bytes",
        "Size (in bytes) of fetched document bodies that were signed",
        prometheus::exponential_buckets(1024.0, 2.0, 13).unwrap()
    )
    .unwrap()
});

pub static DOCUMENTS_SIGNED_VS_UNSIGNED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "documents_signed_vs_unsigned",
        "Successful underlying document requests, by whether the gateway signed or proxied unsigned",
        &["status"]
    )
    .unwrap()
});

/// Render all registered metrics in the Prometheus text format.
pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
