//! Tracing bootstrap for the gateway: fmt logging to stderr, optional OTLP
//! span export, and span helper macros for the request pipeline.

mod config;
mod otlp;
mod spans;

pub use config::{OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
