#![allow(missing_docs)]

use http::header::InvalidHeaderValue;
use ring::error::Unspecified;
use std::time::SystemTimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record size must be non-zero")]
    ZeroRecordSize,

    #[error("fallback URL too long ({0} bytes, limit 65535)")]
    FallbackUrlTooLong(usize),

    #[error("signature header too large ({0} bytes, limit 16384)")]
    SignatureTooLarge(usize),

    #[error("header block too large ({0} bytes, limit 524288)")]
    HeadersTooLarge(usize),

    #[error("exchange has no signature header")]
    Unsigned,

    #[error(transparent)]
    InvalidHeaderValue(#[from] InvalidHeaderValue),

    #[error(transparent)]
    RingUnspecified(#[from] Unspecified),

    #[error(transparent)]
    SystemTime(#[from] SystemTimeError),
}
