//! Error types for request admission and packaging.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// An admission or transport error reported directly to the client.
///
/// Policy rejects are not errors (the upstream response is proxied instead);
/// these are the cases where there is nothing sensible to proxy.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self.status() {
            status if status.is_server_error() => {
                tracing::error!(error = %self, "Request failed");
            }
            _ => {
                tracing::warn!(error = %self, "Request rejected");
            }
        }
        (self.status(), self.to_string()).into_response()
    }
}

/// A failure inside the packaging pipeline. Before the packager commits to
/// header mutation these are recovered by proxying the original response.
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("transform failed: {0}")]
    Transform(String),

    #[error("invalid preload URL {url:?}: {source}")]
    InvalidPreloadUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("missing `as` attribute for preload URL {0:?}")]
    MissingPreloadAs(String),

    #[error("computed max-age {0}s places expiry in the past")]
    StaleMaxAge(u64),

    #[error("building cert URL: {0}")]
    CertUrl(url::ParseError),

    #[error("building validity URL: {0}")]
    ValidityUrl(url::ParseError),

    #[error(transparent)]
    InvalidHeaderValue(#[from] axum::http::header::InvalidHeaderValue),

    #[error(transparent)]
    Sxg(#[from] sxg::Error),
}
