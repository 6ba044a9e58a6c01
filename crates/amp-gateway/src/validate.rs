//! Validation of the fetched document before signing.

use crate::headers::get_joined;
use axum::http::HeaderMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchValidationError {
    #[error("fetched response has no Content-Type")]
    MissingContentType,

    #[error("unparseable Content-Type {0:?}")]
    UnparseableContentType(String),

    #[error("Content-Type {0:?} is not text/html")]
    NotHtml(String),
}

/// Enforce the minimal invariants on a fetched 200 response: it must be an
/// HTML document. Deeper AMP validity is the transformer's concern.
pub fn validate_fetch(headers: &HeaderMap) -> Result<(), FetchValidationError> {
    let content_type =
        get_joined(headers, "content-type").ok_or(FetchValidationError::MissingContentType)?;
    let mime: mime::Mime = content_type
        .parse()
        .map_err(|_| FetchValidationError::UnparseableContentType(content_type.clone()))?;
    if mime.essence_str() != "text/html" {
        return Err(FetchValidationError::NotHtml(content_type));
    }
    Ok(())
}
