//! The HTML transformer collaborator.
//!
//! Real AMP transformation lives outside this service; the gateway only
//! depends on this interface. [`IdentityTransformer`] passes documents
//! through untouched so the binary runs end-to-end without a transformer
//! deployment.

use std::error::Error as StdError;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Transform versions this gateway can negotiate.
pub const SUPPORTED_VERSIONS: &[i64] = &[1];

/// One transform invocation.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub html: String,
    pub document_url: String,
    /// AMP runtime version the transform should pin resources to.
    pub rtv: String,
    /// Inlined runtime CSS matching `rtv`.
    pub css: String,
    pub version: i64,
}

/// Metadata the transformer derives from the document.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub preloads: Vec<Preload>,
    /// Upper bound on how long the signed document may be cached.
    pub max_age_secs: u64,
}

/// A resource the transformed document wants preloaded.
#[derive(Debug, Clone)]
pub struct Preload {
    pub url: String,
    /// The `as` destination; required for a preload to be emitted.
    pub as_attr: String,
    pub attributes: Vec<(String, String)>,
}

pub trait Transformer: Send + Sync {
    /// Pick the transform version to use given an optional requested set;
    /// `None` means "the default".
    fn select_version(&self, requested: Option<&[i64]>) -> Result<i64, BoxError>;

    fn process(&self, request: TransformRequest) -> Result<(Vec<u8>, Metadata), BoxError>;
}

/// Passes HTML through unchanged. Reports no preloads and the maximum
/// cacheable lifetime, leaving the validity window to the 7-day clamp.
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
    fn select_version(&self, requested: Option<&[i64]>) -> Result<i64, BoxError> {
        let candidates = requested.unwrap_or(SUPPORTED_VERSIONS);
        candidates
            .iter()
            .filter(|version| SUPPORTED_VERSIONS.contains(version))
            .max()
            .copied()
            .ok_or_else(|| "no supported transform version".into())
    }

    fn process(&self, request: TransformRequest) -> Result<(Vec<u8>, Metadata), BoxError> {
        Ok((
            request.html.into_bytes(),
            Metadata {
                preloads: Vec::new(),
                max_age_secs: 7 * 24 * 3600,
            },
        ))
    }
}
