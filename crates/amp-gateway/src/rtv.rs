//! The runtime-version cache collaborator.

/// Source of the AMP runtime version and its inlined CSS, fed to the
/// transformer. Implementations must be safe under concurrent read.
pub trait RtvCache: Send + Sync {
    fn rtv(&self) -> String;
    fn css(&self) -> String;
}

/// Fixed values, for deployments without a runtime-version poller.
pub struct StaticRtv {
    pub rtv: String,
    pub css: String,
}

impl RtvCache for StaticRtv {
    fn rtv(&self) -> String {
        self.rtv.clone()
    }

    fn css(&self) -> String {
        self.css.clone()
    }
}
