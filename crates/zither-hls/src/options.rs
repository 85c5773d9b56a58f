use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::model::StreamType;

/// Which manifest a sink invocation refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestKind {
    Master,
    Child(StreamType),
}

/// Best-effort observer for downloaded manifest bodies (e.g. a debug dump
/// to disk). Invoked behind the tree lock; must not panic.
pub type ManifestSink = Arc<dyn Fn(ManifestKind, &Url, &[u8]) + Send + Sync>;

#[derive(Clone)]
pub struct HlsOptions {
    /// Buffer level every representation should be able to sustain.
    pub assured_buffer_duration: Duration,
    /// Upper bound for per-representation buffering.
    pub max_buffer_duration: Duration,
    /// Overrides the update interval derived from `EXT-X-TARGETDURATION`.
    pub live_refresh_interval: Option<Duration>,
    /// Optional manifest observer.
    pub manifest_sink: Option<ManifestSink>,
}

impl Debug for HlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlsOptions")
            .field("assured_buffer_duration", &self.assured_buffer_duration)
            .field("max_buffer_duration", &self.max_buffer_duration)
            .field("live_refresh_interval", &self.live_refresh_interval)
            .field("manifest_sink", &self.manifest_sink.is_some())
            .finish()
    }
}

impl Default for HlsOptions {
    fn default() -> Self {
        Self {
            assured_buffer_duration: Duration::from_secs(30),
            max_buffer_duration: Duration::from_secs(60),
            live_refresh_interval: None,
            manifest_sink: None,
        }
    }
}
