use thiserror::Error;

pub type HlsResult<T> = Result<T, HlsError>;

/// Manifest engine errors.
///
/// `open()` treats every variant as fatal; the refresh path logs and
/// leaves the previous tree intact.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("Network error: {0}")]
    Net(#[from] zither_net::NetError),

    #[error("Decryption error: {0}")]
    Drm(#[from] zither_drm::DrmError),

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("Child playlist produced no segments")]
    EmptyTimeline,

    #[error("Representation has no source URL")]
    MissingSourceUrl,

    #[error("No representation at period {period} adaptation-set {adaptation_set} representation {representation}")]
    InvalidAddress {
        period: usize,
        adaptation_set: usize,
        representation: usize,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
