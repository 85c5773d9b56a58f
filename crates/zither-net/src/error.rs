use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Centralized error type for zither-net.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} for URL: {url}")]
    Status { status: u16, url: Url },

    #[error("Timeout")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting {:#} includes the full error chain
        // (e.g. "error sending request … : connection refused").
        Self::Http(format!("{e:#}"))
    }
}
