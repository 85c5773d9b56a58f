use async_trait::async_trait;
use url::Url;

use crate::error::NetResult;
use crate::types::{FetchResponse, Headers};

/// Fetch capability consumed by the manifest engine.
///
/// Implementations must follow redirects and report the final URL in
/// [`FetchResponse::effective_url`]; the engine resolves all relative
/// playlist and key URIs against it.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Download the whole resource at `url`.
    async fn get(&self, url: Url, headers: &Headers) -> NetResult<FetchResponse>;
}
