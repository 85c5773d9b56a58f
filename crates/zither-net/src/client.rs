use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{NetError, NetResult};
use crate::traits::Fetch;
use crate::types::{FetchResponse, Headers, NetOptions};

/// Reqwest-backed [`Fetch`] implementation.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> Self {
        let inner = Client::builder()
            .timeout(options.request_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .expect("failed to build reqwest client");
        Self { inner }
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: &Headers,
    ) -> reqwest::RequestBuilder {
        for (k, v) in headers.iter() {
            req = req.header(k, v);
        }
        req
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(NetOptions::default())
    }
}

#[async_trait]
impl Fetch for HttpClient {
    async fn get(&self, url: Url, headers: &Headers) -> NetResult<FetchResponse> {
        let req = Self::apply_headers(self.inner.get(url), headers);
        let resp = req.send().await?;

        let status = resp.status();
        let effective_url = resp.url().clone();
        if !status.is_success() {
            return Err(NetError::Status {
                status: status.as_u16(),
                url: effective_url,
            });
        }

        let body = resp.bytes().await?;
        debug!(
            url = %effective_url,
            bytes = body.len(),
            "zither-net: fetch complete"
        );
        Ok(FetchResponse {
            body,
            effective_url,
        })
    }
}
