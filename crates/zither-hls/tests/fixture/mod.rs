//! Shared test fixture: an in-memory fetch capability, an observable
//! decrypter, and canned manifests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;
use zither_drm::{Decrypter, DrmError};
use zither_net::{Fetch, FetchResponse, Headers, NetError, NetResult};

/// In-memory [`Fetch`]: URL -> body. Unknown URLs return 404.
#[derive(Default)]
pub struct MockFetch {
    responses: Mutex<HashMap<String, Bytes>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetch for MockFetch {
    async fn get(&self, url: Url, _headers: &Headers) -> NetResult<FetchResponse> {
        self.requests.lock().unwrap().push(url.to_string());
        let body = self.responses.lock().unwrap().get(url.as_str()).cloned();
        match body {
            Some(body) => Ok(FetchResponse {
                body,
                effective_url: url,
            }),
            None => Err(NetError::Status { status: 404, url }),
        }
    }
}

/// Pass-through decrypter that records every IV/KID it sees.
#[derive(Default)]
pub struct StubDecrypter {
    pub license_key: String,
    pub seen_ivs: Mutex<Vec<[u8; 16]>>,
    pub seen_kids: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl Decrypter for StubDecrypter {
    fn convert_iv(&self, value: &str) -> Option<[u8; 16]> {
        let hex_str = value.strip_prefix("0x").unwrap_or(value);
        if hex_str.is_empty() {
            return None;
        }
        let bytes = hex::decode(hex_str).ok()?;
        let mut iv = [0u8; 16];
        let len = bytes.len().min(16);
        iv[..len].copy_from_slice(&bytes[..len]);
        Some(iv)
    }

    fn iv_from_sequence(&self, iv: &mut [u8; 16], sequence: u64) {
        iv.fill(0);
        iv[8..].copy_from_slice(&sequence.to_be_bytes());
    }

    fn decrypt(
        &self,
        key: &[u8],
        iv: &[u8; 16],
        src: &[u8],
        dst: &mut [u8],
        dst_offset: usize,
        _is_last: bool,
    ) -> Result<usize, DrmError> {
        self.seen_ivs.lock().unwrap().push(*iv);
        self.seen_kids.lock().unwrap().push(key.to_vec());
        dst[dst_offset..dst_offset + src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    async fn renew_license(&self, _token: &str) -> bool {
        false
    }

    fn license_key(&self) -> &str {
        &self.license_key
    }
}

pub const MASTER_URL: &str = "https://cdn.example.com/stream/master.m3u8";

pub const MASTER_SINGLE_VARIANT: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=500000,CODECS=\"avc1.64001f,mp4a.40.2\",RESOLUTION=640x360\n\
a.m3u8\n";

pub const CHILD_VOD: &str = "#EXTM3U\n\
#EXT-X-PLAYLIST-TYPE:VOD\n\
#EXT-X-TARGETDURATION:10\n\
#EXTINF:10.0,\n\
s0.ts\n\
#EXTINF:5.0,\n\
s1.ts\n\
#EXT-X-ENDLIST\n";

/// Live window of `count` ten-second segments starting at `first`.
pub fn live_window(first: u64, count: u64) -> String {
    let mut data = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:10\n");
    data.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{first}\n"));
    for number in first..first + count {
        data.push_str(&format!("#EXTINF:10.0,\ns{number}.ts\n"));
    }
    data
}
