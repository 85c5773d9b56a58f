use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

/// Case-preserving header map for outgoing requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn extend(&mut self, other: &Headers) {
        for (k, v) in other.iter() {
            self.inner.insert(k.to_string(), v.to_string());
        }
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

/// Parse an RFC-7230-style header block (`Name: value` lines separated by
/// `\r\n`) into [`Headers`]. Lines without a colon are skipped.
pub fn parse_header_block(block: &str) -> Headers {
    let mut headers = Headers::new();
    for line in block.split("\r\n").flat_map(|l| l.split('\n')) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.insert(name.trim(), value.trim());
    }
    headers
}

/// Response of a completed fetch.
#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub body: Bytes,
    /// Final URL after redirects; the base for relative resolution.
    pub effective_url: Url,
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn headers_insert_get() {
        let mut headers = Headers::new();
        headers.insert("Authorization", "Bearer token");
        assert_eq!(headers.get("Authorization"), Some("Bearer token"));
        assert_eq!(headers.len(), 1);
    }

    #[rstest]
    #[case("X-Key: abc\r\nX-Other: def", 2)]
    #[case("X-Key: abc", 1)]
    #[case("", 0)]
    #[case("no colon here\r\nX-Key: abc", 1)]
    fn header_block_line_count(#[case] block: &str, #[case] expected: usize) {
        assert_eq!(parse_header_block(block).len(), expected);
    }

    #[test]
    fn header_block_trims_whitespace() {
        let headers = parse_header_block("  X-Key :  value with spaces  ");
        assert_eq!(headers.get("X-Key"), Some("value with spaces"));
    }

    #[test]
    fn header_block_accepts_bare_newlines() {
        let headers = parse_header_block("A: 1\nB: 2");
        assert_eq!(headers.get("A"), Some("1"));
        assert_eq!(headers.get("B"), Some("2"));
    }
}
