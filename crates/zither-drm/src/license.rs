/// `|`-delimited license key string.
///
/// Field order: (0) URL query suffix appended to key requests, (1) extra
/// HTTP header block in RFC-7230 style separated by `\r\n`, (2) and (3)
/// reserved, (4) renewal token.
#[derive(Clone, Debug, Default)]
pub struct LicenseKey {
    raw: String,
}

impl LicenseKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn field(&self, index: usize) -> &str {
        self.raw.split('|').nth(index).unwrap_or("")
    }

    /// Query suffix for key-request URLs, without a leading `?` or `&`.
    pub fn url_params(&self) -> &str {
        self.field(0)
    }

    /// Extra HTTP headers for key requests.
    pub fn header_block(&self) -> &str {
        self.field(1)
    }

    /// Renewal token, when configured.
    pub fn renewal_token(&self) -> Option<&str> {
        let token = self.field(4);
        (!token.is_empty()).then_some(token)
    }
}
