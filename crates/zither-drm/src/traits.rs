use async_trait::async_trait;

use crate::error::DrmError;

/// Decrypter capability consumed by the manifest engine.
///
/// All methods must be safe to call from both the foreground consumer
/// and the background refresh task.
#[async_trait]
pub trait Decrypter: Send + Sync {
    /// Normalize a hex IV attribute value (`0x`-prefixed or bare) to 16
    /// bytes, truncating or right-padding with zeros. Returns `None` for
    /// an empty or undecodable value.
    fn convert_iv(&self, value: &str) -> Option<[u8; 16]>;

    /// Derive a segment IV from the media sequence number.
    fn iv_from_sequence(&self, iv: &mut [u8; 16], sequence: u64);

    /// Decrypt one chunk of an AES-128-CBC segment.
    ///
    /// `dst` must already be sized to at least `dst_offset + src.len()`;
    /// the decrypted bytes are written in place starting at `dst_offset`.
    /// Returns the number of bytes written, which is less than
    /// `src.len()` when `is_last` removes PKCS7 padding. IV chaining
    /// across chunks is the caller's responsibility.
    fn decrypt(
        &self,
        key: &[u8],
        iv: &[u8; 16],
        src: &[u8],
        dst: &mut [u8],
        dst_offset: usize,
        is_last: bool,
    ) -> Result<usize, DrmError>;

    /// Ask the license backend to renew with `token`; `true` means the
    /// failed key request is worth one retry.
    async fn renew_license(&self, token: &str) -> bool;

    /// The configured `|`-delimited license key string.
    fn license_key(&self) -> &str;
}
