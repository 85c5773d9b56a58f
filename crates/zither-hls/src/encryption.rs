//! Interpretation of `EXT-X-KEY` / `EXT-X-SESSION-KEY` attribute lists.
//!
//! The machine's current PSSH / default KID / IV / crypto mode persist
//! across playlists and flow into the PSSH sets interned while segments
//! are parsed.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;
use url::Url;
use zither_drm::Decrypter;

use crate::model::CryptoMode;

/// Widevine key-system UUID as it appears in `KEYFORMAT`.
pub const WIDEVINE_KEY_SYSTEM: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";
/// FairPlay streaming key delivery; recognized but not servable.
const FAIRPLAY_KEY_FORMAT: &str = "com.apple.streamingkeydelivery";

/// Length of the `data:` URI prefix on Widevine key URIs
/// (`data:text/plain;base64,`).
const DATA_URI_PREFIX_LEN: usize = 23;

/// Classification of one key tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionType {
    Clear,
    Aes128,
    Widevine,
    NotSupported,
    Unknown,
}

/// Current encryption state carried across playlist parses.
#[derive(Clone, Debug, Default)]
pub struct KeyState {
    /// Resolved key URI (AES-128) or base64 PSSH payload (Widevine).
    pub pssh: String,
    pub default_kid: Vec<u8>,
    pub iv: Option<[u8; 16]>,
    pub crypto_mode: CryptoMode,
}

impl KeyState {
    /// Fold one key tag's attributes into the state and classify it.
    pub fn process(
        &mut self,
        base_url: &Url,
        attribs: &HashMap<String, String>,
        decrypter: &dyn Decrypter,
    ) -> EncryptionType {
        let method = attribs.get("METHOD").map(String::as_str).unwrap_or("");
        let uri = attribs.get("URI").map(String::as_str).unwrap_or("");
        let key_format = attribs.get("KEYFORMAT").map(String::as_str).unwrap_or("");

        if method == "NONE" {
            self.pssh.clear();
            return EncryptionType::Clear;
        }

        if method == "AES-128" && !uri.is_empty() {
            self.pssh = match base_url.join(uri) {
                Ok(resolved) => resolved.to_string(),
                Err(_) => uri.to_string(),
            };
            self.iv = decrypter.convert_iv(attribs.get("IV").map(String::as_str).unwrap_or(""));
            return EncryptionType::Aes128;
        }

        if key_format.eq_ignore_ascii_case(WIDEVINE_KEY_SYSTEM) && !uri.is_empty() {
            if let Some(keyid) = attribs.get("KEYID").filter(|k| !k.is_empty()) {
                let hex_str = keyid.get(2..).unwrap_or("");
                if let Ok(bytes) = hex::decode(hex_str) {
                    if bytes.len() >= 16 {
                        self.default_kid = bytes[..16].to_vec();
                    }
                }
            }

            self.pssh = uri.get(DATA_URI_PREFIX_LEN..).unwrap_or("").to_string();
            // A bare 68-char payload is the minimal PSSH box layout
            // len + 'pssh' + v0 + system-id + kid-len + kid; bytes 34..50
            // are the default KID.
            if self.default_kid.is_empty() && self.pssh.len() == 68 {
                if let Ok(decoded) = STANDARD.decode(&self.pssh) {
                    if decoded.len() == 50 {
                        self.default_kid = decoded[34..50].to_vec();
                    }
                }
            }

            if method == "SAMPLE-AES-CTR" {
                self.crypto_mode = CryptoMode::AesCtr;
            } else if method == "SAMPLE-AES" {
                self.crypto_mode = CryptoMode::AesCbc;
            }
            return EncryptionType::Widevine;
        }

        if key_format.eq_ignore_ascii_case(FAIRPLAY_KEY_FORMAT) {
            debug!(key_format, "keyformat not supported");
            return EncryptionType::NotSupported;
        }

        EncryptionType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use zither_drm::{AesDecrypter, LicenseKey};

    use super::*;
    use crate::tags::parse_attributes;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/stream/master.m3u8").unwrap()
    }

    fn decrypter() -> AesDecrypter {
        AesDecrypter::new(LicenseKey::default())
    }

    #[test]
    fn method_none_clears_pssh() {
        let mut state = KeyState {
            pssh: "leftover".to_string(),
            ..Default::default()
        };
        let attribs = parse_attributes("METHOD=NONE");
        assert_eq!(
            state.process(&base(), &attribs, &decrypter()),
            EncryptionType::Clear
        );
        assert!(state.pssh.is_empty());
    }

    #[test]
    fn aes128_resolves_uri_and_records_iv() {
        let mut state = KeyState::default();
        let attribs = parse_attributes("METHOD=AES-128,URI=\"keys/k1\",IV=0x01");
        assert_eq!(
            state.process(&base(), &attribs, &decrypter()),
            EncryptionType::Aes128
        );
        assert_eq!(state.pssh, "https://cdn.example.com/stream/keys/k1");
        let iv = state.iv.unwrap();
        assert_eq!(iv[0], 0x01);
        assert!(iv[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn aes128_without_uri_is_unknown() {
        let mut state = KeyState::default();
        let attribs = parse_attributes("METHOD=AES-128,IV=0x01");
        assert_eq!(
            state.process(&base(), &attribs, &decrypter()),
            EncryptionType::Unknown
        );
    }

    #[test]
    fn widevine_takes_kid_from_keyid_attribute() {
        let mut state = KeyState::default();
        let attribs = parse_attributes(concat!(
            "METHOD=SAMPLE-AES-CTR,",
            "KEYFORMAT=\"urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed\",",
            "URI=\"data:text/plain;base64,cHNzaGRhdGE=\",",
            "KEYID=0x000102030405060708090a0b0c0d0e0f"
        ));
        assert_eq!(
            state.process(&base(), &attribs, &decrypter()),
            EncryptionType::Widevine
        );
        assert_eq!(state.pssh, "cHNzaGRhdGE=");
        assert_eq!(state.default_kid, (0u8..16).collect::<Vec<u8>>());
        assert_eq!(state.crypto_mode, CryptoMode::AesCtr);
    }

    #[test]
    fn widevine_extracts_kid_from_minimal_pssh_box() {
        // 50-byte minimal PSSH box; the default KID sits at bytes 34..50.
        let mut raw = vec![0u8; 50];
        raw[4..8].copy_from_slice(b"pssh");
        for (i, b) in raw[34..50].iter_mut().enumerate() {
            *b = 0xA0 + i as u8;
        }
        let payload = STANDARD.encode(&raw);
        assert_eq!(payload.len(), 68);

        let mut state = KeyState::default();
        let attribs = parse_attributes(format!(
            "METHOD=SAMPLE-AES,KEYFORMAT=\"{WIDEVINE_KEY_SYSTEM}\",URI=\"data:text/plain;base64,{payload}\""
        )
        .as_str());
        assert_eq!(
            state.process(&base(), &attribs, &decrypter()),
            EncryptionType::Widevine
        );
        assert_eq!(state.default_kid, raw[34..50].to_vec());
        assert_eq!(state.crypto_mode, CryptoMode::AesCbc);
    }

    #[test]
    fn fairplay_is_not_supported() {
        let mut state = KeyState::default();
        let attribs = parse_attributes(
            "METHOD=SAMPLE-AES,KEYFORMAT=\"com.apple.streamingkeydelivery\",URI=\"skd://key\"",
        );
        assert_eq!(
            state.process(&base(), &attribs, &decrypter()),
            EncryptionType::NotSupported
        );
    }

    #[test]
    fn unrecognized_keyformat_is_unknown() {
        let mut state = KeyState::default();
        let attribs =
            parse_attributes("METHOD=SAMPLE-AES,KEYFORMAT=\"com.example.drm\",URI=\"k\"");
        assert_eq!(
            state.process(&base(), &attribs, &decrypter()),
            EncryptionType::Unknown
        );
    }
}
