//! AES-128-CBC segment decryption.

use aes::Aes128;
use async_trait::async_trait;
use cbc::{
    cipher::{block_padding::NoPadding, block_padding::Pkcs7, BlockModeDecrypt, KeyIvInit},
    Decryptor,
};
use tracing::{debug, trace};

use crate::{error::DrmError, license::LicenseKey, traits::Decrypter};

/// AES block size in bytes.
const AES_BLOCK_SIZE: usize = 16;

/// Default [`Decrypter`] implementation for AES-128 (`METHOD=AES-128`)
/// segment encryption.
///
/// Segments arrive in chunks; each chunk is decrypted independently with
/// the IV the engine maintains (CBC chaining is done by the engine copying
/// the last ciphertext block over the IV between chunks). The final chunk
/// removes PKCS7 padding.
///
/// License renewal is host-specific; this implementation always declines.
pub struct AesDecrypter {
    license_key: LicenseKey,
}

impl AesDecrypter {
    pub fn new(license_key: LicenseKey) -> Self {
        Self { license_key }
    }
}

#[async_trait]
impl Decrypter for AesDecrypter {
    fn convert_iv(&self, value: &str) -> Option<[u8; 16]> {
        let hex_str = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
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
        is_last: bool,
    ) -> Result<usize, DrmError> {
        if src.is_empty() {
            return Ok(0);
        }
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| DrmError::InvalidKeyLength(key.len()))?;
        if src.len() % AES_BLOCK_SIZE != 0 {
            return Err(DrmError::UnalignedInput(src.len()));
        }
        let out = &mut dst[dst_offset..dst_offset + src.len()];
        out.copy_from_slice(src);

        let decryptor = Decryptor::<Aes128>::new((&key).into(), iv.into());
        let written = if is_last {
            decryptor
                .decrypt_padded::<Pkcs7>(out)
                .map_err(|e| DrmError::DecryptFailed(format!("PKCS7 unpad failed: {e}")))?
                .len()
        } else {
            decryptor
                .decrypt_padded::<NoPadding>(out)
                .map_err(|e| DrmError::DecryptFailed(format!("CBC decrypt failed: {e}")))?
                .len()
        };

        trace!(
            encrypted = src.len(),
            decrypted = written,
            is_last,
            "aes128: chunk decrypted"
        );
        Ok(written)
    }

    async fn renew_license(&self, token: &str) -> bool {
        debug!(token, "aes128: license renewal not supported, declining");
        false
    }

    fn license_key(&self) -> &str {
        self.license_key.as_str()
    }
}

#[cfg(test)]
mod tests {
    use cbc::{
        cipher::{block_padding::Pkcs7, BlockModeEncrypt, KeyIvInit},
        Encryptor,
    };
    use rstest::rstest;

    use super::*;

    fn encrypt_aes128_cbc(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let encryptor = Encryptor::<Aes128>::new(key.into(), iv.into());
        let padded_len = plaintext.len() + (AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE);
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        encryptor
            .encrypt_padded::<Pkcs7>(&mut buf, plaintext.len())
            .expect("encrypt_padded_mut failed")
            .to_vec()
    }

    fn decrypter() -> AesDecrypter {
        AesDecrypter::new(LicenseKey::default())
    }

    #[test]
    fn single_chunk_roundtrip() {
        let key = [0x42u8; 16];
        let iv = [0x13u8; 16];
        let plaintext = b"two segments of media data make one small test vector";

        let ciphertext = encrypt_aes128_cbc(plaintext, &key, &iv);
        let mut out = vec![0u8; ciphertext.len()];
        let written = decrypter()
            .decrypt(&key, &iv, &ciphertext, &mut out, 0, true)
            .unwrap();

        assert_eq!(&out[..written], plaintext);
    }

    #[test]
    fn chunked_decrypt_with_iv_chaining() {
        let key = [0x01u8; 16];
        let mut iv = [0x02u8; 16];
        let plaintext: Vec<u8> = (0..96).map(|i| i as u8).collect();

        let ciphertext = encrypt_aes128_cbc(&plaintext, &key, &iv);
        let (first, last) = ciphertext.split_at(48);

        let mut out = vec![0u8; ciphertext.len()];
        let n1 = decrypter()
            .decrypt(&key, &iv, first, &mut out, 0, false)
            .unwrap();
        assert_eq!(n1, 48);

        // CBC chaining: next IV is the last ciphertext block of the
        // previous chunk.
        iv.copy_from_slice(&first[first.len() - 16..]);
        let n2 = decrypter()
            .decrypt(&key, &iv, last, &mut out, n1, true)
            .unwrap();

        assert_eq!(&out[..n1 + n2], &plaintext[..]);
    }

    #[test]
    fn unaligned_input_fails() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut out = vec![0u8; 15];
        let err = decrypter()
            .decrypt(&key, &iv, &[0u8; 15], &mut out, 0, false)
            .unwrap_err();
        assert!(matches!(err, DrmError::UnalignedInput(15)));
    }

    #[test]
    fn wrong_key_length_fails() {
        let iv = [0u8; 16];
        let mut out = vec![0u8; 16];
        let err = decrypter()
            .decrypt(&[0u8; 8], &iv, &[0u8; 16], &mut out, 0, false)
            .unwrap_err();
        assert!(matches!(err, DrmError::InvalidKeyLength(8)));
    }

    #[rstest]
    #[case("0x00", Some([0u8; 16]))]
    #[case("", None)]
    #[case("zz", None)]
    #[case(
        "0x000102030405060708090a0b0c0d0e0f",
        Some([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15])
    )]
    fn convert_iv_normalizes(#[case] value: &str, #[case] expected: Option<[u8; 16]>) {
        assert_eq!(decrypter().convert_iv(value), expected);
    }

    #[test]
    fn convert_iv_right_pads_short_values() {
        let iv = decrypter().convert_iv("0xABCD").unwrap();
        assert_eq!(iv[0], 0xAB);
        assert_eq!(iv[1], 0xCD);
        assert!(iv[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn iv_from_sequence_is_big_endian_tail() {
        let mut iv = [0xFFu8; 16];
        decrypter().iv_from_sequence(&mut iv, 0x0102030405060708);
        assert_eq!(iv[..8], [0u8; 8]);
        assert_eq!(iv[8..], [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn renew_license_declines() {
        assert!(!decrypter().renew_license("token").await);
    }
}
