#![forbid(unsafe_code)]

//! Decrypter capability for the zither HLS engine.
//!
//! The engine consumes the [`Decrypter`] trait for the AES-128 segment
//! path: IV normalization and seeding, per-chunk CBC decryption, and the
//! license-renewal retry. [`AesDecrypter`] is the default implementation.
//!
//! # License key string
//!
//! Hosts configure a `|`-delimited license key string (see [`LicenseKey`])
//! carrying the key-request URL suffix, extra request headers, and the
//! renewal token used when the key server rejects a request.

mod aes128;
mod error;
mod license;
mod traits;

pub use aes128::AesDecrypter;
pub use error::DrmError;
pub use license::LicenseKey;
pub use traits::Decrypter;
