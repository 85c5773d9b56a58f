#![forbid(unsafe_code)]

//! HLS manifest engine.
//!
//! Ingests a master playlist, discovers its media playlists, and
//! maintains an in-memory tree of periods, adaptation sets,
//! representations and segments across live reloads. This is the piece
//! a streaming client consults for "what renditions exist?" and "what
//! is the next segment for this representation?".
//!
//! HTTP retrieval and AES-128 payload decryption are consumed as
//! capabilities ([`zither_net::Fetch`], [`zither_drm::Decrypter`]); the
//! engine emits the tree and incremental updates.
//!
//! ```no_run
//! use std::sync::Arc;
//! use url::Url;
//! use zither_drm::{AesDecrypter, LicenseKey};
//! use zither_hls::{HlsOptions, HlsTree, RepAddress};
//! use zither_net::{Headers, HttpClient};
//!
//! # async fn run() -> zither_hls::HlsResult<()> {
//! let tree = HlsTree::new(
//!     Arc::new(HttpClient::default()),
//!     Arc::new(AesDecrypter::new(LicenseKey::default())),
//!     HlsOptions::default(),
//! );
//! tree.open(
//!     Url::parse("https://example.com/master.m3u8").unwrap(),
//!     Headers::new(),
//! )
//! .await?;
//!
//! let addr = RepAddress { period: 0, adaptation_set: 0, representation: 0 };
//! tree.prepare_representation(addr, false).await?;
//! # Ok(())
//! # }
//! ```

mod encryption;
mod error;
mod master;
mod media;
mod model;
mod options;
mod refresh;
mod tags;
mod tree;

pub use encryption::{EncryptionType, KeyState, WIDEVINE_KEY_SYSTEM};
pub use error::{HlsError, HlsResult};
pub use model::{
    container_type_from_extension, AdaptationSet, ContainerType, CryptoMode, EncryptionState,
    Period, PsshSet, RepAddress, Representation, Segment, StreamType, DEFAULT_TIMESCALE,
    NO_PTS_VALUE, NO_RANGE_VALUE, PSSH_SET_CLEAR, SEGMENT_NO_NUMBER,
};
pub use options::{HlsOptions, ManifestKind, ManifestSink};
pub use tree::{HlsTree, PrepareStatus, TreeState};
