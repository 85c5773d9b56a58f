#![forbid(unsafe_code)]

//! HTTP fetch capability for the zither HLS engine.
//!
//! The engine consumes the [`Fetch`] trait and never talks to the network
//! directly; [`HttpClient`] is the reqwest-backed default implementation.

mod client;
mod error;
mod traits;
mod types;

pub use client::HttpClient;
pub use error::{NetError, NetResult};
pub use traits::Fetch;
pub use types::{parse_header_block, FetchResponse, Headers, NetOptions};
