//! The manifest tree: consumer API, shared state, and the AES-128
//! data-arrival hook.
//!
//! All structural state lives in [`TreeState`] behind a single
//! `tokio::sync::Mutex`; the foreground consumer and the background
//! refresh task serialize on it. Fetch and decrypter capabilities are
//! shared and safe to call from both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use zither_drm::{Decrypter, LicenseKey};
use zither_net::{parse_header_block, Fetch, Headers};

use crate::{
    encryption::KeyState,
    error::{HlsError, HlsResult},
    master, media,
    model::{EncryptionState, Period, RepAddress, Representation, PSSH_SET_CLEAR},
    options::{HlsOptions, ManifestKind},
    refresh,
};

/// Result of preparing a representation's timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareStatus {
    Ok,
    /// A new Widevine PSSH set was introduced.
    DrmChanged,
    /// An already-interned Widevine PSSH set was reused.
    DrmUnchanged,
}

/// Structural state of the manifest tree.
///
/// Read it through [`HlsTree::with_tree`]; mutate it only through the
/// engine's operations.
#[derive(Debug, Default)]
pub struct TreeState {
    pub periods: Vec<Period>,
    /// Index of the playback-pinned period.
    pub current_period: usize,
    pub refresh_playlist: bool,
    pub has_timeshift_buffer: bool,
    /// Current discontinuity-sequence baseline.
    pub discontinuity_sequence: u32,
    pub has_discontinuity_sequence: bool,
    /// First discontinuity-sequence value ever observed.
    pub initial_sequence: Option<u32>,
    /// Live reload interval, clamped downward as target durations arrive.
    pub update_interval: Option<Duration>,
    pub total_time_secs: u64,
    /// Effective master URL; base for key and session URI resolution.
    pub manifest_url: Option<Url>,
    pub last_updated: Option<Instant>,
    pub(crate) key_state: KeyState,
}

impl TreeState {
    pub fn representation(&self, addr: RepAddress) -> Option<&Representation> {
        self.periods
            .get(addr.period)?
            .adaptation_sets
            .get(addr.adaptation_set)?
            .representations
            .get(addr.representation)
    }

    fn representation_mut(&mut self, addr: RepAddress) -> Option<&mut Representation> {
        self.periods
            .get_mut(addr.period)?
            .adaptation_sets
            .get_mut(addr.adaptation_set)?
            .representations
            .get_mut(addr.representation)
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<TreeState>,
    pub(crate) fetch: Arc<dyn Fetch>,
    pub(crate) decrypter: Arc<dyn Decrypter>,
    pub(crate) options: HlsOptions,
    pub(crate) cancel: CancellationToken,
    pub(crate) timer_reset: Notify,
    refresh_started: AtomicBool,
}

impl Shared {
    fn validate(state: &TreeState, addr: RepAddress) -> HlsResult<()> {
        if state.representation(addr).is_none() {
            return Err(HlsError::InvalidAddress {
                period: addr.period,
                adaptation_set: addr.adaptation_set,
                representation: addr.representation,
            });
        }
        Ok(())
    }

    pub(crate) async fn prepare_representation(
        self: &Arc<Self>,
        addr: RepAddress,
        update: bool,
    ) -> HlsResult<PrepareStatus> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        Self::validate(state, addr)?;

        let (is_downloaded, saved_number, source_url, stream_type) = {
            let set = &state.periods[addr.period].adaptation_sets[addr.adaptation_set];
            let rep = &set.representations[addr.representation];
            (
                rep.is_downloaded,
                rep.current_segment_number(),
                rep.source_url.clone(),
                set.stream_type,
            )
        };

        let mut status = PrepareStatus::Ok;
        if is_downloaded {
            if update {
                media::reposition_cursor(state, addr, saved_number);
            }
        } else {
            let source_url = source_url.ok_or(HlsError::MissingSourceUrl)?;
            let response = self.fetch.get(source_url.clone(), &Headers::new()).await?;

            if let Some(sink) = &self.options.manifest_sink {
                sink(
                    ManifestKind::Child(stream_type),
                    &response.effective_url,
                    &response.body,
                );
            }

            let text = std::str::from_utf8(&response.body)
                .map_err(|e| HlsError::MalformedManifest(format!("invalid UTF-8: {e}")))?;

            status = media::parse_media_playlist(
                state,
                addr,
                text,
                &response.effective_url,
                update,
                self.decrypter.as_ref(),
            )?;
        }

        if !update {
            self.ensure_refresh_task();
        }

        Ok(status)
    }

    pub(crate) fn ensure_refresh_task(self: &Arc<Self>) {
        if self.refresh_started.swap(true, Ordering::SeqCst) {
            return;
        }
        refresh::spawn(Arc::clone(self));
    }

    /// One live reload cycle: re-prepare every enabled representation of
    /// the current period. Failures leave the representation stale until
    /// the next cycle.
    pub(crate) async fn refresh_live_segments(self: &Arc<Self>) {
        let targets: Vec<RepAddress> = {
            let mut state = self.state.lock().await;
            state.last_updated = Some(Instant::now());
            if !state.refresh_playlist {
                return;
            }
            let period_idx = state.current_period;
            let Some(period) = state.periods.get(period_idx) else {
                return;
            };
            period
                .adaptation_sets
                .iter()
                .enumerate()
                .flat_map(|(set_idx, set)| {
                    set.representations
                        .iter()
                        .enumerate()
                        .filter(|(_, rep)| rep.is_enabled && !rep.is_included_stream)
                        .map(move |(rep_idx, _)| RepAddress {
                            period: period_idx,
                            adaptation_set: set_idx,
                            representation: rep_idx,
                        })
                })
                .collect()
        };

        for addr in targets {
            if let Err(error) = self.prepare_representation(addr, true).await {
                warn!(
                    %error,
                    period = addr.period,
                    adaptation_set = addr.adaptation_set,
                    representation = addr.representation,
                    "zither-hls: live refresh failed, representation left stale"
                );
            }
        }
    }
}

fn append_query(url: &mut Url, params: &str) {
    if params.is_empty() {
        return;
    }
    let merged = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{params}"),
        _ => params.to_string(),
    };
    url.set_query(Some(&merged));
}

/// HLS manifest engine.
///
/// Consumes a [`Fetch`] and a [`Decrypter`] capability, and maintains the
/// period/adaptation-set/representation tree across live reloads.
pub struct HlsTree {
    shared: Arc<Shared>,
}

impl HlsTree {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        decrypter: Arc<dyn Decrypter>,
        options: HlsOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TreeState::default()),
                fetch,
                decrypter,
                options,
                cancel: CancellationToken::new(),
                timer_reset: Notify::new(),
                refresh_started: AtomicBool::new(false),
            }),
        }
    }

    /// Download and parse the master playlist, building the initial
    /// period.
    pub async fn open(&self, url: Url, extra_headers: Headers) -> HlsResult<()> {
        let response = self.shared.fetch.get(url, &extra_headers).await?;

        if let Some(sink) = &self.shared.options.manifest_sink {
            sink(ManifestKind::Master, &response.effective_url, &response.body);
        }

        let text = std::str::from_utf8(&response.body)
            .map_err(|e| HlsError::MalformedManifest(format!("invalid UTF-8: {e}")))?;

        let mut state = self.shared.state.lock().await;
        let state = &mut *state;

        let mut period = master::parse_master_playlist(
            text,
            &response.effective_url,
            &self.shared.options,
            &mut state.key_state,
            self.shared.decrypter.as_ref(),
        )?;
        period.sort();

        state.manifest_url = Some(response.effective_url);
        state.periods.clear();
        state.periods.push(period);
        state.current_period = 0;
        // Live until a child playlist proves otherwise.
        state.refresh_playlist = true;
        state.has_timeshift_buffer = true;

        Ok(())
    }

    /// Download and parse the child playlist of one representation,
    /// rebuilding its segment timeline.
    ///
    /// With `update` set, the consumer's current-segment pointer is
    /// repositioned into the new window instead of reset.
    pub async fn prepare_representation(
        &self,
        addr: RepAddress,
        update: bool,
    ) -> HlsResult<PrepareStatus> {
        self.shared.prepare_representation(addr, update).await
    }

    /// Foreground refresh before switching to the next segment. Restarts
    /// the background timer so the automatic reload is postponed.
    pub async fn refresh_segments(&self, addr: RepAddress) -> HlsResult<()> {
        {
            let state = self.shared.state.lock().await;
            if !state.refresh_playlist {
                return Ok(());
            }
            Shared::validate(&state, addr)?;
            if state
                .representation(addr)
                .map(|rep| rep.is_included_stream)
                .unwrap_or(true)
            {
                return Ok(());
            }
        }

        self.shared.timer_reset.notify_one();
        self.shared.prepare_representation(addr, true).await?;
        Ok(())
    }

    /// Decrypt hook for incoming segment data.
    ///
    /// Segments referencing a non-sentinel PSSH set in a period that is
    /// not `EncryptedSupported` take the AES-128 path: the key URI is
    /// resolved lazily (the response body is the KID), the IV is seeded
    /// per segment, and the chunk is decrypted into `seg_buffer` at
    /// `seg_buffer_offset`. Everything else is appended verbatim.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_data_arrived(
        &self,
        segment_number: u64,
        pssh_set: u16,
        iv: &mut [u8; 16],
        src: &[u8],
        seg_buffer: &mut Vec<u8>,
        seg_buffer_offset: usize,
        is_last_chunk: bool,
    ) -> HlsResult<()> {
        // Clear segments never touch the tree.
        if pssh_set == PSSH_SET_CLEAR {
            seg_buffer.extend_from_slice(src);
            return Ok(());
        }

        // The lock is held only for the AES-128 key-resolution window.
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;

        let current = state.current_period;
        let encrypted_supported = state
            .periods
            .get(current)
            .map(|p| p.encryption_state == EncryptionState::EncryptedSupported)
            .unwrap_or(true);

        if encrypted_supported {
            drop(guard);
            seg_buffer.extend_from_slice(src);
            return Ok(());
        }

        if pssh_set as usize >= state.periods[current].pssh_sets.len() {
            warn!(pssh_set, "cannot get PSSH set at position");
            return Ok(());
        }

        let pssh_uri = state.periods[current].pssh_sets[pssh_set as usize].pssh.clone();
        let mut kid = state.periods[current].pssh_sets[pssh_set as usize]
            .default_kid
            .clone();

        if kid.is_empty() {
            // The same key URI may already be resolved on another set.
            kid = state.periods[current]
                .pssh_sets
                .iter()
                .find(|set| set.pssh == pssh_uri && !set.default_kid.is_empty())
                .map(|set| set.default_kid.clone())
                .unwrap_or_default();
        }

        if kid.is_empty() {
            loop {
                // Re-read the license string each attempt: a renewal may
                // have replaced it.
                let license = LicenseKey::new(self.shared.decrypter.license_key());
                let result = match Url::parse(&pssh_uri) {
                    Ok(mut key_url) => {
                        append_query(&mut key_url, license.url_params());
                        let headers = parse_header_block(license.header_block());
                        self.shared.fetch.get(key_url, &headers).await
                    }
                    Err(e) => Err(zither_net::NetError::Http(format!("invalid key URL: {e}"))),
                };

                match result {
                    Ok(response) => {
                        // The key server's response body is the KID.
                        kid = response.body.to_vec();
                        break;
                    }
                    Err(error) => {
                        warn!(%error, "key request failed");
                        if kid != b"0" {
                            kid = b"0".to_vec();
                            if let Some(token) = license.renewal_token() {
                                if self.shared.decrypter.renew_license(token).await {
                                    continue;
                                }
                            }
                        }
                        break;
                    }
                }
            }
        }

        state.periods[current].pssh_sets[pssh_set as usize].default_kid = kid.clone();

        if kid == b"0" {
            // Unresolvable key: pass the segment through as zeros.
            seg_buffer.resize(seg_buffer_offset + src.len(), 0);
            return Ok(());
        }

        if seg_buffer_offset == 0 {
            match state.periods[current].pssh_sets[pssh_set as usize].iv {
                Some(stored) => *iv = stored,
                None => self.shared.decrypter.iv_from_sequence(iv, segment_number),
            }
        }

        seg_buffer.resize(seg_buffer_offset + src.len(), 0);
        let written = self.shared.decrypter.decrypt(
            &kid,
            iv,
            src,
            seg_buffer,
            seg_buffer_offset,
            is_last_chunk,
        )?;
        if written < src.len() {
            seg_buffer.truncate(seg_buffer_offset + written);
        }

        // CBC chaining: the next chunk's IV is this chunk's last
        // ciphertext block.
        if src.len() >= 16 {
            iv.copy_from_slice(&src[src.len() - 16..]);
        }

        Ok(())
    }

    /// Run a read-only closure against the tree under the lock.
    pub async fn with_tree<R>(&self, f: impl FnOnce(&TreeState) -> R) -> R {
        let state = self.shared.state.lock().await;
        f(&state)
    }

    pub async fn period_count(&self) -> usize {
        self.shared.state.lock().await.periods.len()
    }

    pub async fn current_period_index(&self) -> usize {
        self.shared.state.lock().await.current_period
    }

    pub async fn total_time_secs(&self) -> u64 {
        self.shared.state.lock().await.total_time_secs
    }

    pub async fn update_interval(&self) -> Option<Duration> {
        self.shared.state.lock().await.update_interval
    }

    pub async fn is_live(&self) -> bool {
        self.shared.state.lock().await.refresh_playlist
    }

    pub async fn has_timeshift_buffer(&self) -> bool {
        self.shared.state.lock().await.has_timeshift_buffer
    }

    pub async fn last_updated(&self) -> Option<Instant> {
        self.shared.state.lock().await.last_updated
    }

    /// Select or deselect a representation for playback; enabled
    /// representations are refreshed while live.
    pub async fn set_representation_enabled(
        &self,
        addr: RepAddress,
        enabled: bool,
    ) -> HlsResult<()> {
        let mut state = self.shared.state.lock().await;
        Shared::validate(&state, addr)?;
        if let Some(rep) = state.representation_mut(addr) {
            rep.is_enabled = enabled;
        }
        Ok(())
    }

    /// Point the consumer's cursor at a segment number; `None` (or a
    /// number outside the window) clears it.
    pub async fn set_current_segment(
        &self,
        addr: RepAddress,
        number: Option<u64>,
    ) -> HlsResult<()> {
        let mut state = self.shared.state.lock().await;
        Shared::validate(&state, addr)?;
        if let Some(rep) = state.representation_mut(addr) {
            rep.current_segment = number
                .and_then(|n| n.checked_sub(rep.start_number))
                .map(|pos| pos as usize)
                .filter(|pos| *pos < rep.segments.len());
        }
        Ok(())
    }

    pub async fn set_waiting_for_segment(
        &self,
        addr: RepAddress,
        waiting: bool,
    ) -> HlsResult<()> {
        let mut state = self.shared.state.lock().await;
        Shared::validate(&state, addr)?;
        if let Some(rep) = state.representation_mut(addr) {
            rep.is_waiting_for_segment = waiting;
        }
        Ok(())
    }

    /// Stop the background refresh task. Also happens on drop.
    pub fn close(&self) {
        debug!("zither-hls: tree closed");
        self.shared.cancel.cancel();
    }
}

impl Drop for HlsTree {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
