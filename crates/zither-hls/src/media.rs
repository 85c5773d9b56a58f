//! Media (child) playlist parsing.
//!
//! Rebuilds one representation's segment timeline in place, forking
//! additional periods on `EXT-X-DISCONTINUITY` and purging stale periods
//! on `EXT-X-DISCONTINUITY-SEQUENCE` advances. The playback-pinned
//! current period is never erased: it is detached during the purge and
//! reattached at the front once the scan completes, so consumer pointers
//! into it stay valid.

use tracing::{debug, warn};
use url::Url;
use zither_drm::Decrypter;

use crate::{
    encryption::{EncryptionType, KeyState},
    error::{HlsError, HlsResult},
    model::{
        container_type_from_extension, ContainerType, EncryptionState, Period, PsshSet,
        RepAddress, Segment, StreamType, NO_PTS_VALUE, NO_RANGE_VALUE, PSSH_SET_CLEAR,
        SEGMENT_NO_NUMBER,
    },
    tags::{parse_attributes, parse_byte_range, parse_extinf_duration, Line, Lines},
    tree::{PrepareStatus, TreeState},
};

use std::time::Duration;

/// Entry bookkeeping across the discontinuity-sequence purge.
struct ScanCtx {
    /// The playback-pinned period, detached while the window slides.
    detached: Option<Period>,
    /// Index of the entry period among the attached periods.
    entry_idx: usize,
    /// The entry period is the detached one.
    entry_detached: bool,
}

fn detect_container(uri: &str) -> ContainerType {
    let path = uri.split('?').next().unwrap_or(uri);
    match path.rsplit_once('.') {
        Some((_, extension)) => container_type_from_extension(extension),
        None => ContainerType::Invalid,
    }
}

fn pssh_candidate(key_state: &KeyState, stream_type: StreamType, adaptation_set: usize) -> PsshSet {
    PsshSet {
        pssh: key_state.pssh.clone(),
        default_kid: key_state.default_kid.clone(),
        iv: key_state.iv,
        stream_type,
        adaptation_set: Some(adaptation_set),
        crypto_mode: key_state.crypto_mode,
        usage_count: 0,
    }
}

/// Clear a representation's timeline, releasing its PSSH usage counts.
fn free_segments(period: &mut Period, adp: usize, rep: usize) {
    let segments =
        std::mem::take(&mut period.adaptation_sets[adp].representations[rep].segments);
    for segment in &segments {
        if let Some(set) = period.pssh_sets.get_mut(segment.pssh_set as usize) {
            set.usage_count = set.usage_count.saturating_sub(1);
        }
    }
    period.adaptation_sets[adp].representations[rep].current_segment = None;
}

/// Remove periods the playlist window has slid past (sequence below the
/// new baseline). The current period is detached instead of erased.
fn purge_stale_periods(state: &mut TreeState, ctx: &mut ScanCtx) {
    let baseline = state.discontinuity_sequence;
    let mut index = 0usize;

    while index < state.periods.len() {
        if state.periods[index].sequence >= baseline {
            index += 1;
            continue;
        }

        let is_current = ctx.detached.is_none() && index == state.current_period;
        if is_current {
            // We end up here after pausing for some time: detach now,
            // reattach at the front after the scan.
            ctx.detached = Some(state.periods.remove(index));
            if !ctx.entry_detached {
                if ctx.entry_idx == index {
                    ctx.entry_detached = true;
                } else if ctx.entry_idx > index {
                    ctx.entry_idx -= 1;
                }
            }
        } else {
            state.periods.remove(index);
            if ctx.detached.is_none() && state.current_period > index {
                state.current_period -= 1;
            }
            if !ctx.entry_detached {
                if ctx.entry_idx == index {
                    ctx.entry_idx = 0;
                } else if ctx.entry_idx > index {
                    ctx.entry_idx -= 1;
                }
            }
        }
    }

    if state.periods.is_empty() {
        if let Some(period) = ctx.detached.take() {
            debug!("all periods below the new baseline; keeping the pinned period");
            state.periods.push(period);
            if ctx.entry_detached {
                ctx.entry_detached = false;
                ctx.entry_idx = 0;
            }
        }
    }

    if ctx.detached.is_some() {
        // Placeholder until the detached period is reattached at index 0.
        state.current_period = 0;
    }
}

/// Reposition the consumer's segment pointer after a timeline rebuild.
pub(crate) fn reposition_cursor(state: &mut TreeState, addr: RepAddress, saved_number: u64) {
    let last_period = state.periods.len().saturating_sub(1);
    let current_is_last = state.current_period == last_period;

    let Some(rep) = state
        .periods
        .get_mut(addr.period)
        .and_then(|p| p.adaptation_sets.get_mut(addr.adaptation_set))
        .and_then(|a| a.representations.get_mut(addr.representation))
    else {
        return;
    };

    if saved_number == 0
        || saved_number < rep.start_number
        || saved_number == SEGMENT_NO_NUMBER
        || rep.segments.is_empty()
    {
        rep.current_segment = None;
    } else {
        let window_end = rep.start_number + rep.segments.len() as u64;
        let number = saved_number.min(window_end - 1);
        rep.current_segment = Some((number - rep.start_number) as usize);
    }

    if rep.is_waiting_for_segment && (rep.has_next_segment() || !current_is_last) {
        rep.is_waiting_for_segment = false;
    }
}

/// Parse a child playlist into the representation addressed by `addr`.
///
/// `base_url` is the effective (post-redirect) child playlist URL.
/// On error the previous timeline is left intact.
pub(crate) fn parse_media_playlist(
    state: &mut TreeState,
    addr: RepAddress,
    data: &str,
    base_url: &Url,
    update: bool,
    decrypter: &dyn Decrypter,
) -> HlsResult<PrepareStatus> {
    let saved_number = state.periods[addr.period].adaptation_sets[addr.adaptation_set]
        .representations[addr.representation]
        .current_segment_number();

    let mut ctx = ScanCtx {
        detached: None,
        entry_idx: addr.period,
        entry_detached: false,
    };

    let result = scan_playlist(state, addr, data, base_url, update, decrypter, &mut ctx);

    // Reattach the playback-pinned period at the front, preserving the
    // consumer's period pointer across the slid window.
    if let Some(period) = ctx.detached.take() {
        state.periods.insert(0, period);
        state.current_period = 0;
        if ctx.entry_detached {
            ctx.entry_idx = 0;
        } else {
            ctx.entry_idx += 1;
        }
    }

    let status = result?;

    if update {
        reposition_cursor(
            state,
            RepAddress {
                period: ctx.entry_idx,
                ..addr
            },
            saved_number,
        );
    }

    Ok(status)
}

fn scan_playlist(
    state: &mut TreeState,
    addr: RepAddress,
    data: &str,
    base_url: &Url,
    update: bool,
    decrypter: &dyn Decrypter,
    ctx: &mut ScanCtx,
) -> HlsResult<PrepareStatus> {
    let adp_pos = addr.adaptation_set;
    let rep_pos = addr.representation;
    let mut period_idx = addr.period;

    let mut status = PrepareStatus::Ok;
    let mut current_encryption = EncryptionType::Clear;

    let mut current_pts: u64 = 0;
    let mut start_number: u64 = 0;
    let mut new_segments: Vec<Segment> = Vec::new();
    let mut pending: Option<Segment> = None;
    let mut segment_has_byte_range = false;
    // PSSH set shared between segments; the sentinel means "not interned".
    let mut pssh_pos: u16 = PSSH_SET_CLEAR;

    let mut init_segment = Segment::default();
    let mut has_init = false;

    let mut discont_count: usize = 0;
    let mut is_extm3u = false;

    for line in Lines::new(data) {
        if !is_extm3u {
            if matches!(line, Line::Tag { name: "#EXTM3U", .. }) {
                is_extm3u = true;
            }
            continue;
        }

        match line {
            Line::Tag {
                name: "#EXT-X-KEY",
                value,
            } => {
                let attribs = parse_attributes(value);
                let key_base = state
                    .manifest_url
                    .clone()
                    .unwrap_or_else(|| base_url.clone());

                match state.key_state.process(&key_base, &attribs, decrypter) {
                    EncryptionType::NotSupported => {
                        state.periods[period_idx].encryption_state = EncryptionState::Encrypted;
                        return Err(HlsError::UnsupportedEncryption(
                            "key format not supported".to_string(),
                        ));
                    }
                    EncryptionType::Aes128 => {
                        current_encryption = EncryptionType::Aes128;
                        pssh_pos = PSSH_SET_CLEAR;
                    }
                    EncryptionType::Widevine => {
                        current_encryption = EncryptionType::Widevine;

                        let stream_type =
                            state.periods[period_idx].adaptation_sets[adp_pos].stream_type;
                        let candidate = pssh_candidate(&state.key_state, stream_type, adp_pos);
                        let index = state.periods[period_idx].insert_pssh_set(Some(candidate));
                        state.periods[period_idx].encryption_state =
                            EncryptionState::EncryptedSupported;
                        state.periods[period_idx].adaptation_sets[adp_pos].representations
                            [rep_pos]
                            .pssh_set = index;

                        let usage =
                            state.periods[period_idx].pssh_sets[index as usize].usage_count;
                        status = if usage == 1 || status == PrepareStatus::DrmChanged {
                            PrepareStatus::DrmChanged
                        } else {
                            PrepareStatus::DrmUnchanged
                        };
                    }
                    EncryptionType::Unknown => {
                        warn!("unknown encryption type");
                    }
                    EncryptionType::Clear => {
                        current_encryption = EncryptionType::Clear;
                        pssh_pos = PSSH_SET_CLEAR;
                    }
                }
            }
            Line::Tag {
                name: "#EXT-X-MAP",
                value,
            } => {
                let attribs = parse_attributes(value);

                if let Some(uri) = attribs.get("URI") {
                    match base_url.join(uri) {
                        Ok(resolved) => {
                            init_segment.url = Some(resolved);
                            init_segment.start_pts = NO_PTS_VALUE;
                            init_segment.pssh_set = PSSH_SET_CLEAR;
                            has_init = true;
                            state.periods[period_idx].adaptation_sets[adp_pos].representations
                                [rep_pos]
                                .container_type = ContainerType::Mp4;
                        }
                        Err(_) => warn!(uri = uri.as_str(), "unresolvable EXT-X-MAP URI"),
                    }
                }

                match attribs.get("BYTERANGE").and_then(|r| parse_byte_range(r)) {
                    Some((length, offset)) => {
                        let begin = offset.unwrap_or(0);
                        init_segment.range_begin = begin;
                        init_segment.range_end = begin + length.saturating_sub(1);
                    }
                    None => {
                        init_segment.range_begin = NO_RANGE_VALUE;
                        init_segment.range_end = NO_RANGE_VALUE;
                    }
                }
            }
            Line::Tag {
                name: "#EXT-X-MEDIA-SEQUENCE",
                value,
            } => {
                start_number = value.trim().parse().unwrap_or(0);
            }
            Line::Tag {
                name: "#EXT-X-PLAYLIST-TYPE",
                value,
            } => {
                if value.trim().eq_ignore_ascii_case("VOD") {
                    state.refresh_playlist = false;
                    state.has_timeshift_buffer = false;
                }
            }
            Line::Tag {
                name: "#EXT-X-TARGETDURATION",
                value,
            } => {
                // Live update interval: 1.5x the longest segment duration,
                // only ever shortened.
                let target_secs: u64 = value.trim().parse().unwrap_or(0);
                let interval = Duration::from_millis(target_secs * 1500);
                if target_secs > 0 && state.update_interval.map_or(true, |cur| interval < cur) {
                    state.update_interval = Some(interval);
                }
            }
            Line::Tag {
                name: "#EXTINF",
                value,
            } => {
                let timescale = state.periods[period_idx].adaptation_sets[adp_pos]
                    .representations[rep_pos]
                    .timescale;
                let duration_secs = parse_extinf_duration(value).unwrap_or(0.0);
                let duration = (duration_secs * timescale as f64).ceil() as u64;

                pending = Some(Segment {
                    start_pts: current_pts,
                    duration,
                    pssh_set: pssh_pos,
                    ..Default::default()
                });
                current_pts += duration;
            }
            Line::Tag {
                name: "#EXT-X-BYTERANGE",
                value,
            } if pending.is_some() => {
                if let (Some((length, offset)), Some(segment)) =
                    (parse_byte_range(value), pending.as_mut())
                {
                    let begin = offset.unwrap_or_else(|| {
                        new_segments
                            .last()
                            .filter(|s| s.has_byte_range())
                            .map(|s| s.range_end + 1)
                            .unwrap_or(0)
                    });
                    segment.range_begin = begin;
                    segment.range_end = begin + length.saturating_sub(1);
                    segment_has_byte_range = true;
                }
            }
            Line::Tag {
                name: "#EXT-X-DISCONTINUITY-SEQUENCE",
                value,
            } => {
                state.discontinuity_sequence = value.trim().parse().unwrap_or(0);
                if state.initial_sequence.is_none() {
                    state.initial_sequence = Some(state.discontinuity_sequence);
                }
                state.has_discontinuity_sequence = true;

                // Make sure the first period has a sequence on initial
                // prepare.
                if !update
                    && state.discontinuity_sequence > 0
                    && state.periods.last().map(|p| p.sequence) == Some(0)
                {
                    state.periods[0].sequence = state.discontinuity_sequence;
                }

                purge_stale_periods(state, ctx);
                period_idx = 0;
            }
            Line::Tag {
                name: "#EXT-X-DISCONTINUITY",
                ..
            } => {
                if new_segments.is_empty() {
                    warn!("segment at position 0 not found");
                    continue;
                }

                state.periods[period_idx].sequence =
                    state.discontinuity_sequence + discont_count as u32;

                let rep_duration = current_pts - new_segments[0].start_pts;
                let stream_type =
                    state.periods[period_idx].adaptation_sets[adp_pos].stream_type;
                let rep_timescale;
                {
                    let rep = &mut state.periods[period_idx].adaptation_sets[adp_pos]
                        .representations[rep_pos];
                    rep.duration = rep_duration;
                    rep_timescale = rep.timescale;
                }
                if stream_type != StreamType::Subtitle {
                    let period_timescale = state.periods[period_idx].timescale;
                    state.periods[period_idx].duration =
                        rep_duration * period_timescale / rep_timescale;
                }

                free_segments(&mut state.periods[period_idx], adp_pos, rep_pos);

                let swapped_count;
                {
                    let rep = &mut state.periods[period_idx].adaptation_sets[adp_pos]
                        .representations[rep_pos];
                    rep.segments = std::mem::take(&mut new_segments);
                    rep.start_number = start_number;
                    swapped_count = rep.segments.len() as u64;
                    if has_init {
                        // The init URL persists into the next period until a
                        // new EXT-X-MAP overrides it.
                        rep.init_segment = Some(init_segment.clone());
                    }
                }

                discont_count += 1;
                if state.periods.len() == discont_count {
                    let template = match &ctx.detached {
                        Some(period) => period,
                        None => &state.periods[state.current_period],
                    };
                    let new_period = template.structural_clone();
                    state.periods.push(new_period);
                }
                period_idx = discont_count;

                start_number += swapped_count;
                current_pts = 0;

                if current_encryption == EncryptionType::Widevine {
                    let stream_type =
                        state.periods[period_idx].adaptation_sets[adp_pos].stream_type;
                    let candidate = pssh_candidate(&state.key_state, stream_type, adp_pos);
                    let index = state.periods[period_idx].insert_pssh_set(Some(candidate));
                    state.periods[period_idx].adaptation_sets[adp_pos].representations[rep_pos]
                        .pssh_set = index;
                    state.periods[period_idx].encryption_state =
                        EncryptionState::EncryptedSupported;
                }

                if has_init && init_segment.url.is_some() {
                    state.periods[period_idx].adaptation_sets[adp_pos].representations[rep_pos]
                        .container_type = ContainerType::Mp4;
                }
            }
            Line::Tag {
                name: "#EXT-X-ENDLIST",
                ..
            } => {
                state.refresh_playlist = false;
                state.has_timeshift_buffer = false;
            }
            Line::Uri(uri) if pending.is_some() => {
                let container = state.periods[period_idx].adaptation_sets[adp_pos]
                    .representations[rep_pos]
                    .container_type;
                let stream_type =
                    state.periods[period_idx].adaptation_sets[adp_pos].stream_type;

                if container == ContainerType::NoType {
                    let mut detected = detect_container(uri);
                    if detected == ContainerType::Invalid {
                        // Streams with the media url encoded as a parameter
                        // of the url itself cannot be detected safely; try
                        // the common container for the stream type.
                        detected = match stream_type {
                            StreamType::Video => {
                                warn!("cannot detect container type from media url, fallback to TS");
                                ContainerType::Ts
                            }
                            StreamType::Audio => {
                                warn!("cannot detect container type from media url, fallback to ADTS");
                                ContainerType::Adts
                            }
                            StreamType::Subtitle => {
                                warn!("cannot detect container type from media url, fallback to TEXT");
                                ContainerType::Text
                            }
                            StreamType::NoType => ContainerType::Invalid,
                        };
                    }
                    state.periods[period_idx].adaptation_sets[adp_pos].representations[rep_pos]
                        .container_type = detected;
                } else if container == ContainerType::Invalid {
                    pending = None;
                    continue;
                }

                let Some(mut segment) = pending.take() else {
                    continue;
                };

                let rep_has_url = state.periods[period_idx].adaptation_sets[adp_pos]
                    .representations[rep_pos]
                    .url
                    .is_some();
                if !segment_has_byte_range || !rep_has_url {
                    match base_url.join(uri) {
                        Ok(resolved) => {
                            if segment_has_byte_range {
                                state.periods[period_idx].adaptation_sets[adp_pos]
                                    .representations[rep_pos]
                                    .url = Some(resolved);
                            } else {
                                segment.url = Some(resolved);
                            }
                        }
                        Err(_) => warn!(uri, "unresolvable segment URI"),
                    }
                }

                if current_encryption == EncryptionType::Aes128 {
                    if pssh_pos == PSSH_SET_CLEAR {
                        let candidate =
                            pssh_candidate(&state.key_state, StreamType::NoType, adp_pos);
                        pssh_pos = state.periods[period_idx].insert_pssh_set(Some(candidate));
                        segment.pssh_set = pssh_pos;
                    } else {
                        state.periods[period_idx].increment_pssh_usage(segment.pssh_set);
                    }
                } else if segment.pssh_set == PSSH_SET_CLEAR {
                    // Clear segments count against the sentinel entry.
                    state.periods[period_idx].insert_pssh_set(None);
                }

                new_segments.push(segment);
            }
            _ => {}
        }
    }

    if !is_extm3u {
        return Err(HlsError::MalformedManifest(
            "#EXTM3U tag not found".to_string(),
        ));
    }

    // Checked before the old timeline is freed so a bad reload leaves the
    // previous tree intact.
    if new_segments.is_empty() {
        return Err(HlsError::EmptyTimeline);
    }

    free_segments(&mut state.periods[period_idx], adp_pos, rep_pos);

    let stream_type = state.periods[period_idx].adaptation_sets[adp_pos].stream_type;
    let rep_duration;
    let rep_timescale;
    {
        let rep =
            &mut state.periods[period_idx].adaptation_sets[adp_pos].representations[rep_pos];
        rep.segments = new_segments;
        rep.start_number = start_number;
        if has_init {
            rep.init_segment = Some(init_segment.clone());
        }
        rep_duration = current_pts - rep.segments[0].start_pts;
        rep.duration = rep_duration;
        rep_timescale = rep.timescale;
    }

    state.periods[period_idx].sequence = state.discontinuity_sequence + discont_count as u32;

    let is_vod = !state.has_timeshift_buffer && !state.refresh_playlist;
    let total_time_secs;

    if discont_count > 0 || state.has_discontinuity_sequence {
        if stream_type != StreamType::Subtitle {
            let period_timescale = state.periods[period_idx].timescale;
            state.periods[period_idx].duration = rep_duration * period_timescale / rep_timescale;
        }

        let mut total = 0u64;
        for period in &mut state.periods {
            total += period.duration / period.timescale;
            if is_vod {
                if let Some(rep) = period
                    .adaptation_sets
                    .get_mut(adp_pos)
                    .and_then(|a| a.representations.get_mut(rep_pos))
                {
                    rep.is_downloaded = true;
                }
            }
        }
        total_time_secs = total;
    } else {
        total_time_secs = rep_duration / rep_timescale;
        if is_vod {
            state.periods[period_idx].adaptation_sets[adp_pos].representations[rep_pos]
                .is_downloaded = true;
        }
    }

    if stream_type != StreamType::Subtitle {
        state.total_time_secs = total_time_secs;
    }

    Ok(status)
}
