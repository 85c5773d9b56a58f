//! Tree data model: periods, adaptation sets, representations, segments,
//! and the per-period PSSH table.
//!
//! Back-references are arena indices: the tree owns the period vector,
//! each period owns its adaptation sets and PSSH sets, each adaptation
//! set owns its representations. A representation is addressed by
//! [`RepAddress`].

use std::time::Duration;

use url::Url;

/// "Unset" presentation timestamp.
pub const NO_PTS_VALUE: u64 = u64::MAX;
/// "Unset" byte-range bound.
pub const NO_RANGE_VALUE: u64 = u64::MAX;
/// "Unset" segment number.
pub const SEGMENT_NO_NUMBER: u64 = u64::MAX;
/// Index of the clear-content sentinel in every period's PSSH table.
pub const PSSH_SET_CLEAR: u16 = 0;

/// Default timescale in ticks per second.
pub const DEFAULT_TIMESCALE: u64 = 1_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StreamType {
    #[default]
    NoType,
    Video,
    Audio,
    Subtitle,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::NoType => "notype",
            StreamType::Video => "video",
            StreamType::Audio => "audio",
            StreamType::Subtitle => "subtitle",
        }
    }

    /// Bit for [`Period::included_stream_mask`].
    pub fn mask_bit(&self) -> u32 {
        1 << (*self as u32)
    }

    fn sort_rank(&self) -> u8 {
        match self {
            StreamType::Video => 0,
            StreamType::Audio => 1,
            StreamType::Subtitle => 2,
            StreamType::NoType => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerType {
    #[default]
    NoType,
    Invalid,
    Ts,
    Adts,
    Mp4,
    Text,
}

/// Container detection from a media URL's file extension.
pub fn container_type_from_extension(extension: &str) -> ContainerType {
    match extension.to_ascii_lowercase().as_str() {
        "ts" => ContainerType::Ts,
        "aac" => ContainerType::Adts,
        "mp4" => ContainerType::Mp4,
        "vtt" | "webvtt" => ContainerType::Text,
        _ => ContainerType::Invalid,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncryptionState {
    #[default]
    Unencrypted,
    /// Encrypted with a system this engine cannot serve; opaque payload.
    Encrypted,
    /// Encrypted and servable (Widevine).
    EncryptedSupported,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CryptoMode {
    #[default]
    None,
    AesCtr,
    AesCbc,
}

/// Addresses one representation inside the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepAddress {
    pub period: usize,
    pub adaptation_set: usize,
    pub representation: usize,
}

/// One media chunk: URL or byte range, PTS window, PSSH reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub url: Option<Url>,
    pub start_pts: u64,
    pub duration: u64,
    pub pssh_set: u16,
    /// Absolute byte offsets; `NO_RANGE_VALUE` when the segment is
    /// addressed by URL alone.
    pub range_begin: u64,
    pub range_end: u64,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            url: None,
            start_pts: NO_PTS_VALUE,
            duration: 0,
            pssh_set: PSSH_SET_CLEAR,
            range_begin: NO_RANGE_VALUE,
            range_end: NO_RANGE_VALUE,
        }
    }
}

impl Segment {
    pub fn has_byte_range(&self) -> bool {
        self.range_begin != NO_RANGE_VALUE
    }
}

/// One entry in a period's encryption table.
///
/// `pssh` is the resolved key URI for AES-128 and the base64 PSSH payload
/// for Widevine. `default_kid` is empty until resolved; the byte string
/// `b"0"` marks an unresolvable key (segments pass through as zeros).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PsshSet {
    pub pssh: String,
    pub default_kid: Vec<u8>,
    pub iv: Option<[u8; 16]>,
    pub stream_type: StreamType,
    pub adaptation_set: Option<usize>,
    pub crypto_mode: CryptoMode,
    pub usage_count: u32,
}

impl PsshSet {
    /// Interning comparator: ignores the usage count, and ignores the
    /// default KID when it is empty on either side (the KID may be
    /// resolved later by the decrypter path).
    fn matches(&self, other: &PsshSet) -> bool {
        if self.pssh != other.pssh
            || self.iv != other.iv
            || self.stream_type != other.stream_type
            || self.adaptation_set != other.adaptation_set
        {
            return false;
        }
        if self.default_kid.is_empty() || other.default_kid.is_empty() {
            return true;
        }
        self.default_kid == other.default_kid
    }
}

/// One rendition at a specific bandwidth/resolution.
#[derive(Clone, Debug)]
pub struct Representation {
    /// Child-playlist URL.
    pub source_url: Option<Url>,
    /// Media URL of a single-URL byte-range playlist.
    pub url: Option<Url>,
    pub bandwidth: u32,
    pub codecs: Vec<String>,
    pub resolution: Option<(u32, u32)>,
    /// Frame rate as `rate / rate_scale` frames per second.
    pub frame_rate: u32,
    pub frame_rate_scale: u32,
    pub audio_channels: u32,
    pub timescale: u64,
    pub container_type: ContainerType,
    pub assured_buffer_duration: Duration,
    pub max_buffer_duration: Duration,
    pub start_number: u64,
    pub init_segment: Option<Segment>,
    pub segments: Vec<Segment>,
    /// Position of the consumer's current segment in `segments`.
    pub current_segment: Option<usize>,
    /// Total duration in `timescale` ticks.
    pub duration: u64,
    pub pssh_set: u16,
    /// Muxed into the video stream; has no own playlist.
    pub is_included_stream: bool,
    /// VOD timeline fully parsed; never re-fetched.
    pub is_downloaded: bool,
    /// Selected for playback; refreshed while live.
    pub is_enabled: bool,
    /// Consumer ran out of segments and waits for the next reload.
    pub is_waiting_for_segment: bool,
}

impl Default for Representation {
    fn default() -> Self {
        Self {
            source_url: None,
            url: None,
            bandwidth: 0,
            codecs: Vec::new(),
            resolution: None,
            frame_rate: 0,
            frame_rate_scale: 1,
            audio_channels: 0,
            timescale: DEFAULT_TIMESCALE,
            container_type: ContainerType::NoType,
            assured_buffer_duration: Duration::ZERO,
            max_buffer_duration: Duration::ZERO,
            start_number: 0,
            init_segment: None,
            segments: Vec::new(),
            current_segment: None,
            duration: 0,
            pssh_set: PSSH_SET_CLEAR,
            is_included_stream: false,
            is_downloaded: false,
            is_enabled: false,
            is_waiting_for_segment: false,
        }
    }
}

impl Representation {
    pub fn add_codecs(&mut self, codecs: &str) {
        for codec in codecs.split(',') {
            let codec = codec.trim();
            if !codec.is_empty() {
                self.codecs.push(codec.to_string());
            }
        }
    }

    pub fn contains_codec(&self, name: &str) -> bool {
        self.codecs.iter().any(|c| c.contains(name))
    }

    /// Segment number of the consumer's current segment, or
    /// [`SEGMENT_NO_NUMBER`].
    pub fn current_segment_number(&self) -> u64 {
        self.current_segment
            .map(|pos| self.start_number + pos as u64)
            .unwrap_or(SEGMENT_NO_NUMBER)
    }

    /// Whether a segment after the current one exists in the timeline.
    /// With no current segment, any segment counts.
    pub fn has_next_segment(&self) -> bool {
        match self.current_segment {
            Some(pos) => pos + 1 < self.segments.len(),
            None => !self.segments.is_empty(),
        }
    }

    pub fn segment_by_number(&self, number: u64) -> Option<&Segment> {
        if number < self.start_number {
            return None;
        }
        self.segments.get((number - self.start_number) as usize)
    }

    /// Copy of this representation without any timeline state, used when
    /// a discontinuity forks a new period.
    pub fn structural_clone(&self) -> Representation {
        Representation {
            source_url: self.source_url.clone(),
            url: None,
            bandwidth: self.bandwidth,
            codecs: self.codecs.clone(),
            resolution: self.resolution,
            frame_rate: self.frame_rate,
            frame_rate_scale: self.frame_rate_scale,
            audio_channels: self.audio_channels,
            timescale: self.timescale,
            container_type: self.container_type,
            assured_buffer_duration: self.assured_buffer_duration,
            max_buffer_duration: self.max_buffer_duration,
            start_number: 0,
            init_segment: None,
            segments: Vec::new(),
            current_segment: None,
            duration: 0,
            pssh_set: PSSH_SET_CLEAR,
            is_included_stream: self.is_included_stream,
            is_downloaded: false,
            is_enabled: self.is_enabled,
            is_waiting_for_segment: false,
        }
    }
}

/// A group of interchangeable representations of one stream type.
#[derive(Clone, Debug, Default)]
pub struct AdaptationSet {
    pub stream_type: StreamType,
    pub language: String,
    pub name: String,
    pub is_default: bool,
    pub is_forced: bool,
    pub container_type: ContainerType,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            ..Default::default()
        }
    }

    fn structural_clone(&self) -> AdaptationSet {
        AdaptationSet {
            stream_type: self.stream_type,
            language: self.language.clone(),
            name: self.name.clone(),
            is_default: self.is_default,
            is_forced: self.is_forced,
            container_type: self.container_type,
            representations: self
                .representations
                .iter()
                .map(Representation::structural_clone)
                .collect(),
        }
    }
}

/// A contiguous timeline segment between discontinuities.
#[derive(Clone, Debug)]
pub struct Period {
    pub adaptation_sets: Vec<AdaptationSet>,
    /// Encryption table; index 0 is the clear sentinel.
    pub pssh_sets: Vec<PsshSet>,
    pub timescale: u64,
    pub start: u64,
    pub start_pts: u64,
    pub duration: u64,
    /// Discontinuity sequence of this period.
    pub sequence: u32,
    pub encryption_state: EncryptionState,
    /// Stream types muxed into the video stream.
    pub included_stream_mask: u32,
}

impl Default for Period {
    fn default() -> Self {
        Self {
            adaptation_sets: Vec::new(),
            pssh_sets: vec![PsshSet::default()],
            timescale: DEFAULT_TIMESCALE,
            start: 0,
            start_pts: 0,
            duration: 0,
            sequence: 0,
            encryption_state: EncryptionState::Unencrypted,
            included_stream_mask: 0,
        }
    }
}

impl Period {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `candidate` into the PSSH table and bump its usage count.
    ///
    /// `None` bumps the clear sentinel. An existing entry that matches
    /// (see [`PsshSet`] comparator) is reused; if its usage count is
    /// zero its fields are replaced by the candidate's.
    pub fn insert_pssh_set(&mut self, candidate: Option<PsshSet>) -> u16 {
        let Some(candidate) = candidate else {
            self.pssh_sets[0].usage_count += 1;
            return PSSH_SET_CLEAR;
        };

        let found = self
            .pssh_sets
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, existing)| existing.matches(&candidate))
            .map(|(index, _)| index);

        let index = match found {
            Some(index) => {
                // An interned entry nothing references anymore may be
                // replaced by the fresher candidate.
                if self.pssh_sets[index].usage_count == 0 {
                    self.pssh_sets[index] = candidate;
                }
                index
            }
            None => {
                self.pssh_sets.push(candidate);
                self.pssh_sets.len() - 1
            }
        };

        self.pssh_sets[index].usage_count += 1;
        index as u16
    }

    pub fn increment_pssh_usage(&mut self, index: u16) {
        if let Some(set) = self.pssh_sets.get_mut(index as usize) {
            set.usage_count += 1;
        }
    }

    pub fn decrement_pssh_usage(&mut self, index: u16) {
        if let Some(set) = self.pssh_sets.get_mut(index as usize) {
            set.usage_count = set.usage_count.saturating_sub(1);
        }
    }

    /// Drop every representation referencing the PSSH set at `index`.
    pub fn remove_pssh_set(&mut self, index: u16) {
        for adaptation_set in &mut self.adaptation_sets {
            adaptation_set
                .representations
                .retain(|rep| rep.pssh_set != index);
        }
    }

    /// Copy of this period's skeleton: adaptation sets and
    /// representations replicated, timelines and PSSH table reset.
    pub fn structural_clone(&self) -> Period {
        Period {
            adaptation_sets: self
                .adaptation_sets
                .iter()
                .map(AdaptationSet::structural_clone)
                .collect(),
            pssh_sets: vec![PsshSet::default()],
            timescale: self.timescale,
            start: self.start,
            start_pts: self.start_pts,
            duration: self.duration,
            sequence: 0,
            encryption_state: self.encryption_state,
            included_stream_mask: self.included_stream_mask,
        }
    }

    /// Order adaptation sets video < audio < subtitle and representations
    /// by ascending bandwidth (both stable).
    pub fn sort(&mut self) {
        self.adaptation_sets
            .sort_by_key(|set| set.stream_type.sort_rank());
        for set in &mut self.adaptation_sets {
            set.representations.sort_by_key(|rep| rep.bandwidth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widevine_set(pssh: &str, kid: &[u8]) -> PsshSet {
        PsshSet {
            pssh: pssh.to_string(),
            default_kid: kid.to_vec(),
            iv: None,
            stream_type: StreamType::Video,
            adaptation_set: Some(0),
            crypto_mode: CryptoMode::AesCtr,
            usage_count: 0,
        }
    }

    #[test]
    fn sentinel_insert_bumps_position_zero() {
        let mut period = Period::new();
        assert_eq!(period.insert_pssh_set(None), PSSH_SET_CLEAR);
        assert_eq!(period.insert_pssh_set(None), PSSH_SET_CLEAR);
        assert_eq!(period.pssh_sets[0].usage_count, 2);
        assert_eq!(period.pssh_sets.len(), 1);
    }

    #[test]
    fn interning_reuses_matching_entry() {
        let mut period = Period::new();
        let first = period.insert_pssh_set(Some(widevine_set("AAAA", b"kid0")));
        let second = period.insert_pssh_set(Some(widevine_set("AAAA", b"kid0")));
        assert_eq!(first, second);
        assert_eq!(period.pssh_sets[first as usize].usage_count, 2);
        assert_eq!(period.pssh_sets.len(), 2);
    }

    #[test]
    fn interning_matches_when_one_kid_is_empty() {
        let mut period = Period::new();
        let first = period.insert_pssh_set(Some(widevine_set("AAAA", b"")));
        let second = period.insert_pssh_set(Some(widevine_set("AAAA", b"kid0")));
        assert_eq!(first, second);
    }

    #[test]
    fn interning_replaces_unused_entry() {
        let mut period = Period::new();
        let index = period.insert_pssh_set(Some(widevine_set("AAAA", b"kid0")));
        period.decrement_pssh_usage(index);
        assert_eq!(period.pssh_sets[index as usize].usage_count, 0);

        let again = period.insert_pssh_set(Some(widevine_set("AAAA", b"kid1")));
        // kid0 vs kid1 both non-empty: no match, new entry appended.
        assert_ne!(index, again);
        assert_eq!(period.pssh_sets.len(), 3);
    }

    #[test]
    fn distinct_pssh_gets_new_index() {
        let mut period = Period::new();
        let first = period.insert_pssh_set(Some(widevine_set("AAAA", b"")));
        let second = period.insert_pssh_set(Some(widevine_set("BBBB", b"")));
        assert_ne!(first, second);
        assert_eq!(period.pssh_sets.len(), 3);
    }

    #[test]
    fn remove_pssh_set_drops_referencing_representations() {
        let mut period = Period::new();
        let index = period.insert_pssh_set(Some(widevine_set("AAAA", b"")));

        let mut set = AdaptationSet::new(StreamType::Video);
        let mut protected = Representation::default();
        protected.pssh_set = index;
        set.representations.push(protected);
        set.representations.push(Representation::default());
        period.adaptation_sets.push(set);

        period.remove_pssh_set(index);
        assert_eq!(period.adaptation_sets[0].representations.len(), 1);
        assert_eq!(
            period.adaptation_sets[0].representations[0].pssh_set,
            PSSH_SET_CLEAR
        );
    }

    #[test]
    fn structural_clone_resets_timelines() {
        let mut period = Period::new();
        let mut set = AdaptationSet::new(StreamType::Video);
        let mut rep = Representation::default();
        rep.bandwidth = 500_000;
        rep.add_codecs("avc1.64001f,mp4a.40.2");
        rep.segments.push(Segment::default());
        rep.start_number = 10;
        rep.duration = 99;
        set.representations.push(rep);
        period.adaptation_sets.push(set);
        period.insert_pssh_set(Some(widevine_set("AAAA", b"")));
        period.duration = 42;

        let clone = period.structural_clone();
        let cloned_rep = &clone.adaptation_sets[0].representations[0];
        assert_eq!(cloned_rep.bandwidth, 500_000);
        assert_eq!(cloned_rep.codecs.len(), 2);
        assert!(cloned_rep.segments.is_empty());
        assert_eq!(cloned_rep.start_number, 0);
        assert_eq!(clone.pssh_sets.len(), 1);
        assert_eq!(clone.duration, 42);
    }

    #[test]
    fn sort_orders_types_and_bandwidths() {
        let mut period = Period::new();
        period
            .adaptation_sets
            .push(AdaptationSet::new(StreamType::Subtitle));
        period
            .adaptation_sets
            .push(AdaptationSet::new(StreamType::Audio));
        let mut video = AdaptationSet::new(StreamType::Video);
        let mut high = Representation::default();
        high.bandwidth = 2_000_000;
        let mut low = Representation::default();
        low.bandwidth = 500_000;
        video.representations.push(high);
        video.representations.push(low);
        period.adaptation_sets.push(video);

        period.sort();
        assert_eq!(period.adaptation_sets[0].stream_type, StreamType::Video);
        assert_eq!(period.adaptation_sets[1].stream_type, StreamType::Audio);
        assert_eq!(period.adaptation_sets[2].stream_type, StreamType::Subtitle);
        assert_eq!(
            period.adaptation_sets[0].representations[0].bandwidth,
            500_000
        );
    }
}
