//! Master playlist parsing: one initial period with the video adaptation
//! set, alternate audio/subtitle groups, and session-level keys.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use url::Url;
use zither_drm::Decrypter;

use crate::{
    encryption::{EncryptionType, KeyState},
    error::{HlsError, HlsResult},
    model::{AdaptationSet, ContainerType, Period, Representation, StreamType},
    options::HlsOptions,
    tags::{parse_attributes, parse_resolution, Line, Lines},
};

/// Buffered `EXT-X-MEDIA` renditions of one `GROUP-ID`, waiting for the
/// group codec supplied by the video `EXT-X-STREAM-INF`.
#[derive(Default)]
struct ExtGroup {
    codecs: String,
    adaptation_sets: Vec<AdaptationSet>,
}

impl ExtGroup {
    fn set_codecs(&mut self, codecs: &str) {
        if !self.codecs.is_empty() {
            return;
        }
        self.codecs = codecs.to_string();
        for set in &mut self.adaptation_sets {
            for rep in &mut set.representations {
                if rep.codecs.is_empty() {
                    rep.add_codecs(codecs);
                }
            }
        }
    }
}

/// Audio-codec selection from a `CODECS` attribute list. Unreliable by
/// nature (the attribute is optional and may be partial); the demuxer is
/// the real authority.
fn audio_codec_from_list(codecs: &str) -> &'static str {
    if codecs.contains("ec-3") {
        "ec-3"
    } else if codecs.contains("ac-3") {
        "ac-3"
    } else {
        "aac"
    }
}

fn audio_codec_from_representation(rep: &Representation) -> &'static str {
    if rep.contains_codec("ec-3") {
        "ec-3"
    } else if rep.contains_codec("ac-3") {
        "ac-3"
    } else {
        "aac"
    }
}

fn new_representation(options: &HlsOptions) -> Representation {
    Representation {
        assured_buffer_duration: options.assured_buffer_duration,
        max_buffer_duration: options.max_buffer_duration,
        ..Default::default()
    }
}

/// Parse a master playlist into the initial [`Period`].
///
/// `manifest_url` is the effective (post-redirect) master URL; all
/// relative URIs resolve against it. Session-key state folds into
/// `key_state` without materializing a PSSH set.
pub(crate) fn parse_master_playlist(
    data: &str,
    manifest_url: &Url,
    options: &HlsOptions,
    key_state: &mut KeyState,
    decrypter: &dyn Decrypter,
) -> HlsResult<Period> {
    let mut period = Period::new();
    let mut groups: BTreeMap<String, ExtGroup> = BTreeMap::new();
    let mut is_extm3u = false;
    let mut create_dummy_audio = false;

    let mut lines = Lines::new(data).peekable();

    while let Some(line) = lines.next() {
        if !is_extm3u {
            if matches!(line, Line::Tag { name: "#EXTM3U", .. }) {
                is_extm3u = true;
            }
            continue;
        }

        let Line::Tag { name, value } = line else {
            continue;
        };

        match name {
            "#EXT-X-MEDIA" => {
                let attribs = parse_attributes(value);

                let stream_type = match attribs.get("TYPE").map(String::as_str) {
                    Some("AUDIO") => StreamType::Audio,
                    Some("SUBTITLES") => StreamType::Subtitle,
                    _ => continue,
                };

                let group_id = attribs.get("GROUP-ID").cloned().unwrap_or_default();
                let group = groups.entry(group_id).or_default();

                let mut set = AdaptationSet::new(stream_type);
                set.language = attribs
                    .get("LANGUAGE")
                    .filter(|l| !l.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "unk".to_string());
                set.name = attribs.get("NAME").cloned().unwrap_or_default();
                set.is_default = attribs.get("DEFAULT").map(String::as_str) == Some("YES");
                set.is_forced = attribs.get("FORCED").map(String::as_str) == Some("YES");

                let mut rep = new_representation(options);
                rep.add_codecs(&group.codecs);

                if let Some(uri) = attribs.get("URI") {
                    let Ok(source) = manifest_url.join(uri) else {
                        warn!(uri, "skipping EXT-X-MEDIA with unresolvable URI");
                        continue;
                    };
                    rep.source_url = Some(source);

                    if stream_type == StreamType::Subtitle {
                        // default to WebVTT
                        rep.add_codecs("wvtt");
                    }
                } else {
                    rep.is_included_stream = true;
                    period.included_stream_mask |= stream_type.mask_bit();
                }

                if stream_type == StreamType::Audio {
                    rep.audio_channels = attribs
                        .get("CHANNELS")
                        .and_then(|c| c.parse().ok())
                        .unwrap_or(2);
                }

                set.representations.push(rep);
                group.adaptation_sets.push(set);
            }
            "#EXT-X-STREAM-INF" => {
                let attribs = parse_attributes(value);

                let Some(bandwidth) = attribs.get("BANDWIDTH") else {
                    warn!(
                        tag_value = value,
                        "skipping EXT-X-STREAM-INF with missing BANDWIDTH attribute"
                    );
                    continue;
                };

                if period.adaptation_sets.is_empty() {
                    period
                        .adaptation_sets
                        .push(AdaptationSet::new(StreamType::Video));
                }

                let mut rep = new_representation(options);

                match attribs.get("CODECS") {
                    Some(codecs) => rep.add_codecs(codecs),
                    None => {
                        debug!("missing CODECS attribute, fallback to h264");
                        rep.add_codecs("h264");
                    }
                }

                rep.bandwidth = bandwidth.parse().unwrap_or(0);
                rep.resolution = attribs
                    .get("RESOLUTION")
                    .and_then(|r| parse_resolution(r));

                if let Some(audio_group) = attribs.get("AUDIO") {
                    let codec = audio_codec_from_list(
                        attribs.get("CODECS").map(String::as_str).unwrap_or(""),
                    );
                    groups
                        .entry(audio_group.clone())
                        .or_default()
                        .set_codecs(codec);
                } else {
                    // No alternate audio group: assume audio is muxed in.
                    period.included_stream_mask |= StreamType::Audio.mask_bit();
                    create_dummy_audio = true;
                }

                if let Some(frame_rate) = attribs.get("FRAME-RATE") {
                    let mut rate: f64 = frame_rate.parse().unwrap_or(0.0);
                    if rate == 0.0 {
                        warn!("wrong FRAME-RATE attribute, fallback to 60 fps");
                        rate = 60.0;
                    }
                    rep.frame_rate = (rate * 1000.0) as u32;
                    rep.frame_rate_scale = 1000;
                }

                // The next line carries the child playlist URL.
                if let Some(Line::Uri(uri)) = lines.peek().copied() {
                    lines.next();
                    let Ok(source) = manifest_url.join(uri) else {
                        warn!(uri, "skipping variant with unresolvable URI");
                        continue;
                    };

                    let set = &mut period.adaptation_sets[0];
                    let duplicate = set
                        .representations
                        .iter()
                        .any(|r| r.source_url.as_ref() == Some(&source));
                    if !duplicate {
                        rep.source_url = Some(source);
                        set.representations.push(rep);
                    }
                }
            }
            "#EXTINF" => {
                // Not a multi-bitrate playlist: the manifest itself is the
                // single rendition.
                let mut set = AdaptationSet::new(StreamType::Video);
                let mut rep = new_representation(options);
                rep.source_url = Some(manifest_url.clone());
                set.representations.push(rep);
                period.adaptation_sets.push(set);

                period.included_stream_mask |= StreamType::Audio.mask_bit();
                create_dummy_audio = true;
                break;
            }
            "#EXT-X-SESSION-KEY" => {
                let attribs = parse_attributes(value);
                match key_state.process(manifest_url, &attribs, decrypter) {
                    EncryptionType::NotSupported => {
                        return Err(HlsError::UnsupportedEncryption(
                            "session key format not supported".to_string(),
                        ));
                    }
                    EncryptionType::Unknown => {
                        warn!("unknown encryption type");
                    }
                    // Session keys prepare DRM without loading a child
                    // playlist; the serial workflow takes no action here.
                    _ => {}
                }
            }
            _ => {}
        }
    }

    if !is_extm3u {
        return Err(HlsError::MalformedManifest(
            "#EXTM3U tag not found".to_string(),
        ));
    }

    if create_dummy_audio {
        let mut set = AdaptationSet::new(StreamType::Audio);
        set.container_type = ContainerType::Mp4;
        set.language = "unk".to_string();

        let mut rep = new_representation(options);
        let codec = period
            .adaptation_sets
            .first()
            .and_then(|s| s.representations.first())
            .map(audio_codec_from_representation)
            .unwrap_or("aac");
        rep.add_codecs(codec);
        rep.audio_channels = 2;
        rep.is_included_stream = true;

        set.representations.push(rep);
        period.adaptation_sets.push(set);
    }

    for group in groups.into_values() {
        period.adaptation_sets.extend(group.adaptation_sets);
    }

    Ok(period)
}
