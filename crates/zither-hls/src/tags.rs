//! Line-level M3U syntax: logical lines, tag splitting, attribute lists.

use std::collections::HashMap;

/// One logical line of a playlist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// `#TAG` or `#TAG:value`; `name` includes the leading `#`.
    Tag { name: &'a str, value: &'a str },
    /// Anything not starting with `#`: a segment or child-playlist URI.
    Uri(&'a str),
}

/// Iterator over the non-empty logical lines of a manifest.
pub struct Lines<'a> {
    inner: std::str::Lines<'a>,
}

impl<'a> Lines<'a> {
    pub fn new(data: &'a str) -> Self {
        Self {
            inner: data.lines(),
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.inner.next()?.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('#') {
                let (name, value) = match rest.find(':') {
                    Some(pos) => (&line[..pos + 1], &rest[pos + 1..]),
                    None => (line, ""),
                };
                return Some(Line::Tag { name, value });
            }
            return Some(Line::Uri(line));
        }
    }
}

/// Parse a comma-separated `NAME=VALUE` attribute list.
///
/// Commas inside double-quoted values do not separate; quotes are removed
/// and values trimmed. Duplicate names: last wins. A chunk without `=`
/// terminates parsing.
pub fn parse_attributes(input: &str) -> HashMap<String, String> {
    let mut attribs = HashMap::new();
    let mut offset = 0usize;

    while offset < input.len() {
        let Some(eq) = input[offset..].find('=').map(|p| offset + p) else {
            break;
        };

        let name = input[offset..eq].trim();

        // Value runs to the next comma outside double quotes.
        let mut in_quotes = false;
        let mut end = input.len();
        for (i, c) in input[eq + 1..].char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    end = eq + 1 + i;
                    break;
                }
                _ => {}
            }
        }

        let mut value = input[eq + 1..end].trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = value[1..value.len() - 1].trim();
        }

        attribs.insert(name.to_string(), value.to_string());
        offset = end + 1;
    }

    attribs
}

/// Parse a `WIDTHxHEIGHT` resolution attribute.
pub fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Parse a `length[@offset]` byte-range value.
pub fn parse_byte_range(value: &str) -> Option<(u64, Option<u64>)> {
    match value.split_once('@') {
        Some((len, offset)) => {
            Some((len.trim().parse().ok()?, Some(offset.trim().parse().ok()?)))
        }
        None => Some((value.trim().parse().ok()?, None)),
    }
}

/// Parse the duration of an `EXTINF` value (`duration[,title]`).
pub fn parse_extinf_duration(value: &str) -> Option<f64> {
    let duration = value.split(',').next().unwrap_or(value).trim();
    duration.parse().ok()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn lines_split_tags_and_uris() {
        let mut lines = Lines::new("#EXTM3U\n\n#EXT-X-VERSION:6\r\nsegment0.ts\n");
        assert_eq!(
            lines.next(),
            Some(Line::Tag {
                name: "#EXTM3U",
                value: ""
            })
        );
        assert_eq!(
            lines.next(),
            Some(Line::Tag {
                name: "#EXT-X-VERSION",
                value: "6"
            })
        );
        assert_eq!(lines.next(), Some(Line::Uri("segment0.ts")));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn tag_value_may_contain_colons() {
        let mut lines = Lines::new("#EXT-X-KEY:METHOD=AES-128,URI=\"https://k/1\"");
        assert_eq!(
            lines.next(),
            Some(Line::Tag {
                name: "#EXT-X-KEY",
                value: "METHOD=AES-128,URI=\"https://k/1\""
            })
        );
    }

    #[test]
    fn attributes_preserve_commas_inside_quotes() {
        let attribs = parse_attributes("BANDWIDTH=500000,CODECS=\"avc1.64001f,mp4a.40.2\"");
        assert_eq!(attribs["BANDWIDTH"], "500000");
        assert_eq!(attribs["CODECS"], "avc1.64001f,mp4a.40.2");
    }

    #[test]
    fn attributes_trim_names_and_values() {
        let attribs = parse_attributes("TYPE=AUDIO, GROUP-ID = \" audio \" ,NAME=A");
        assert_eq!(attribs["GROUP-ID"], "audio");
        assert_eq!(attribs["NAME"], "A");
    }

    #[test]
    fn duplicate_attribute_last_wins() {
        let attribs = parse_attributes("A=1,A=2");
        assert_eq!(attribs["A"], "2");
    }

    #[test]
    fn missing_equals_terminates_parsing() {
        let attribs = parse_attributes("A=1,garbage");
        assert_eq!(attribs.len(), 1);
        assert_eq!(attribs["A"], "1");
    }

    #[rstest]
    #[case("640x360", Some((640, 360)))]
    #[case("1920x1080", Some((1920, 1080)))]
    #[case("640", None)]
    #[case("axb", None)]
    fn resolution_values(#[case] value: &str, #[case] expected: Option<(u32, u32)>) {
        assert_eq!(parse_resolution(value), expected);
    }

    #[rstest]
    #[case("1000@0", Some((1000, Some(0))))]
    #[case("1000", Some((1000, None)))]
    #[case("abc", None)]
    fn byte_range_values(#[case] value: &str, #[case] expected: Option<(u64, Option<u64>)>) {
        assert_eq!(parse_byte_range(value), expected);
    }

    #[rstest]
    #[case("10.0,", Some(10.0))]
    #[case("10.0,Title, with commas", Some(10.0))]
    #[case("5", Some(5.0))]
    #[case("", None)]
    fn extinf_durations(#[case] value: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_extinf_duration(value), expected);
    }
}
