//! Codec restriction for session descriptions
//!
//! The offer lists every codec the media engine supports. Before sending it,
//! a media section can be narrowed to a single codec by rewriting the
//! payload-type list of its `m=` line. Only that line changes.

use crate::media::MediaKind;

/// Restrict the first `m=<kind>` section of `sdp` to the payload types
/// whose `a=rtpmap` entry is exactly `codec` (e.g. `VP8/90000`,
/// `opus/48000/2`).
///
/// Returns the input unchanged when the section is missing or no listed
/// payload type maps to `codec`. Line separators are kept as they are.
pub fn filter_codec(kind: MediaKind, codec: &str, sdp: &str) -> String {
    let lines: Vec<&str> = sdp.split_inclusive('\n').collect();
    let header = format!("m={}", kind.as_str());

    let Some(m_index) = lines
        .iter()
        .position(|line| line_body(line).split(' ').next() == Some(header.as_str()))
    else {
        return sdp.to_string();
    };

    let m_line = line_body(lines[m_index]);
    let fields: Vec<&str> = m_line.split(' ').collect();
    if fields.len() < 4 {
        return sdp.to_string();
    }

    let rtpmaps: Vec<(&str, &str)> = lines.iter().filter_map(|line| rtpmap_entry(line)).collect();

    let allowed: Vec<&str> = fields[3..]
        .iter()
        .copied()
        .filter(|pt| {
            rtpmaps
                .iter()
                .any(|(map_pt, map_codec)| map_pt == pt && *map_codec == codec)
        })
        .collect();

    if allowed.is_empty() {
        return sdp.to_string();
    }

    let mut rewritten = fields[..3].join(" ");
    for pt in &allowed {
        rewritten.push(' ');
        rewritten.push_str(pt);
    }
    rewritten.push_str(line_terminator(lines[m_index]));

    let mut out = String::with_capacity(sdp.len());
    for (i, line) in lines.iter().enumerate() {
        if i == m_index {
            out.push_str(&rewritten);
        } else {
            out.push_str(line);
        }
    }
    out
}

/// `(payload type, codec)` of an `a=rtpmap:<pt> <codec>` line
fn rtpmap_entry(line: &str) -> Option<(&str, &str)> {
    let rest = line_body(line).strip_prefix("a=rtpmap:")?;
    let (pt, codec) = rest.split_once(' ')?;
    Some((pt, codec.trim()))
}

fn line_body(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

fn line_terminator(line: &str) -> &str {
    &line[line_body(line).len()..]
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4215775240449105457 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 9 0 8\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtpmap:9 G722/8000\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:102 H264/90000\r\n";

    fn m_line<'a>(sdp: &'a str, kind: &str) -> &'a str {
        sdp.lines()
            .find(|l| l.starts_with(&format!("m={} ", kind)))
            .unwrap()
    }

    #[test]
    fn test_restricts_to_matching_payload_type() {
        let sdp = "v=0\nm=audio 9 UDP/TLS/RTP/SAVPF 9 8\na=rtpmap:9 G722/8000\na=rtpmap:8 PCMA/8000\n";
        let filtered = filter_codec(MediaKind::Audio, "PCMA/8000", sdp);
        assert_eq!(
            filtered,
            "v=0\nm=audio 9 UDP/TLS/RTP/SAVPF 8\na=rtpmap:9 G722/8000\na=rtpmap:8 PCMA/8000\n"
        );
    }

    #[test]
    fn test_other_lines_untouched() {
        let filtered = filter_codec(MediaKind::Video, "H264/90000", OFFER);
        assert_eq!(m_line(&filtered, "video"), "m=video 9 UDP/TLS/RTP/SAVPF 102");

        let before: Vec<&str> = OFFER.split_inclusive('\n').collect();
        let after: Vec<&str> = filtered.split_inclusive('\n').collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            if !b.starts_with("m=video") {
                assert_eq!(b, a);
            }
        }
        assert!(after.iter().all(|l| l.ends_with("\r\n")));
    }

    #[test]
    fn test_kinds_are_independent() {
        let audio = filter_codec(MediaKind::Audio, "opus/48000/2", OFFER);
        assert_eq!(m_line(&audio, "audio"), "m=audio 9 UDP/TLS/RTP/SAVPF 111");
        assert_eq!(m_line(&audio, "video"), m_line(OFFER, "video"));

        let both = filter_codec(MediaKind::Video, "VP8/90000", &audio);
        assert_eq!(m_line(&both, "audio"), "m=audio 9 UDP/TLS/RTP/SAVPF 111");
        assert_eq!(m_line(&both, "video"), "m=video 9 UDP/TLS/RTP/SAVPF 96");
    }

    #[test]
    fn test_codec_not_offered_is_identity() {
        assert_eq!(filter_codec(MediaKind::Video, "AV1/90000", OFFER), OFFER);
        // Clock rate is part of the identifier
        assert_eq!(filter_codec(MediaKind::Audio, "opus/48000", OFFER), OFFER);
    }

    #[test]
    fn test_missing_section_is_identity() {
        let audio_only = "v=0\r\nm=audio 9 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
        assert_eq!(filter_codec(MediaKind::Video, "VP8/90000", audio_only), audio_only);
        assert_eq!(filter_codec(MediaKind::Audio, "PCMU/8000", ""), "");
    }

    #[test]
    fn test_rtpmap_outside_payload_list_ignored() {
        // pt 8 maps to PCMA but is not listed on the audio m-line
        let sdp = "m=audio 9 RTP/AVP 0\na=rtpmap:0 PCMU/8000\na=rtpmap:8 PCMA/8000\n";
        assert_eq!(filter_codec(MediaKind::Audio, "PCMA/8000", sdp), sdp);
    }

    #[test]
    fn test_idempotent() {
        for (kind, codec) in [
            (MediaKind::Audio, "PCMU/8000"),
            (MediaKind::Video, "VP8/90000"),
            (MediaKind::Video, "nope/1"),
        ] {
            let once = filter_codec(kind, codec, OFFER);
            let twice = filter_codec(kind, codec, &once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_unterminated_last_line() {
        let sdp = "m=audio 9 RTP/AVP 0 8\na=rtpmap:0 PCMU/8000\na=rtpmap:8 PCMA/8000";
        let filtered = filter_codec(MediaKind::Audio, "PCMU/8000", sdp);
        assert_eq!(filtered, "m=audio 9 RTP/AVP 0\na=rtpmap:0 PCMU/8000\na=rtpmap:8 PCMA/8000");
    }
}
