use super::{
    types::{KeyInfo, MapInfo, MasterPlaylist, MediaPlaylist, Playlist, Segment, Variant},
    utils::{parse_attributes, parse_iv, resolve_url, tag_value},
};
use crate::common::errors::HlsError;

const STREAM_INF: &str = "#EXT-X-STREAM-INF";
const EXTINF: &str = "#EXTINF:";
const KEY: &str = "#EXT-X-KEY:";
const MAP: &str = "#EXT-X-MAP:";
const DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";
const MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE:";
const TARGET_DURATION: &str = "#EXT-X-TARGETDURATION:";
const ENDLIST: &str = "#EXT-X-ENDLIST";

/// Parses playlist text fetched from `base_url`.
///
/// A `#EXT-X-STREAM-INF` tag anywhere makes it a master playlist; everything
/// else is treated as a media playlist.
pub fn parse_playlist(text: &str, base_url: &str) -> Result<Playlist, HlsError> {
    if !text.contains("#EXT") {
        return Err(HlsError::MalformedPlaylist(
            "no HLS tags found".to_string(),
        ));
    }

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.iter().any(|l| l.starts_with(STREAM_INF)) {
        parse_master(&lines, base_url).map(Playlist::Master)
    } else {
        parse_media(&lines, base_url).map(Playlist::Media)
    }
}

/// Index of the first URI line after `from`, skipping tags and comments.
fn next_uri_line(lines: &[&str], from: usize) -> Option<usize> {
    (from..lines.len()).find(|&j| !lines[j].starts_with('#'))
}

fn parse_master(lines: &[&str], base_url: &str) -> Result<MasterPlaylist, HlsError> {
    let mut variants = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !lines[i].starts_with(STREAM_INF) {
            i += 1;
            continue;
        }

        let attrs = parse_attributes(lines[i]);
        let Some(j) = next_uri_line(lines, i + 1) else {
            break;
        };

        variants.push(Variant {
            url: resolve_url(base_url, lines[j])?,
            bandwidth: attrs
                .get("bandwidth")
                .and_then(|b| b.parse().ok())
                .unwrap_or(0),
            codecs: attrs.get("codecs").cloned().unwrap_or_default(),
            audio_group: attrs.get("audio").cloned(),
        });
        i = j + 1;
    }

    // Stable sort: equal bandwidths keep their playlist order.
    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
    Ok(MasterPlaylist { variants })
}

fn parse_media(lines: &[&str], base_url: &str) -> Result<MediaPlaylist, HlsError> {
    let media_sequence = lines
        .iter()
        .find_map(|l| tag_value(l, MEDIA_SEQUENCE))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let target_duration = lines
        .iter()
        .find_map(|l| tag_value(l, TARGET_DURATION))
        .and_then(|v| v.parse::<f64>().ok());

    let is_live = !lines.iter().any(|l| l.starts_with(ENDLIST));

    let mut segments = Vec::new();
    let mut current_key: Option<KeyInfo> = None;
    let mut current_map: Option<MapInfo> = None;
    let mut pending_discontinuity = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with(DISCONTINUITY) {
            pending_discontinuity = true;
        } else if line.starts_with(KEY) {
            current_key = parse_key(line, base_url)?;
        } else if line.starts_with(MAP) {
            current_map = parse_map(line, base_url)?;
        } else if let Some(rest) = line.strip_prefix(EXTINF) {
            let duration = rest
                .split(',')
                .next()
                .and_then(|d| d.trim().parse::<f64>().ok())
                .unwrap_or(0.0);

            let Some(j) = next_uri_line(lines, i + 1) else {
                break;
            };

            segments.push(Segment {
                url: resolve_url(base_url, lines[j])?,
                duration,
                key: current_key.clone(),
                map: current_map.clone(),
                sequence: media_sequence + segments.len() as u64,
                discontinuity: pending_discontinuity,
            });
            pending_discontinuity = false;
            i = j;
        }
        i += 1;
    }

    Ok(MediaPlaylist {
        segments,
        media_sequence,
        target_duration,
        is_live,
    })
}

fn parse_key(line: &str, base_url: &str) -> Result<Option<KeyInfo>, HlsError> {
    let attrs = parse_attributes(line);
    let method = attrs
        .get("method")
        .cloned()
        .unwrap_or_else(|| "NONE".to_string());

    if method.eq_ignore_ascii_case("NONE") {
        return Ok(None);
    }

    let uri = attrs
        .get("uri")
        .map(|u| resolve_url(base_url, u))
        .transpose()?;

    let iv = attrs.get("iv").map(|v| parse_iv(v)).transpose()?;

    Ok(Some(KeyInfo { method, uri, iv }))
}

fn parse_map(line: &str, base_url: &str) -> Result<Option<MapInfo>, HlsError> {
    let attrs = parse_attributes(line);
    attrs
        .get("uri")
        .map(|u| resolve_url(base_url, u).map(|uri| MapInfo { uri }))
        .transpose()
}
