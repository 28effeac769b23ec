use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use url::Url;

use crate::common::errors::HlsError;

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z0-9-]+)=(?:"([^"]*)"|([^,]*))"#).expect("attribute regex is valid")
});

/// Parses the `KEY=VALUE` list of a tag line. Keys are lower-cased; quoted
/// values may contain commas.
pub fn parse_attributes(line: &str) -> HashMap<String, String> {
    let list = line.split_once(':').map(|(_, rest)| rest).unwrap_or(line);

    ATTRIBUTE_RE
        .captures_iter(list)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str().trim();
            Some((key, value.to_string()))
        })
        .collect()
}

/// Resolves `reference` against the URL the playlist was fetched from.
pub fn resolve_url(base: &str, reference: &str) -> Result<String, HlsError> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Ok(reference.to_string());
    }

    let base = Url::parse(base)
        .map_err(|e| HlsError::MalformedPlaylist(format!("invalid base url {}: {}", base, e)))?;
    base.join(reference)
        .map(String::from)
        .map_err(|e| HlsError::MalformedPlaylist(format!("invalid uri {}: {}", reference, e)))
}

/// Decodes a `0x`-prefixed IV attribute into exactly 16 bytes.
pub fn parse_iv(value: &str) -> Result<[u8; 16], HlsError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| HlsError::MalformedPlaylist(format!("IV without 0x prefix: {}", value)))?;

    let bytes = hex::decode(digits)
        .map_err(|e| HlsError::MalformedPlaylist(format!("invalid IV {}: {}", value, e)))?;

    <[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| {
        HlsError::MalformedPlaylist(format!("IV must be 16 bytes, got {}", bytes.len()))
    })
}

/// Value of a `#TAG:value` line, trimmed.
pub fn tag_value<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.strip_prefix(tag).map(str::trim)
}
