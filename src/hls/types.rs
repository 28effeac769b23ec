/// Encryption state announced by `#EXT-X-KEY`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInfo {
    /// `AES-128` in practice. `NONE` never reaches a segment; the parser drops it.
    pub method: String,
    pub uri: Option<String>,
    /// Explicit IV. When absent the IV is derived from the segment's sequence number.
    pub iv: Option<[u8; 16]>,
}

impl KeyInfo {
    pub fn is_encrypted(&self) -> bool {
        !self.method.eq_ignore_ascii_case("NONE")
    }
}

/// Initialization segment (`#EXT-X-MAP`) emitted once before the media that uses it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapInfo {
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub url: String,
    /// Seconds, from `#EXTINF`.
    pub duration: f64,
    pub key: Option<KeyInfo>,
    pub map: Option<MapInfo>,
    pub sequence: u64,
    pub discontinuity: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    pub url: String,
    pub bandwidth: u64,
    pub codecs: String,
    /// AUDIO group identifier
    pub audio_group: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MasterPlaylist {
    /// Highest bandwidth first.
    pub variants: Vec<Variant>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaPlaylist {
    pub segments: Vec<Segment>,
    pub media_sequence: u64,
    pub target_duration: Option<f64>,
    /// No `#EXT-X-ENDLIST` seen.
    pub is_live: bool,
}

impl MediaPlaylist {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}
