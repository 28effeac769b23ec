use super::types::Variant;

const AUDIO_CODECS: [&str; 3] = ["mp4a", "opus", "aac"];

const VIDEO_CODECS: [&str; 12] = [
    "avc1", "hvc1", "hev1", "dvh1", "vp09", "av01", "vp9", "av1", "vp8", "h264", "h265", "mp4v",
];

impl Variant {
    pub fn has_audio(&self) -> bool {
        AUDIO_CODECS.iter().any(|c| self.codecs.contains(c))
    }

    pub fn has_video(&self) -> bool {
        VIDEO_CODECS.iter().any(|c| self.codecs.contains(c))
    }

    /// True when CODECS names an audio codec and no video codec.
    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }
}

/// Picks the variant to stream from a master playlist.
///
/// Priority 1: highest-bandwidth audio-only variant.
/// Priority 2: highest-bandwidth variant carrying any audio codec.
/// Priority 3: the first listed variant.
///
/// Ties on bandwidth go to the variant listed first.
pub fn select_variant(variants: &[Variant]) -> Option<&Variant> {
    best_by_bandwidth(variants, Variant::is_audio_only)
        .or_else(|| best_by_bandwidth(variants, Variant::has_audio))
        .or_else(|| variants.first())
}

fn best_by_bandwidth(variants: &[Variant], accept: impl Fn(&Variant) -> bool) -> Option<&Variant> {
    variants
        .iter()
        .filter(|v| accept(*v))
        .fold(None, |best: Option<&Variant>, v| match best {
            Some(b) if b.bandwidth >= v.bandwidth => Some(b),
            _ => Some(v),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(url: &str, bandwidth: u64, codecs: &str) -> Variant {
        Variant {
            url: url.to_string(),
            bandwidth,
            codecs: codecs.to_string(),
            audio_group: None,
        }
    }

    #[test]
    fn pure_audio_beats_higher_bandwidth_muxed_variant() {
        let variants = vec![
            variant("muxed", 256000, "avc1,mp4a.40.2"),
            variant("audio", 128000, "mp4a.40.2"),
        ];
        assert_eq!(select_variant(&variants).unwrap().url, "audio");
    }

    #[test]
    fn highest_bandwidth_wins_among_audio_only() {
        let variants = vec![
            variant("a64", 64000, "mp4a.40.5"),
            variant("a320", 320000, "mp4a.40.2"),
            variant("opus", 160000, "opus"),
        ];
        assert_eq!(select_variant(&variants).unwrap().url, "a320");
    }

    #[test]
    fn falls_back_to_any_audio_then_first() {
        let muxed = vec![
            variant("v1", 900000, "avc1.4d401f"),
            variant("m1", 500000, "avc1,mp4a.40.2"),
            variant("m2", 700000, "hvc1,mp4a.40.2"),
        ];
        assert_eq!(select_variant(&muxed).unwrap().url, "m2");

        let unknown = vec![variant("x", 100, ""), variant("y", 900, "")];
        assert_eq!(select_variant(&unknown).unwrap().url, "x");

        assert!(select_variant(&[]).is_none());
    }

    #[test]
    fn selection_is_deterministic_on_ties() {
        let variants = vec![
            variant("first", 128000, "mp4a.40.2"),
            variant("second", 128000, "mp4a.40.2"),
        ];
        for _ in 0..10 {
            assert_eq!(select_variant(&variants).unwrap().url, "first");
        }
    }
}
