pub mod crypto;
pub mod fetcher;
pub mod parser;
pub mod signal;
pub mod stream;
pub mod ts_demux;
pub mod types;
pub mod utils;
pub mod variant;

pub use fetcher::{RetryPolicy, SegmentFetcher};
pub use parser::parse_playlist;
pub use signal::{Epoch, StopSignal};
pub use stream::{HlsStream, StreamEvents, StreamHandle, StreamOptions};
pub use ts_demux::ElementaryStream;
pub use types::{KeyInfo, MapInfo, MasterPlaylist, MediaPlaylist, Playlist, Segment, Variant};
pub use variant::select_variant;
