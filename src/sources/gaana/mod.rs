//! Gaana playback: stream-url resolution and the HLS track controller.

pub mod crypto;
pub mod resolver;
pub mod track;

pub use resolver::{GaanaStreamResolver, MediaUrlResolver};
pub use track::{GaanaTrack, TrackHandle};
