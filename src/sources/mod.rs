pub mod gaana;
pub mod plugin;

pub use plugin::{PlayableTrack, TrackSession};
