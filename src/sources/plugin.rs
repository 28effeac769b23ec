use flume::{Receiver, Sender};

use crate::{
  audio::processor::DecoderCommand, common::errors::PlaybackError, sources::gaana::TrackHandle,
};

/// Channels of a track whose decoding runs on its own thread.
pub struct TrackSession {
  /// Interleaved signed 16-bit PCM, one chunk per decoded packet.
  pub pcm: Receiver<Vec<i16>>,
  pub commands: Sender<DecoderCommand>,
  /// Receives at most one event, when playback cannot continue.
  pub failures: Receiver<PlaybackError>,
  pub handle: TrackHandle,
}

pub trait PlayableTrack: Send + Sync {
  fn start_decoding(&self) -> TrackSession;
}
