use std::{sync::Arc, thread};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::resolver::{GaanaStreamResolver, MediaUrlResolver};
use crate::{
  audio::processor::{AudioProcessor, DecoderCommand, ElementaryDecoder},
  common::{
    errors::{PlaybackError, Severity},
    http::HttpTransport,
  },
  configs::GaanaConfig,
  hls::{ElementaryStream, Epoch, HlsStream, StreamEvents, StreamHandle, StreamOptions},
  sources::plugin::{PlayableTrack, TrackSession},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartCause {
  Seek(u64),
  Expired(u64),
}

impl RestartCause {
  fn position_ms(self) -> u64 {
    match self {
      Self::Seek(ms) | Self::Expired(ms) => ms,
    }
  }
}

enum TrackState {
  Resolving,
  Streaming { url: String },
  Restarting(RestartCause),
  Done,
  Failed(PlaybackError),
}

#[derive(Default)]
struct ControlState {
  stream: Option<StreamHandle>,
  pending_seek: Option<u64>,
  expired_at: Option<u64>,
  stopped: bool,
  last_position: u64,
}

/// State shared between the playback thread and every [`TrackHandle`].
#[derive(Default)]
struct TrackControl {
  state: Mutex<ControlState>,
  epoch: Epoch,
}

impl TrackControl {
  /// Makes `stream` the live one. Returns `false` if playback was stopped
  /// in the meantime. A seek that arrived while the stream was being built
  /// closes it straight away.
  fn attach(&self, stream: StreamHandle) -> bool {
    let mut state = self.state.lock();
    if state.stopped {
      stream.close();
      return false;
    }
    if state.pending_seek.is_some() {
      stream.close();
    }
    state.stream = Some(stream);
    true
  }

  fn detach(&self) -> Option<StreamHandle> {
    let mut state = self.state.lock();
    let stream = state.stream.take();
    if let Some(stream) = &stream {
      state.last_position = stream.position_ms();
    }
    stream
  }

  /// A pending seek wins over an expiry noticed in the same attempt.
  fn take_restart(&self) -> Option<RestartCause> {
    let mut state = self.state.lock();
    let cause = match (state.pending_seek.take(), state.expired_at.take()) {
      (Some(ms), _) => RestartCause::Seek(ms),
      (None, Some(ms)) => RestartCause::Expired(ms),
      (None, None) => return None,
    };
    state.last_position = cause.position_ms();
    Some(cause)
  }

  fn is_stopped(&self) -> bool {
    self.state.lock().stopped
  }
}

impl StreamEvents for TrackControl {
  fn on_authorization_expired(&self, position_ms: u64) {
    let mut state = self.state.lock();
    state.expired_at = Some(position_ms);
    state.last_position = position_ms;
  }
}

/// Remote control for a playing [`GaanaTrack`]. Cheap to clone.
#[derive(Clone, Default)]
pub struct TrackHandle {
  control: Arc<TrackControl>,
}

impl TrackHandle {
  /// Restarts playback at `position_ms`.
  pub fn seek(&self, position_ms: u64) {
    let stream = {
      let mut state = self.control.state.lock();
      if state.stopped {
        return;
      }
      state.pending_seek = Some(position_ms);
      state.stream.clone()
    };
    if let Some(stream) = stream {
      stream.seek(position_ms);
    }
  }

  pub fn stop(&self) {
    let stream = {
      let mut state = self.control.state.lock();
      state.stopped = true;
      state.stream.clone()
    };
    if let Some(stream) = stream {
      stream.close();
    }
  }

  pub fn is_stopped(&self) -> bool {
    self.control.is_stopped()
  }

  /// Live position of the current stream, or the restart target while the
  /// pipeline is being rebuilt.
  pub fn position_ms(&self) -> u64 {
    let state = self.control.state.lock();
    if let Some(ms) = state.pending_seek.or(state.expired_at) {
      return ms;
    }
    state
      .stream
      .as_ref()
      .map_or(state.last_position, StreamHandle::position_ms)
  }

  /// Restart generation; advances on every seek or expiry restart.
  pub fn epoch(&self) -> u64 {
    self.control.epoch.current()
  }
}

/// One Gaana track played over HLS.
///
/// Clones share the same [`TrackHandle`].
#[derive(Clone)]
pub struct GaanaTrack {
  track_id: String,
  resolver: Arc<dyn MediaUrlResolver>,
  transport: Arc<dyn HttpTransport>,
  options: StreamOptions,
  start_position_ms: u64,
  control: Arc<TrackControl>,
}

impl GaanaTrack {
  pub fn new(
    track_id: impl Into<String>,
    resolver: Arc<dyn MediaUrlResolver>,
    transport: Arc<dyn HttpTransport>,
    options: StreamOptions,
  ) -> Self {
    Self {
      track_id: track_id.into(),
      resolver,
      transport,
      options,
      start_position_ms: 0,
      control: Arc::new(TrackControl::default()),
    }
  }

  /// Track resolved through the stream-url API configured in `config`.
  pub fn from_config(
    track_id: impl Into<String>,
    transport: Arc<dyn HttpTransport>,
    config: &GaanaConfig,
  ) -> Self {
    let resolver = Arc::new(GaanaStreamResolver::new(transport.clone(), config));
    Self::new(track_id, resolver, transport, StreamOptions::from(&config.hls))
  }

  pub fn with_start_position(mut self, position_ms: u64) -> Self {
    self.start_position_ms = position_ms;
    self.control.state.lock().last_position = position_ms;
    self
  }

  pub fn track_id(&self) -> &str {
    &self.track_id
  }

  pub fn handle(&self) -> TrackHandle {
    TrackHandle {
      control: self.control.clone(),
    }
  }

  /// Plays the track into `decoder`, restarting the whole pipeline on every
  /// seek or authorization expiry. Blocks until the track ends, is stopped,
  /// or fails.
  pub fn play(&self, decoder: &mut dyn ElementaryDecoder) -> Result<(), PlaybackError> {
    let mut position = self.start_position_ms;
    let mut state = TrackState::Resolving;

    loop {
      state = match state {
        TrackState::Resolving => self.resolve(),
        TrackState::Streaming { url } => self.stream(&url, position, decoder),
        TrackState::Restarting(cause) => {
          position = cause.position_ms();
          let epoch = self.control.epoch.advance();
          info!(
            "Gaana: restarting {} at {}ms ({:?}, epoch {})",
            self.track_id, position, cause, epoch
          );
          TrackState::Resolving
        }
        TrackState::Done => {
          debug!("Gaana: playback of {} finished", self.track_id);
          return Ok(());
        }
        TrackState::Failed(err) => {
          error!("Gaana: playback of {} failed: {}", self.track_id, err);
          return Err(err);
        }
      };
    }
  }

  fn resolve(&self) -> TrackState {
    if self.control.is_stopped() {
      return TrackState::Done;
    }
    match self.resolver.resolve(&self.track_id) {
      Ok(url) => TrackState::Streaming { url },
      Err(e) => match self.control.take_restart() {
        Some(cause) => TrackState::Restarting(cause),
        None => TrackState::Failed(e.into()),
      },
    }
  }

  fn stream(&self, url: &str, position: u64, decoder: &mut dyn ElementaryDecoder) -> TrackState {
    let stream = match HlsStream::open(
      self.transport.clone(),
      url,
      position,
      self.control.epoch.clone(),
      self.control.clone(),
      self.options.clone(),
    ) {
      Ok(stream) => stream,
      Err(e) => {
        return match self.control.take_restart() {
          Some(cause) => TrackState::Restarting(cause),
          None => TrackState::Failed(e.into()),
        };
      }
    };

    if !self.control.attach(stream.handle()) {
      return TrackState::Done;
    }

    let result = decoder.decode(Box::new(ElementaryStream::new(stream)));
    let handle = self.control.detach();

    if self.control.is_stopped() {
      return TrackState::Done;
    }
    if let Some(cause) = self.control.take_restart() {
      return TrackState::Restarting(cause);
    }
    if let Some(failure) = handle.and_then(|h| h.failure()) {
      return TrackState::Failed(failure.into());
    }

    match result {
      Ok(()) => TrackState::Done,
      Err(e) => TrackState::Failed(PlaybackError::playback_failed(e)),
    }
  }
}

impl PlayableTrack for GaanaTrack {
  fn start_decoding(&self) -> TrackSession {
    let (pcm_tx, pcm_rx) = flume::bounded::<Vec<i16>>(64);
    let (cmd_tx, cmd_rx) = flume::unbounded::<DecoderCommand>();
    let (fail_tx, fail_rx) = flume::bounded::<PlaybackError>(1);

    let track = self.clone();
    let failures = fail_tx.clone();
    let spawned = thread::Builder::new()
      .name(format!("gaana-track-{}", self.track_id))
      .spawn(move || {
        let mut processor = AudioProcessor::new(pcm_tx, cmd_rx, track.handle());
        if let Err(e) = track.play(&mut processor) {
          let _ = fail_tx.send(e);
        }
      });

    if let Err(e) = spawned {
      let _ = failures.send(PlaybackError::new(
        Severity::Fault,
        format!("failed to start playback thread: {}", e),
        Some(Box::new(e)),
      ));
    }

    TrackSession {
      pcm: pcm_rx,
      commands: cmd_tx,
      failures: fail_rx,
      handle: self.handle(),
    }
  }
}
