//! `AudioProcessor`: elementary stream → symphonia → interleaved PCM.
//!
//! The track controller hands the processor one source per playback attempt.
//! Between packets the processor polls its command channel and forwards seeks
//! and stops to the controller, which tears the source down underneath it.

use flume::{Receiver, Sender};
use symphonia::core::{audio::SampleBuffer, errors::Error, io::MediaSource};
use tracing::{Level, debug, info, span, warn};

use crate::{
    audio::demux::{OpenedFormat, open_format},
    common::types::AnyResult,
    sources::gaana::TrackHandle,
};

#[derive(Debug, Clone, PartialEq)]
pub enum DecoderCommand {
    /// Seek to the given position in milliseconds.
    Seek(u64),
    Stop,
}

#[derive(Debug, PartialEq)]
pub enum CommandOutcome {
    Stop,
    Seeked,
    None,
}

/// Consumer of the byte stream produced by one playback attempt.
///
/// `decode` returns once the source reports end of stream or fails; the
/// caller decides whether that was the end of the track or a restart.
pub trait ElementaryDecoder {
    fn decode(&mut self, source: Box<dyn MediaSource>) -> AnyResult<()>;
}

pub struct AudioProcessor {
    pcm_tx: Sender<Vec<i16>>,
    cmd_rx: Receiver<DecoderCommand>,
    control: TrackHandle,
    sample_buf: Option<SampleBuffer<i16>>,
}

impl AudioProcessor {
    pub fn new(pcm_tx: Sender<Vec<i16>>, cmd_rx: Receiver<DecoderCommand>, control: TrackHandle) -> Self {
        Self {
            pcm_tx,
            cmd_rx,
            control,
            sample_buf: None,
        }
    }

    pub fn check_commands(&mut self) -> CommandOutcome {
        match self.cmd_rx.try_recv() {
            Ok(DecoderCommand::Seek(ms)) => {
                self.control.seek(ms);
                self.sample_buf = None;
                CommandOutcome::Seeked
            }
            Ok(DecoderCommand::Stop) | Err(flume::TryRecvError::Disconnected) => {
                self.control.stop();
                CommandOutcome::Stop
            }
            Err(flume::TryRecvError::Empty) => CommandOutcome::None,
        }
    }
}

impl ElementaryDecoder for AudioProcessor {
    fn decode(&mut self, source: Box<dyn MediaSource>) -> AnyResult<()> {
        let _span = span!(Level::DEBUG, "audio_processor").entered();

        let OpenedFormat {
            mut format,
            mut decoder,
            track_id,
            sample_rate,
            channels,
        } = open_format(source, Some("aac"))?;

        info!(
            "AudioProcessor: opened format, {}Hz {}ch",
            sample_rate.unwrap_or_default(),
            channels.unwrap_or_default()
        );
        self.sample_buf = None;

        loop {
            if self.check_commands() != CommandOutcome::None {
                break;
            }

            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf = self
                        .sample_buf
                        .take()
                        .filter(|b| b.capacity() >= decoded.capacity() * spec.channels.count())
                        .unwrap_or_else(|| SampleBuffer::<i16>::new(decoded.capacity() as u64, spec));

                    buf.copy_interleaved_ref(decoded);
                    let samples = buf.samples();

                    if !samples.is_empty() && self.pcm_tx.send(samples.to_vec()).is_err() {
                        debug!("AudioProcessor: PCM receiver dropped, stopping");
                        self.control.stop();
                        return Ok(());
                    }

                    self.sample_buf = Some(buf);
                }
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(Error::DecodeError(e)) => {
                    warn!("Decode error (recoverable): {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Decode loop finished");
        Ok(())
    }
}
