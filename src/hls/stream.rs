//! Buffered HLS byte stream.
//!
//! A worker thread walks the media playlist, fetching and decrypting one
//! segment at a time into a bounded queue. The reader drains that queue
//! through [`std::io::Read`], so a decoder sees one continuous byte stream.
//!
//! Restarts never mutate a live stream: the owner closes it and opens a new
//! one under the next [`Epoch`]. Anything still tagged with an older epoch is
//! dropped on both sides of the queue.

use std::{
    collections::HashSet,
    io::{self, Read, Seek, SeekFrom},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use symphonia::core::io::MediaSource;
use tracing::{debug, error, trace, warn};

use super::{
    fetcher::{RetryPolicy, SegmentFetcher},
    parser::parse_playlist,
    signal::{Epoch, StopSignal},
    types::{MediaPlaylist, Playlist, Segment},
    variant::select_variant,
};
use crate::common::{errors::HlsError, http::HttpTransport};

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Decrypted segments allowed to wait in the queue.
    pub queue_capacity: usize,
    /// How long a read waits for the next segment before re-checking for the end.
    pub poll_timeout: Duration,
    /// Worker wake-up interval while the queue is full.
    pub throttle_interval: Duration,
    pub key_cache_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            poll_timeout: Duration::from_secs(5),
            throttle_interval: Duration::from_millis(100),
            key_cache_capacity: 20,
            retry: RetryPolicy::default(),
        }
    }
}

/// Narrow upward channel from a stream to whoever owns it.
pub trait StreamEvents: Send + Sync {
    /// The CDN rejected a key, map or segment with 403. `position_ms` is where
    /// playback has to resume after re-resolving the stream URL.
    fn on_authorization_expired(&self, position_ms: u64);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentTag {
    /// `#EXT-X-MAP` data. Never advances the playback position.
    Init,
    Media(u64),
}

#[derive(Clone, Debug)]
pub struct SegmentData {
    pub data: Bytes,
    pub tag: SegmentTag,
    pub epoch: u64,
}

enum QueueItem {
    Segment(SegmentData),
    /// The worker hit a condition it cannot recover from and has exited.
    Abort { epoch: u64, error: HlsError },
}

struct StreamShared {
    stop: Arc<StopSignal>,
    durations: Vec<f64>,
    /// Index of the first segment not yet fully read.
    consumed: AtomicUsize,
    pending_seek: Mutex<Option<u64>>,
    failure: Mutex<Option<HlsError>>,
    /// Receiver clone so `close` can empty the queue from any thread.
    queue: Receiver<QueueItem>,
}

impl StreamShared {
    fn position_ms(&self) -> u64 {
        position_of(&self.durations, self.consumed.load(Ordering::Acquire))
    }

    fn close(&self) {
        self.stop.stop();
        self.queue.drain().for_each(drop);
    }
}

/// Milliseconds covered by the first `consumed` segments. Durations are summed
/// in playlist order and the total is truncated to whole milliseconds; the
/// start-position skip uses the same rule so a reported position always
/// resumes at the segment after the last one read.
fn position_of(durations: &[f64], consumed: usize) -> u64 {
    let end = consumed.min(durations.len());
    let seconds = durations[..end].iter().fold(0.0, |acc, d| acc + d);
    to_millis(seconds)
}

fn to_millis(seconds: f64) -> u64 {
    (seconds * 1000.0) as u64
}

/// Cross-thread control over an [`HlsStream`] that has been handed to a decoder.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    pub fn position_ms(&self) -> u64 {
        self.shared.position_ms()
    }

    /// Records `position_ms` as the restart target and shuts the stream down.
    /// The owner reopens the stream there.
    pub fn seek(&self, position_ms: u64) {
        debug!("HLS: seek to {}ms requested", position_ms);
        *self.shared.pending_seek.lock() = Some(position_ms);
        self.shared.close();
    }

    pub fn pending_seek(&self) -> Option<u64> {
        *self.shared.pending_seek.lock()
    }

    /// Fatal error that ended the stream, if any.
    pub fn failure(&self) -> Option<HlsError> {
        self.shared.failure.lock().clone()
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.stop.is_stopped()
    }

    /// Segments fetched but not yet picked up by the reader.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

struct Chunk {
    data: Bytes,
    pos: usize,
    tag: SegmentTag,
}

pub struct HlsStream {
    shared: Arc<StreamShared>,
    rx: Receiver<QueueItem>,
    current: Option<Chunk>,
    pending_abort: Option<HlsError>,
    epoch: u64,
    epochs: Epoch,
    events: Arc<dyn StreamEvents>,
    poll_timeout: Duration,
    bytes_read: u64,
    media_url: String,
}

impl HlsStream {
    /// Resolves `url` down to a media playlist, skips to `start_ms` and starts
    /// the segment worker under the epoch's current value.
    pub fn open(
        transport: Arc<dyn HttpTransport>,
        url: &str,
        start_ms: u64,
        epochs: Epoch,
        events: Arc<dyn StreamEvents>,
        options: StreamOptions,
    ) -> Result<Self, HlsError> {
        let (media_url, playlist) = resolve_media_playlist(transport.as_ref(), url)?;

        if playlist.segments.is_empty() {
            return Err(HlsError::MalformedPlaylist(
                "media playlist contained no segments".to_string(),
            ));
        }

        let (start_index, processed) = skip_to_position(&playlist.segments, start_ms);

        debug!(
            "HLS: resolved {} segments ({:.1}s, live={}) from {}, starting at segment {} for {}ms",
            playlist.segments.len(),
            playlist.total_duration(),
            playlist.is_live,
            media_url,
            start_index,
            start_ms
        );

        let epoch = epochs.current();
        let capacity = options.queue_capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        let stop = Arc::new(StopSignal::new());

        let shared = Arc::new(StreamShared {
            stop: stop.clone(),
            durations: playlist.segments.iter().map(|s| s.duration).collect(),
            consumed: AtomicUsize::new(start_index),
            pending_seek: Mutex::new(None),
            failure: Mutex::new(None),
            queue: rx.clone(),
        });

        let worker = SegmentWorker {
            fetcher: SegmentFetcher::new(
                transport,
                options.retry.clone(),
                options.key_cache_capacity,
                stop.clone(),
            ),
            segments: playlist.segments,
            start_index,
            processed,
            producer: Producer {
                tx,
                stop,
                epochs: epochs.clone(),
                epoch,
                retry_interval: options.throttle_interval,
            },
            capacity,
        };

        thread::Builder::new()
            .name("gaana-hls".to_string())
            .spawn(move || worker.run())
            .map_err(|e| HlsError::transient(url, format!("failed to start segment worker: {}", e)))?;

        Ok(Self {
            shared,
            rx,
            current: None,
            pending_abort: None,
            epoch,
            epochs,
            events,
            poll_timeout: options.poll_timeout,
            bytes_read: 0,
            media_url,
        })
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            shared: self.shared.clone(),
        }
    }

    /// Elapsed playback time: the summed duration of every fully read segment.
    pub fn position_ms(&self) -> u64 {
        self.shared.position_ms()
    }

    pub fn media_url(&self) -> &str {
        &self.media_url
    }

    pub fn close(&self) {
        self.shared.close();
    }

    fn all_segments_consumed(&self) -> bool {
        self.shared.consumed.load(Ordering::Acquire) >= self.shared.durations.len()
    }

    fn mark_consumed(&self, tag: SegmentTag) {
        if let SegmentTag::Media(_) = tag {
            self.shared.consumed.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Tears the stream down for a worker abort and converts it for the reader.
    fn abort(&mut self, error: HlsError) -> io::Error {
        self.current = None;
        if error.is_authorization_expired() {
            let position = self.position_ms();
            warn!(
                "HLS: authorization expired at {}ms (epoch {}): {}",
                position, self.epoch, error
            );
            self.shared.close();
            self.events.on_authorization_expired(position);
        } else {
            error!("HLS: stream failed: {}", error);
            *self.shared.failure.lock() = Some(error.clone());
            self.shared.close();
        }
        error.into()
    }
}

impl Read for HlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(error) = self.pending_abort.take() {
            return Err(self.abort(error));
        }
        if buf.is_empty() || self.shared.stop.is_stopped() {
            return Ok(0);
        }

        let mut total = 0;
        while total < buf.len() && !self.shared.stop.is_stopped() {
            if let Some(chunk) = self.current.as_mut() {
                let remaining = &chunk.data[chunk.pos..];
                let n = remaining.len().min(buf.len() - total);
                buf[total..total + n].copy_from_slice(&remaining[..n]);
                chunk.pos += n;
                total += n;

                if chunk.pos >= chunk.data.len() {
                    let tag = chunk.tag;
                    self.current = None;
                    self.mark_consumed(tag);
                }
                continue;
            }

            // Hand back what we already have instead of blocking on the network.
            let item = if total > 0 {
                match self.rx.try_recv() {
                    Ok(item) => item,
                    Err(_) => break,
                }
            } else {
                match self.rx.recv_timeout(self.poll_timeout) {
                    Ok(item) => item,
                    Err(RecvTimeoutError::Timeout) => {
                        if self.all_segments_consumed() {
                            break;
                        }
                        trace!("HLS: waiting for segment data");
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            match item {
                QueueItem::Segment(segment) => {
                    if !self.epochs.is_current(segment.epoch) {
                        trace!("HLS: dropping {:?} from epoch {}", segment.tag, segment.epoch);
                        continue;
                    }
                    if segment.data.is_empty() {
                        self.mark_consumed(segment.tag);
                        continue;
                    }
                    self.current = Some(Chunk {
                        data: segment.data,
                        pos: 0,
                        tag: segment.tag,
                    });
                }
                QueueItem::Abort { epoch, error } => {
                    if !self.epochs.is_current(epoch) {
                        continue;
                    }
                    if total > 0 {
                        self.pending_abort = Some(error);
                        break;
                    }
                    return Err(self.abort(error));
                }
            }
        }

        self.bytes_read += total as u64;
        Ok(total)
    }
}

impl Seek for HlsStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.bytes_read),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "HLS streams seek by restarting, not by byte offset",
            )),
        }
    }
}

impl MediaSource for HlsStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

impl Drop for HlsStream {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Fetches `url` and, for a master playlist, follows the selected variant.
/// Returns the media playlist together with the URL it was loaded from.
pub fn resolve_media_playlist(
    transport: &dyn HttpTransport,
    url: &str,
) -> Result<(String, MediaPlaylist), HlsError> {
    match parse_playlist(&fetch_playlist(transport, url)?, url)? {
        Playlist::Media(media) => Ok((url.to_string(), media)),
        Playlist::Master(master) => {
            let variant = select_variant(&master.variants).ok_or_else(|| {
                HlsError::MalformedPlaylist("master playlist has no variants".to_string())
            })?;

            debug!(
                "HLS: selected variant bw={} codecs={:?} audio_only={} url={}",
                variant.bandwidth,
                variant.codecs,
                variant.is_audio_only(),
                variant.url
            );

            match parse_playlist(&fetch_playlist(transport, &variant.url)?, &variant.url)? {
                Playlist::Media(media) => Ok((variant.url.clone(), media)),
                Playlist::Master(_) => Err(HlsError::MalformedPlaylist(
                    "expected media playlist".to_string(),
                )),
            }
        }
    }
}

fn fetch_playlist(transport: &dyn HttpTransport, url: &str) -> Result<String, HlsError> {
    let res = transport
        .get(url)
        .map_err(|e| HlsError::transient(url, e))?;

    if !res.is_success() {
        return Err(HlsError::transient(
            url,
            format!("playlist fetch failed: {}", res.status),
        ));
    }

    Ok(String::from_utf8_lossy(&res.body).into_owned())
}

/// First segment index to play for `start_ms`, plus the sequence numbers of
/// every segment skipped on the way. A position exactly on a boundary starts
/// at the segment beginning there.
fn skip_to_position(segments: &[Segment], start_ms: u64) -> (usize, HashSet<u64>) {
    let mut processed = HashSet::new();
    if start_ms == 0 {
        return (0, processed);
    }

    let mut elapsed = 0.0;
    let mut start_index = 0;

    for (i, segment) in segments.iter().enumerate() {
        elapsed += segment.duration;
        if to_millis(elapsed) > start_ms {
            break;
        }
        processed.insert(segment.sequence);
        start_index = i + 1;
    }

    (start_index, processed)
}

/// Sending half of the queue, bound to one epoch.
struct Producer {
    tx: Sender<QueueItem>,
    stop: Arc<StopSignal>,
    epochs: Epoch,
    epoch: u64,
    retry_interval: Duration,
}

impl Producer {
    fn live(&self) -> bool {
        !self.stop.is_stopped() && self.epochs.is_current(self.epoch)
    }

    /// Blocks while the queue is full. Returns `false` once the stream has
    /// been closed or superseded, in which case nothing was enqueued.
    fn send(&self, mut item: QueueItem) -> bool {
        loop {
            if !self.live() {
                return false;
            }
            match self.tx.send_timeout(item, self.retry_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn segment(&self, data: Bytes, tag: SegmentTag) -> bool {
        self.send(QueueItem::Segment(SegmentData {
            data,
            tag,
            epoch: self.epoch,
        }))
    }

    fn abort(&self, error: HlsError) {
        self.send(QueueItem::Abort {
            epoch: self.epoch,
            error,
        });
    }

    /// Waits while the queue is full so the worker does not race ahead of the reader.
    fn throttle(&self, capacity: usize) {
        while self.live() && self.tx.len() >= capacity {
            self.stop.wait_timeout(self.retry_interval);
        }
    }
}

struct SegmentWorker {
    fetcher: SegmentFetcher,
    segments: Vec<Segment>,
    start_index: usize,
    processed: HashSet<u64>,
    producer: Producer,
    capacity: usize,
}

impl SegmentWorker {
    fn run(self) {
        let SegmentWorker {
            mut fetcher,
            segments,
            start_index,
            mut processed,
            producer,
            capacity,
        } = self;
        let mut last_map: Option<&str> = None;

        for segment in &segments[start_index..] {
            if !producer.live() {
                return;
            }
            if processed.contains(&segment.sequence) {
                continue;
            }

            if let Some(map) = &segment.map {
                if last_map != Some(map.uri.as_str()) {
                    match fetcher.fetch_map(map, segment.key.as_ref()) {
                        Ok(data) => {
                            if !producer.segment(data, SegmentTag::Init) {
                                return;
                            }
                            last_map = Some(map.uri.as_str());
                        }
                        Err(HlsError::Cancelled) => return,
                        Err(e) if e.is_authorization_expired() => {
                            producer.abort(e);
                            return;
                        }
                        Err(e) => warn!("HLS: init segment fetch failed: {}", e),
                    }
                }
            }

            match fetcher.fetch_segment(segment) {
                Ok(data) => {
                    if !producer.segment(data, SegmentTag::Media(segment.sequence)) {
                        return;
                    }
                    processed.insert(segment.sequence);
                }
                Err(HlsError::Cancelled) => return,
                Err(e) => {
                    warn!("HLS: segment {} fetch failed: {}", segment.sequence, e);
                    producer.abort(e);
                    return;
                }
            }

            producer.throttle(capacity);
        }

        debug!("HLS: all segments queued for epoch {}", producer.epoch);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        common::http::mock::{MockTransport, Reply},
        hls::crypto::{derive_iv, encrypt_aes128_cbc},
    };

    const BASE: &str = "https://cdn.test/hls/track/";
    const KEY: [u8; 16] = *b"segment-key-0001";

    #[derive(Default)]
    struct RecordingEvents {
        expired: Mutex<Vec<u64>>,
    }

    impl StreamEvents for RecordingEvents {
        fn on_authorization_expired(&self, position_ms: u64) {
            self.expired.lock().push(position_ms);
        }
    }

    fn url(name: &str) -> String {
        format!("{}{}", BASE, name)
    }

    fn payload(i: usize) -> Vec<u8> {
        vec![0xA0 + i as u8; 32 + 16 * i]
    }

    fn options() -> StreamOptions {
        StreamOptions {
            poll_timeout: Duration::from_secs(2),
            throttle_interval: Duration::from_millis(10),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::ZERO,
            },
            ..StreamOptions::default()
        }
    }

    fn media_playlist(count: usize, header: &str) -> String {
        let mut text = format!("#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n{}", header);
        for i in 0..count {
            text.push_str(&format!("#EXTINF:10.0,\nseg{}.ts\n", i));
        }
        text.push_str("#EXT-X-ENDLIST\n");
        text
    }

    fn plain_transport(count: usize) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.ok(&url("index.m3u8"), media_playlist(count, ""));
        for i in 0..count {
            transport.ok(&url(&format!("seg{}.ts", i)), payload(i));
        }
        transport
    }

    /// Plain segments with the given EXTINF values, written as they would
    /// appear in a real playlist.
    fn timed_transport(durations: &[&str]) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        let mut text = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:11\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for (i, duration) in durations.iter().enumerate() {
            text.push_str(&format!("#EXTINF:{},\nseg{}.ts\n", duration, i));
            transport.ok(&url(&format!("seg{}.ts", i)), payload(i));
        }
        text.push_str("#EXT-X-ENDLIST\n");
        transport.ok(&url("index.m3u8"), text);
        transport
    }

    fn open(transport: &Arc<MockTransport>, start_ms: u64) -> (HlsStream, Arc<RecordingEvents>) {
        let events = Arc::new(RecordingEvents::default());
        let stream = HlsStream::open(
            transport.clone(),
            &url("index.m3u8"),
            start_ms,
            Epoch::new(),
            events.clone(),
            options(),
        )
        .expect("stream should open");
        (stream, events)
    }

    fn read_n(stream: &mut HlsStream, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = stream.read(&mut out[filled..]).expect("read should succeed");
            assert!(read > 0, "unexpected end of stream");
            filled += read;
        }
        out
    }

    fn read_all(stream: &mut HlsStream) -> (Vec<u8>, Option<io::Error>) {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return (out, None),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) => return (out, Some(e)),
            }
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn delivers_segments_in_order_and_tracks_position() {
        let transport = plain_transport(3);
        let (mut stream, _) = open(&transport, 0);

        for i in 0..3 {
            assert_eq!(stream.position_ms(), 10_000 * i as u64);
            assert_eq!(read_n(&mut stream, payload(i).len()), payload(i));
        }
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.position_ms(), 30_000);
    }

    #[test]
    fn start_position_inside_segment_begins_at_that_segment() {
        let transport = plain_transport(3);
        let (mut stream, _) = open(&transport, 15_000);

        assert_eq!(stream.position_ms(), 10_000);
        let (data, err) = read_all(&mut stream);
        assert!(err.is_none());
        assert_eq!(data, [payload(1), payload(2)].concat());
        assert_eq!(transport.count(&url("seg0.ts")), 0);
    }

    #[test]
    fn start_position_on_boundary_selects_following_segment() {
        let transport = plain_transport(3);
        let (mut stream, _) = open(&transport, 20_000);

        assert_eq!(stream.position_ms(), 20_000);
        let (data, _) = read_all(&mut stream);
        assert_eq!(data, payload(2));
    }

    #[test]
    fn master_playlist_resolves_to_audio_variant() {
        let transport = Arc::new(MockTransport::new());
        transport.ok(
            &url("master.m3u8"),
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=256000,CODECS=\"avc1,mp4a.40.2\"\n\
             video/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=128000,CODECS=\"mp4a.40.2\"\n\
             audio/index.m3u8\n",
        );
        transport.ok(&url("audio/index.m3u8"), "#EXTM3U\n#EXTINF:10,\na.ts\n#EXT-X-ENDLIST\n");
        transport.ok(&url("audio/a.ts"), &b"audio-only"[..]);

        let stream = HlsStream::open(
            transport.clone(),
            &url("master.m3u8"),
            0,
            Epoch::new(),
            Arc::new(RecordingEvents::default()),
            options(),
        )
        .unwrap();
        assert_eq!(stream.media_url(), url("audio/index.m3u8"));

        let mut stream = stream;
        assert_eq!(read_all(&mut stream).0, b"audio-only");
        assert_eq!(transport.count(&url("video/index.m3u8")), 0);
    }

    #[test]
    fn empty_or_unparseable_playlist_fails_to_open() {
        let transport = Arc::new(MockTransport::new());
        transport.ok(&url("index.m3u8"), "#EXTM3U\n#EXT-X-ENDLIST\n");
        let events: Arc<dyn StreamEvents> = Arc::new(RecordingEvents::default());

        let err = HlsStream::open(transport.clone(), &url("index.m3u8"), 0, Epoch::new(), events.clone(), options())
            .err()
            .unwrap();
        assert!(matches!(err, HlsError::MalformedPlaylist(_)));

        let err = HlsStream::open(transport.clone(), &url("missing.m3u8"), 0, Epoch::new(), events, options())
            .err()
            .unwrap();
        assert!(matches!(err, HlsError::TransientFetch { .. }));
    }

    #[test]
    fn map_precedes_media_and_is_not_counted() {
        let transport = Arc::new(MockTransport::new());
        transport.ok(
            &url("index.m3u8"),
            "#EXTM3U\n\
             #EXT-X-MAP:URI=\"init-a.mp4\"\n\
             #EXTINF:10,\nseg0.ts\n\
             #EXTINF:10,\nseg1.ts\n\
             #EXT-X-MAP:URI=\"init-b.mp4\"\n\
             #EXTINF:10,\nseg2.ts\n\
             #EXT-X-ENDLIST\n",
        );
        transport.ok(&url("init-a.mp4"), &b"INIT-A"[..]);
        transport.ok(&url("init-b.mp4"), &b"INIT-B"[..]);
        for i in 0..3 {
            transport.ok(&url(&format!("seg{}.ts", i)), payload(i));
        }

        let (mut stream, _) = open(&transport, 0);
        assert_eq!(read_n(&mut stream, 6), b"INIT-A");
        assert_eq!(stream.position_ms(), 0);

        let (rest, err) = read_all(&mut stream);
        assert!(err.is_none());
        let expected = [payload(0), payload(1), b"INIT-B".to_vec(), payload(2)].concat();
        assert_eq!(rest, expected);
        assert_eq!(transport.count(&url("init-a.mp4")), 1);
        assert_eq!(stream.position_ms(), 30_000);
    }

    #[test]
    fn encrypted_segments_are_decrypted() {
        let transport = Arc::new(MockTransport::new());
        transport.ok(
            &url("index.m3u8"),
            media_playlist(2, "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n"),
        );
        transport.ok(&url("key.bin"), KEY.to_vec());
        for i in 0..2 {
            let enc = encrypt_aes128_cbc(&payload(i), &KEY, &derive_iv(i as u64));
            transport.ok(&url(&format!("seg{}.ts", i)), enc);
        }

        let (mut stream, _) = open(&transport, 0);
        assert_eq!(read_all(&mut stream).0, [payload(0), payload(1)].concat());
        assert_eq!(transport.count(&url("key.bin")), 1);
    }

    #[test]
    fn expiry_drains_earlier_segments_then_reports_position() {
        let transport = plain_transport(3);
        transport.script(&url("seg1.ts"), vec![Reply::Status(403, Bytes::new())]);

        let (mut stream, events) = open(&transport, 0);
        let handle = stream.handle();
        let (data, err) = read_all(&mut stream);

        assert_eq!(data, payload(0));
        assert_eq!(err.expect("stream should abort").kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(*events.expired.lock(), vec![10_000]);
        assert!(handle.is_closed());
        assert!(handle.failure().is_none());
        assert_eq!(stream.read(&mut [0u8; 8]).unwrap(), 0);
        assert_eq!(transport.count(&url("seg2.ts")), 0);
    }

    #[test]
    fn exhausted_retries_fail_the_stream() {
        let transport = plain_transport(2);
        transport.script(&url("seg1.ts"), vec![Reply::Status(502, Bytes::new())]);

        let (mut stream, events) = open(&transport, 0);
        let handle = stream.handle();
        let (data, err) = read_all(&mut stream);

        assert_eq!(data, payload(0));
        assert_eq!(err.expect("stream should fail").kind(), io::ErrorKind::Other);
        assert!(matches!(handle.failure(), Some(HlsError::TransientFetch { .. })));
        assert!(events.expired.lock().is_empty());
        assert_eq!(transport.count(&url("seg1.ts")), 3);
    }

    #[test]
    fn transient_failures_recover_without_duplicates() {
        let transport = plain_transport(2);
        transport.script(
            &url("seg0.ts"),
            vec![
                Reply::Unreachable,
                Reply::Unreachable,
                Reply::Status(200, Bytes::from(payload(0))),
            ],
        );

        let (mut stream, _) = open(&transport, 0);
        let (data, err) = read_all(&mut stream);
        assert!(err.is_none());
        assert_eq!(data, [payload(0), payload(1)].concat());
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let transport = plain_transport(12);
        let (mut stream, _) = open(&transport, 0);
        let handle = stream.handle();

        wait_until(|| handle.queued() == 5);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(handle.queued(), 5);

        let fetched = transport
            .requests()
            .iter()
            .filter(|u| u.ends_with(".ts"))
            .count();
        assert!(fetched <= 6, "worker fetched {} segments ahead", fetched);

        let (data, _) = read_all(&mut stream);
        assert_eq!(data.len(), (0..12).map(|i| payload(i).len()).sum::<usize>());
    }

    #[test]
    fn seek_closes_stream_and_records_target() {
        let transport = plain_transport(3);
        let (mut stream, _) = open(&transport, 0);
        let handle = stream.handle();

        read_n(&mut stream, 4);
        handle.seek(25_000);

        assert_eq!(handle.pending_seek(), Some(25_000));
        assert!(handle.is_closed());
        assert_eq!(stream.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn stale_epoch_data_is_discarded() {
        let transport = plain_transport(3);
        let epochs = Epoch::new();
        let mut stream = HlsStream::open(
            transport.clone(),
            &url("index.m3u8"),
            0,
            epochs.clone(),
            Arc::new(RecordingEvents::default()),
            options(),
        )
        .unwrap();
        let handle = stream.handle();

        wait_until(|| handle.queued() > 0);
        epochs.advance();

        let (data, err) = read_all(&mut stream);
        assert!(data.is_empty());
        assert!(err.is_none());
        assert_eq!(stream.position_ms(), 0);
    }

    #[test]
    fn skip_marks_skipped_sequences() {
        let segments: Vec<Segment> = (0..4)
            .map(|i| Segment {
                url: format!("s{}.ts", i),
                duration: 4.0,
                key: None,
                map: None,
                sequence: 100 + i,
                discontinuity: false,
            })
            .collect();

        let (index, processed) = skip_to_position(&segments, 8_000);
        assert_eq!(index, 2);
        assert_eq!(processed, HashSet::from([100, 101]));

        assert_eq!(skip_to_position(&segments, 7_999).0, 1);
        assert_eq!(skip_to_position(&segments, 0).0, 0);
        assert_eq!(skip_to_position(&segments, 60_000).0, 4);
        assert_eq!(position_of(&[4.0, 4.0, 4.0, 4.0], 3), 12_000);
    }

    fn timed_segments(durations: &[f64]) -> Vec<Segment> {
        durations
            .iter()
            .enumerate()
            .map(|(i, &duration)| Segment {
                url: format!("s{}.ts", i),
                duration,
                key: None,
                map: None,
                sequence: i as u64,
                discontinuity: false,
            })
            .collect()
    }

    #[test]
    fn reported_position_resumes_after_last_read_segment() {
        for duration in [10.005333, 9.96, 9.984, 4.2, 0.1] {
            let durations = vec![duration; 60];
            let segments = timed_segments(&durations);
            for consumed in 0..=durations.len() {
                let position = position_of(&durations, consumed);
                assert_eq!(
                    skip_to_position(&segments, position).0,
                    consumed,
                    "duration {} after {} segments ({}ms)",
                    duration,
                    consumed,
                    position
                );
            }
        }

        let mixed = [0.1, 0.2, 0.3, 0.4];
        let segments = timed_segments(&mixed);
        assert_eq!(position_of(&mixed, 2), 300);
        assert_eq!(skip_to_position(&segments, 300).0, 2);
        assert_eq!(skip_to_position(&segments, 299).0, 1);
    }

    #[test]
    fn position_truncates_to_whole_milliseconds() {
        assert_eq!(position_of(&[10.005333], 1), 10_005);
        assert_eq!(position_of(&[10.005333, 10.005333], 2), 20_010);
        assert_eq!(position_of(&[0.0999], 1), 99);
    }

    #[test]
    fn start_position_with_fractional_durations_begins_at_covering_segment() {
        let transport = timed_transport(&["10.005333", "10.005333", "10.005333"]);

        let (mut stream, _) = open(&transport, 10_004);
        assert_eq!(stream.position_ms(), 0);
        assert_eq!(read_all(&mut stream).0, [payload(0), payload(1), payload(2)].concat());

        let (mut stream, _) = open(&transport, 10_005);
        assert_eq!(stream.position_ms(), 10_005);
        assert_eq!(read_all(&mut stream).0, [payload(1), payload(2)].concat());

        let (mut stream, _) = open(&transport, 20_010);
        assert_eq!(stream.position_ms(), 20_010);
        assert_eq!(read_all(&mut stream).0, payload(2));
    }

    #[test]
    fn expiry_with_fractional_durations_reopens_at_failed_segment() {
        let transport = timed_transport(&["0.1", "0.2", "0.3", "0.4"]);
        transport.script(
            &url("seg2.ts"),
            vec![Reply::Status(403, Bytes::new()), Reply::Status(200, Bytes::from(payload(2)))],
        );

        let (mut stream, events) = open(&transport, 0);
        let (data, err) = read_all(&mut stream);
        assert_eq!(data, [payload(0), payload(1)].concat());
        assert!(err.is_some());
        let expired_at = events.expired.lock()[0];
        assert_eq!(expired_at, 300);

        let (mut resumed, _) = open(&transport, expired_at);
        assert_eq!(resumed.position_ms(), 300);
        assert_eq!(read_all(&mut resumed).0, [payload(2), payload(3)].concat());
        assert_eq!(transport.count(&url("seg1.ts")), 1);
    }
}
