//! Streaming MPEG-TS demuxer that unwraps the audio elementary stream.
//!
//! Packets are 188 bytes: a 4-byte header, an optional adaptation field and
//! the payload. PAT → PMT gives the audio PID; PES headers on that PID are
//! stripped so the output is a plain ADTS (or MPEG audio) byte stream.
//!
//! Input that does not start with a sync byte is passed through untouched.

use std::io::{self, Read, Seek, SeekFrom};

use symphonia::core::io::MediaSource;
use tracing::{debug, trace};

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;

const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
const STREAM_TYPE_AAC: u8 = 0x0F; // ISO/IEC 13818-7 ADTS
const STREAM_TYPE_AAC_LATM: u8 = 0x11; // ISO/IEC 14496-3 LATM

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Framing {
  TransportStream,
  Raw,
}

pub struct ElementaryStream<R> {
  inner: R,
  framing: Option<Framing>,
  packet: [u8; TS_PACKET_SIZE],
  /// First packet's sync byte was consumed while sniffing.
  synced: bool,
  out: Vec<u8>,
  out_pos: usize,
  pmt_pid: Option<u16>,
  audio_pid: Option<u16>,
}

impl<R: Read> ElementaryStream<R> {
  pub fn new(inner: R) -> Self {
    Self {
      inner,
      framing: None,
      packet: [0; TS_PACKET_SIZE],
      synced: false,
      out: Vec::with_capacity(TS_PACKET_SIZE),
      out_pos: 0,
      pmt_pid: None,
      audio_pid: None,
    }
  }

  pub fn audio_pid(&self) -> Option<u16> {
    self.audio_pid
  }

  fn sniff(&mut self) -> io::Result<bool> {
    let mut first = [0u8; 1];
    if !read_full(&mut self.inner, &mut first)? {
      return Ok(false);
    }

    if first[0] == TS_SYNC_BYTE {
      debug!("TS: transport stream detected, demuxing audio");
      self.framing = Some(Framing::TransportStream);
      self.synced = true;
    } else {
      debug!("TS: no sync byte, passing stream through");
      self.framing = Some(Framing::Raw);
      self.out.push(first[0]);
    }
    Ok(true)
  }

  /// Reads the next whole packet into `self.packet`, skipping garbage
  /// until a sync byte. `false` at end of input.
  fn next_packet(&mut self) -> io::Result<bool> {
    if !self.synced {
      let mut byte = [0u8; 1];
      let mut skipped = 0usize;
      loop {
        if !read_full(&mut self.inner, &mut byte)? {
          return Ok(false);
        }
        if byte[0] == TS_SYNC_BYTE {
          break;
        }
        skipped += 1;
      }
      if skipped > 0 {
        trace!("TS: resynced after {} bytes", skipped);
      }
    }
    self.synced = false;
    self.packet[0] = TS_SYNC_BYTE;
    read_full(&mut self.inner, &mut self.packet[1..])
  }

  fn demux_packet(&mut self) {
    let packet = &self.packet;
    let transport_error = (packet[1] & 0x80) != 0;
    let unit_start = (packet[1] & 0x40) != 0;
    let pid = ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16;
    let adaptation_field_control = (packet[3] >> 4) & 0x03;

    // 0b00 is reserved and 0b10 carries no payload.
    if transport_error || adaptation_field_control & 0x01 == 0 {
      return;
    }

    let mut payload_offset = 4;
    if adaptation_field_control == 3 {
      payload_offset += 1 + packet[4] as usize;
    }
    if payload_offset >= TS_PACKET_SIZE {
      return;
    }
    let payload = &packet[payload_offset..];

    if pid == PAT_PID {
      if let Some(pmt) = parse_pat(payload, unit_start) {
        self.pmt_pid = Some(pmt);
      }
    } else if Some(pid) == self.pmt_pid {
      if let Some(audio) = parse_pmt(payload, unit_start) {
        if self.audio_pid != Some(audio) {
          debug!("TS: audio elementary stream on PID {:#x}", audio);
        }
        self.audio_pid = Some(audio);
      }
    } else if Some(pid) == self.audio_pid {
      extract_pes_payload(payload, unit_start, &mut self.out);
    }
  }
}

impl<R: Read> Read for ElementaryStream<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }

    loop {
      if self.out_pos < self.out.len() {
        let n = (self.out.len() - self.out_pos).min(buf.len());
        buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        return Ok(n);
      }
      self.out.clear();
      self.out_pos = 0;

      match self.framing {
        None => {
          if !self.sniff()? {
            return Ok(0);
          }
        }
        Some(Framing::Raw) => return self.inner.read(buf),
        Some(Framing::TransportStream) => {
          if !self.next_packet()? {
            return Ok(0);
          }
          self.demux_packet();
        }
      }
    }
  }
}

impl<R: Read> Seek for ElementaryStream<R> {
  fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
    Err(io::Error::new(
      io::ErrorKind::Unsupported,
      "elementary stream is not seekable",
    ))
  }
}

impl<R: Read + Send + Sync> MediaSource for ElementaryStream<R> {
  fn is_seekable(&self) -> bool {
    false
  }

  fn byte_len(&self) -> Option<u64> {
    None
  }
}

/// Fills `buf` completely. `false` if the input ended first.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
  let mut filled = 0;
  while filled < buf.len() {
    match reader.read(&mut buf[filled..]) {
      Ok(0) => return Ok(false),
      Ok(n) => filled += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
      Err(e) => return Err(e),
    }
  }
  Ok(true)
}

/// Start of a PSI section, skipping the pointer field on unit starts.
fn psi_section(payload: &[u8], unit_start: bool) -> Option<&[u8]> {
  if !unit_start {
    return Some(payload);
  }
  let pointer = *payload.first()? as usize;
  payload.get(1 + pointer..).filter(|s| !s.is_empty())
}

/// Returns the PMT PID of the first real program.
fn parse_pat(payload: &[u8], unit_start: bool) -> Option<u16> {
  let data = psi_section(payload, unit_start)?;
  if data.len() < 8 {
    return None;
  }

  let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
  // Program loop runs up to the trailing CRC32.
  let entries_end = (3 + section_length).saturating_sub(4).min(data.len());

  data[8..entries_end.max(8)]
    .chunks_exact(4)
    .find_map(|entry| {
      let program_number = ((entry[0] as u16) << 8) | entry[1] as u16;
      let pid = ((entry[2] as u16 & 0x1F) << 8) | entry[3] as u16;
      (program_number != 0).then_some(pid)
    })
}

/// Returns the PID of the first audio elementary stream in the program.
fn parse_pmt(payload: &[u8], unit_start: bool) -> Option<u16> {
  let data = psi_section(payload, unit_start)?;
  if data.len() < 12 {
    return None;
  }

  let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
  let program_info_length = ((data[10] as usize & 0x0F) << 8) | data[11] as usize;
  let section_end = (3 + section_length).saturating_sub(4).min(data.len());

  let mut pos = 12 + program_info_length;
  while pos + 5 <= section_end {
    let stream_type = data[pos];
    let elementary_pid = ((data[pos + 1] as u16 & 0x1F) << 8) | data[pos + 2] as u16;
    let es_info_length = ((data[pos + 3] as usize & 0x0F) << 8) | data[pos + 4] as usize;

    if matches!(
      stream_type,
      STREAM_TYPE_AAC | STREAM_TYPE_AAC_LATM | STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO
    ) {
      return Some(elementary_pid);
    }

    pos += 5 + es_info_length;
  }

  None
}

fn extract_pes_payload(payload: &[u8], unit_start: bool, out: &mut Vec<u8>) {
  if !unit_start {
    out.extend_from_slice(payload);
    return;
  }

  if payload.len() < 9 {
    return;
  }

  if payload[..3] != [0x00, 0x00, 0x01] {
    out.extend_from_slice(payload);
    return;
  }

  // start_code(3) + stream_id(1) + length(2) + flags(2) + header_data_length(1)
  let header_size = 9 + payload[8] as usize;
  if let Some(data) = payload.get(header_size..) {
    out.extend_from_slice(data);
  }
}
