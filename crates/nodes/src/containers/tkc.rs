// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! TKC: the native TransKit container.
//!
//! Layout (little endian):
//!
//! ```text
//! "TKC1" | table_len u32 | stream table (JSON array of StreamDescriptor)
//! { 'P' | stream u32 | flags u8 | pts i64 | dts i64 | duration i64 | len u32 | payload }*
//! 'E'
//! "TKIX" | count u32 | { stream u32 | pts i64 | offset u64 }*      key-frame index
//! index_offset u64 | "TKFT"                                          footer
//! ```
//!
//! The index and footer are written when the writer is finalized. Sources
//! without them (truncated files, non-seekable inputs) are scanned instead.

use bytes::{BufMut, Bytes, BytesMut};
use super::{bytes_written_counter, read_full};
use opentelemetry::{metrics::Counter, KeyValue};
use std::io::{self, Read, SeekFrom, Write};
use transkit_core::container::{ContainerWriter, Demuxer, SeekTarget};
use transkit_core::io::{ByteSink, ByteSource};
use transkit_core::types::{Packet, StreamDescriptor};
use transkit_core::{Result, TranscodeError};

pub const MAGIC: &[u8; 4] = b"TKC1";
const INDEX_MAGIC: &[u8; 4] = b"TKIX";
const FOOTER_MAGIC: &[u8; 4] = b"TKFT";
const TAG_PACKET: u8 = b'P';
const TAG_END: u8 = b'E';
const FLAG_KEY: u8 = 0x01;
/// stream + flags + pts + dts + duration + len
const RECORD_HEADER_LEN: usize = 4 + 1 + 8 + 8 + 8 + 4;
const INDEX_ENTRY_LEN: usize = 4 + 8 + 8;
const FOOTER_LEN: i64 = 12;
/// Refuse stream tables larger than this; a corrupt length would otherwise
/// trigger a huge allocation.
const MAX_TABLE_LEN: usize = 1 << 20;
const MAX_PAYLOAD_LEN: usize = 64 << 20;

/// Key-frame index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    stream: usize,
    pts: i64,
    /// Byte offset of the packet record tag.
    offset: u64,
}

/// Probe score for TKC sources.
pub fn probe(head: &[u8]) -> u8 {
    if head.starts_with(MAGIC) {
        100
    } else {
        0
    }
}

fn format_err(msg: impl Into<String>) -> TranscodeError {
    TranscodeError::Format(msg.into())
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_i64(b: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    i64::from_le_bytes(raw)
}

fn le_u64(b: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    u64::from_le_bytes(raw)
}

/// Demuxer for TKC sources.
pub struct TkcDemuxer {
    source: Box<dyn ByteSource>,
    streams: Vec<StreamDescriptor>,
    data_start: u64,
    position: u64,
    index: Option<Vec<IndexEntry>>,
    /// Per stream: packets recorded before this offset are skipped (after a seek).
    resume_at: Vec<u64>,
    last_dts: Vec<Option<i64>>,
    finished: bool,
}

impl TkcDemuxer {
    /// Reads the header and the stream table, then looks for a key-frame index.
    ///
    /// # Errors
    ///
    /// `Format` for a bad magic or malformed stream table.
    pub fn open(mut source: Box<dyn ByteSource>) -> Result<Self> {
        let mut head = [0u8; 8];
        if !read_full(source.as_mut(), &mut head)? || &head[..4] != MAGIC {
            return Err(format_err("Not a TKC container (bad magic)"));
        }
        let table_len = le_u32(&head[4..]) as usize;
        if table_len > MAX_TABLE_LEN {
            return Err(format_err(format!("Stream table length {table_len} is implausible")));
        }
        let mut table = vec![0u8; table_len];
        if !read_full(source.as_mut(), &mut table)? {
            return Err(format_err("Truncated stream table"));
        }
        let mut streams: Vec<StreamDescriptor> = serde_json::from_slice(&table)
            .map_err(|e| format_err(format!("Malformed stream table: {e}")))?;
        for (i, stream) in streams.iter_mut().enumerate() {
            if !stream.time_base.is_valid() {
                return Err(format_err(format!(
                    "Stream {i} has invalid time base {}",
                    stream.time_base
                )));
            }
            stream.index = i;
        }

        let data_start = 8 + table_len as u64;
        let stream_count = streams.len();
        let mut demuxer = Self {
            source,
            streams,
            data_start,
            position: data_start,
            index: None,
            resume_at: vec![0; stream_count],
            last_dts: vec![None; stream_count],
            finished: false,
        };
        demuxer.index = demuxer.read_index();

        tracing::debug!(
            streams = demuxer.streams.len(),
            indexed = demuxer.index.is_some(),
            "Opened TKC container"
        );
        Ok(demuxer)
    }

    /// Loads the trailer index, leaving the source at the first packet record.
    /// `None` when the source is not seekable or the trailer is absent or damaged.
    fn read_index(&mut self) -> Option<Vec<IndexEntry>> {
        let index = self.try_read_index().ok().flatten();
        if self.source.seek(SeekFrom::Start(self.data_start)).is_err() {
            // Non-seekable source: still positioned right after the table
            return None;
        }
        index
    }

    fn try_read_index(&mut self) -> io::Result<Option<Vec<IndexEntry>>> {
        let end = self.source.seek(SeekFrom::End(-FOOTER_LEN))?;
        let mut footer = [0u8; 12];
        self.source.read_exact(&mut footer)?;
        if &footer[8..] != FOOTER_MAGIC {
            return Ok(None);
        }
        let index_offset = le_u64(&footer[..8]);
        if index_offset < self.data_start || index_offset >= end {
            return Ok(None);
        }
        self.source.seek(SeekFrom::Start(index_offset))?;
        let mut head = [0u8; 8];
        self.source.read_exact(&mut head)?;
        if &head[..4] != INDEX_MAGIC {
            return Ok(None);
        }
        let count = le_u32(&head[4..]) as usize;
        if (count * INDEX_ENTRY_LEN) as u64 > end - index_offset {
            return Ok(None);
        }
        let mut raw = vec![0u8; count * INDEX_ENTRY_LEN];
        self.source.read_exact(&mut raw)?;
        let entries = raw
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(|e| IndexEntry {
                stream: le_u32(&e[..4]) as usize,
                pts: le_i64(&e[4..12]),
                offset: le_u64(&e[12..20]),
            })
            .filter(|e| e.stream < self.streams.len())
            .collect();
        Ok(Some(entries))
    }

    /// Builds the key-frame index by reading every record header.
    fn scan_index(&mut self) -> Result<Vec<IndexEntry>> {
        self.seek_to(self.data_start)?;
        let mut entries = Vec::new();
        loop {
            let offset = self.position;
            let Some((header, stream)) = self.read_record_header()? else {
                break;
            };
            let len = le_u32(&header[29..33]);
            if header[4] & FLAG_KEY != 0 {
                entries.push(IndexEntry { stream, pts: le_i64(&header[5..13]), offset });
            }
            let skip = self
                .source
                .seek(SeekFrom::Current(i64::from(len)))
                .map_err(|e| TranscodeError::Seek(format!("Cannot skip packet payload: {e}")))?;
            self.position = skip;
        }
        Ok(entries)
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.source
            .seek(SeekFrom::Start(offset))
            .map_err(|e| TranscodeError::Seek(format!("Source is not seekable: {e}")))?;
        self.position = offset;
        self.finished = false;
        Ok(())
    }

    /// Per stream, the offset of the key frame to resume from. A scanned
    /// index is kept for later seeks even when no key frame qualifies.
    fn locate(&mut self, target: SeekTarget) -> Result<Vec<u64>> {
        let index = match self.index.take() {
            Some(index) => index,
            None => self.scan_index()?,
        };

        let resume_at = self
            .streams
            .iter()
            .map(|stream| {
                let target_ts = target.in_time_base(stream.time_base);
                let keys: Vec<&IndexEntry> = index.iter().filter(|e| e.stream == stream.index).collect();
                keys.iter()
                    .filter(|e| e.pts <= target_ts)
                    .max_by_key(|e| (e.pts, e.offset))
                    .or_else(|| keys.iter().min_by_key(|e| e.offset))
                    .map(|e| e.offset)
                    .ok_or_else(|| {
                        TranscodeError::Seek(format!("Stream {} has no key frame to seek to", stream.index))
                    })
            })
            .collect();
        self.index = Some(index);
        resume_at
    }

    fn restore(&mut self, position: u64, finished: bool) {
        if let Err(e) = self.source.seek(SeekFrom::Start(position)) {
            tracing::debug!(error = %e, "Could not return to the read position after a failed seek");
            return;
        }
        self.position = position;
        self.finished = finished;
    }

    /// Reads the next record tag and header. `None` at the end marker or end of input.
    fn read_record_header(&mut self) -> Result<Option<([u8; RECORD_HEADER_LEN], usize)>> {
        let mut tag = [0u8; 1];
        if !read_full(self.source.as_mut(), &mut tag)? {
            tracing::warn!("TKC container has no end marker; treating end of input as end of stream");
            return Ok(None);
        }
        self.position += 1;
        match tag[0] {
            TAG_END => return Ok(None),
            TAG_PACKET => {},
            other => return Err(format_err(format!("Unknown record tag 0x{other:02x}"))),
        }

        let mut header = [0u8; RECORD_HEADER_LEN];
        if !read_full(self.source.as_mut(), &mut header)? {
            return Err(format_err("Unexpected end of input inside a record"));
        }
        self.position += RECORD_HEADER_LEN as u64;

        let stream = le_u32(&header[..4]) as usize;
        if stream >= self.streams.len() {
            return Err(format_err(format!(
                "Packet references stream {stream}, container has {}",
                self.streams.len()
            )));
        }
        Ok(Some((header, stream)))
    }
}

impl Demuxer for TkcDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            let offset = self.position;
            let Some((header, stream)) = self.read_record_header()? else {
                self.finished = true;
                return Ok(None);
            };

            let len = le_u32(&header[29..33]) as usize;
            if len > MAX_PAYLOAD_LEN {
                return Err(format_err(format!("Packet payload length {len} is implausible")));
            }
            let mut payload = vec![0u8; len];
            if len > 0 && !read_full(self.source.as_mut(), &mut payload)? {
                return Err(format_err("Unexpected end of input inside a packet payload"));
            }
            self.position += len as u64;

            if offset < self.resume_at[stream] {
                continue;
            }

            let dts = le_i64(&header[13..21]);
            if let Some(last) = self.last_dts[stream] {
                if dts < last {
                    return Err(format_err(format!(
                        "Stream {stream} decoding timestamp went backwards ({last} -> {dts})"
                    )));
                }
            }
            self.last_dts[stream] = Some(dts);

            return Ok(Some(Packet {
                stream_index: stream,
                data: Bytes::from(payload),
                pts: le_i64(&header[5..13]),
                dts,
                duration: le_i64(&header[21..29]),
                key: header[4] & FLAG_KEY != 0,
            }));
        }
    }

    fn seek(&mut self, target: SeekTarget) -> Result<()> {
        let (position, finished) = (self.position, self.finished);
        let resume_at = match self.locate(target) {
            Ok(resume_at) => resume_at,
            Err(e) => {
                // A failed seek leaves the stream where it was.
                self.restore(position, finished);
                return Err(e);
            },
        };

        let start = resume_at.iter().copied().min().unwrap_or(self.data_start);
        if let Err(e) = self.seek_to(start) {
            self.restore(position, finished);
            return Err(e);
        }
        self.resume_at = resume_at;
        self.last_dts.iter_mut().for_each(|d| *d = None);
        tracing::debug!(target = target.timestamp, offset = start, "Seeked TKC container");
        Ok(())
    }
}

/// Writer for TKC containers.
pub struct TkcWriter {
    sink: Box<dyn ByteSink>,
    position: u64,
    stream_count: usize,
    index: Vec<IndexEntry>,
    header_written: bool,
    finalized: bool,
    bytes_counter: Counter<u64>,
}

impl TkcWriter {
    pub fn new(sink: Box<dyn ByteSink>) -> Self {
        Self {
            sink,
            position: 0,
            stream_count: 0,
            index: Vec::new(),
            header_written: false,
            finalized: false,
            bytes_counter: bytes_written_counter(),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.sink
            .write_all(buf)
            .map_err(|e| TranscodeError::Mux(format!("Write failed: {e}")))?;
        self.position += buf.len() as u64;
        self.bytes_counter.add(buf.len() as u64, &[KeyValue::new("container", "tkc")]);
        Ok(())
    }
}

impl ContainerWriter for TkcWriter {
    fn write_header(&mut self, streams: &[StreamDescriptor]) -> Result<()> {
        if self.header_written {
            return Err(TranscodeError::Mux("Header already written".to_string()));
        }
        let table = serde_json::to_vec(streams)
            .map_err(|e| TranscodeError::Mux(format!("Cannot serialize stream table: {e}")))?;
        let table_len = u32::try_from(table.len())
            .map_err(|_| TranscodeError::Mux("Stream table too large".to_string()))?;

        let mut buf = BytesMut::with_capacity(8 + table.len());
        buf.put_slice(MAGIC);
        buf.put_u32_le(table_len);
        buf.put_slice(&table);
        self.write_all(&buf)?;

        self.stream_count = streams.len();
        self.header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if !self.header_written || self.finalized {
            return Err(TranscodeError::Mux("Packet written outside header/trailer".to_string()));
        }
        if packet.stream_index >= self.stream_count {
            return Err(TranscodeError::Mux(format!(
                "Packet for unknown output stream {}",
                packet.stream_index
            )));
        }
        let stream = u32::try_from(packet.stream_index)
            .map_err(|_| TranscodeError::Mux("Stream index out of range".to_string()))?;
        let len = u32::try_from(packet.data.len())
            .map_err(|_| TranscodeError::Mux("Packet payload too large".to_string()))?;

        if packet.key {
            self.index.push(IndexEntry {
                stream: packet.stream_index,
                pts: packet.pts,
                offset: self.position,
            });
        }

        let mut buf = BytesMut::with_capacity(1 + RECORD_HEADER_LEN + packet.data.len());
        buf.put_u8(TAG_PACKET);
        buf.put_u32_le(stream);
        buf.put_u8(if packet.key { FLAG_KEY } else { 0 });
        buf.put_i64_le(packet.pts);
        buf.put_i64_le(packet.dts);
        buf.put_i64_le(packet.duration);
        buf.put_u32_le(len);
        buf.put_slice(&packet.data);
        self.write_all(&buf)
    }

    fn write_trailer(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if !self.header_written {
            return Err(TranscodeError::Mux("Trailer written before header".to_string()));
        }
        self.write_all(&[TAG_END])?;

        let index_offset = self.position;
        let count = u32::try_from(self.index.len())
            .map_err(|_| TranscodeError::Mux("Key-frame index too large".to_string()))?;
        let mut buf = BytesMut::with_capacity(8 + self.index.len() * INDEX_ENTRY_LEN + 12);
        buf.put_slice(INDEX_MAGIC);
        buf.put_u32_le(count);
        for entry in &self.index {
            #[allow(clippy::cast_possible_truncation)] // bounded by stream_count
            buf.put_u32_le(entry.stream as u32);
            buf.put_i64_le(entry.pts);
            buf.put_u64_le(entry.offset);
        }
        buf.put_u64_le(index_offset);
        buf.put_slice(FOOTER_MAGIC);
        self.write_all(&buf)?;

        self.sink.flush().map_err(|e| TranscodeError::Mux(format!("Flush failed: {e}")))?;
        self.finalized = true;
        tracing::debug!(bytes = self.position, key_frames = self.index.len(), "Finalized TKC container");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use transkit_core::io::{memory_source, MemorySink, NonSeekable};
    use transkit_core::rational::Rational;
    use transkit_core::types::MediaKind;
    use transkit_core::ErrorKind;

    fn streams() -> Vec<StreamDescriptor> {
        vec![
            StreamDescriptor::new(0, MediaKind::Video, "rlev", Rational::new(1, 30))
                .with_param("width", 4)
                .with_param("height", 2),
            StreamDescriptor::new(1, MediaKind::Audio, "pcm_s16le", Rational::new(1, 48000)),
        ]
    }

    /// Video key frame every 3 packets, audio always key.
    fn write_sample(with_trailer: bool) -> Bytes {
        let sink = MemorySink::new();
        let mut writer = TkcWriter::new(Box::new(sink.clone()));
        writer.write_header(&streams()).unwrap();
        for i in 0..9i64 {
            let video = Packet::new(0, vec![i as u8; 3], i, i).with_duration(1).with_key(i % 3 == 0);
            writer.write_packet(&video).unwrap();
            let audio = Packet::new(1, vec![0xA0; 4], i * 1600, i * 1600).with_duration(1600);
            writer.write_packet(&audio).unwrap();
        }
        if with_trailer {
            writer.write_trailer().unwrap();
        }
        sink.contents()
    }

    fn read_all(demuxer: &mut TkcDemuxer) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Some(p) = demuxer.next_packet().unwrap() {
            out.push(p);
        }
        out
    }

    #[test]
    fn test_roundtrip_preserves_packets() {
        let data = write_sample(true);
        assert_eq!(probe(&data), 100);
        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(data))).unwrap();
        assert_eq!(demuxer.streams(), streams().as_slice());
        assert!(demuxer.index.is_some());

        let packets = read_all(&mut demuxer);
        assert_eq!(packets.len(), 18);
        assert_eq!(packets[2], Packet::new(0, vec![1u8; 3], 1, 1).with_duration(1).with_key(false));
        assert_eq!(packets[3].pts, 1600);
        // end of stream is sticky
        assert!(demuxer.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_seek_lands_on_preceding_key_frame() {
        let data = write_sample(true);
        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(data))).unwrap();
        // 5/30 s: video key frames at 0, 3, 6 -> 3; audio is all key -> 8000
        demuxer.seek(SeekTarget::new(5, Rational::new(1, 30))).unwrap();
        let packets = read_all(&mut demuxer);
        let first_video = packets.iter().find(|p| p.stream_index == 0).unwrap();
        let first_audio = packets.iter().find(|p| p.stream_index == 1).unwrap();
        assert_eq!(first_video.pts, 3);
        assert!(first_video.key);
        assert_eq!(first_audio.pts, 8000);
    }

    #[test]
    fn test_seek_without_trailer_scans() {
        let data = write_sample(false);
        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(data))).unwrap();
        assert!(demuxer.index.is_none());
        demuxer.seek(SeekTarget::new(0, Rational::new(1, 30))).unwrap();
        let packets = read_all(&mut demuxer);
        assert_eq!(packets.len(), 18);
    }

    #[test]
    fn test_seek_before_first_key_uses_first_key() {
        let sink = MemorySink::new();
        let mut writer = TkcWriter::new(Box::new(sink.clone()));
        writer.write_header(&streams()[..1]).unwrap();
        for i in 0..4i64 {
            writer.write_packet(&Packet::new(0, vec![1], i + 10, i + 10).with_key(i == 2)).unwrap();
        }
        writer.write_trailer().unwrap();

        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(sink.contents()))).unwrap();
        demuxer.seek(SeekTarget::new(0, Rational::new(1, 30))).unwrap();
        let first = demuxer.next_packet().unwrap().unwrap();
        assert_eq!(first.pts, 12);
        assert!(first.key);
    }

    #[test]
    fn test_seek_errors() {
        let sink = MemorySink::new();
        let mut writer = TkcWriter::new(Box::new(sink.clone()));
        writer.write_header(&streams()[..1]).unwrap();
        writer.write_packet(&Packet::new(0, vec![1], 0, 0).with_key(false)).unwrap();
        writer.write_trailer().unwrap();
        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(sink.contents()))).unwrap();
        let err = demuxer.seek(SeekTarget::new(0, Rational::MICROS)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SeekError);

        let data = write_sample(true);
        let mut demuxer =
            TkcDemuxer::open(Box::new(NonSeekable::new(memory_source(data)))).unwrap();
        assert!(demuxer.index.is_none());
        let err = demuxer.seek(SeekTarget::new(0, Rational::MICROS)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SeekError);
        // still readable sequentially
        assert_eq!(read_all(&mut demuxer).len(), 18);
    }

    #[test]
    fn test_failed_seek_keeps_read_position() {
        let sink = MemorySink::new();
        let mut writer = TkcWriter::new(Box::new(sink.clone()));
        writer.write_header(&streams()).unwrap();
        for i in 0..6i64 {
            writer.write_packet(&Packet::new(0, vec![1], i, i).with_key(false)).unwrap();
            writer.write_packet(&Packet::new(1, vec![2], i * 1600, i * 1600)).unwrap();
        }
        let data = sink.contents();

        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(data.clone()))).unwrap();
        assert!(demuxer.index.is_none());
        let err = demuxer.seek(SeekTarget::new(2, Rational::new(1, 30))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SeekError);
        // the scan is not repeated on the next attempt
        assert!(demuxer.index.is_some());
        assert_eq!(read_all(&mut demuxer).len(), 12);

        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(data))).unwrap();
        let head: Vec<Packet> = (0..3).map(|_| demuxer.next_packet().unwrap().unwrap()).collect();
        assert!(demuxer.seek(SeekTarget::new(2, Rational::new(1, 30))).is_err());
        let rest = read_all(&mut demuxer);
        assert_eq!(rest.len(), 9);
        assert_eq!(rest[0].pts, 1600);
        assert_eq!(head[2].pts, 1);
    }

    #[test]
    fn test_malformed_input_is_format_error() {
        let err = TkcDemuxer::open(Box::new(memory_source(&b"RIFF0000"[..]))).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FormatError);

        let mut data = write_sample(false).to_vec();
        data.truncate(data.len() - 2);
        let mut demuxer = TkcDemuxer::open(Box::new(memory_source(data))).unwrap();
        let result: Result<Vec<Packet>> = std::iter::from_fn(|| demuxer.next_packet().transpose()).collect();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::FormatError);
    }
}
