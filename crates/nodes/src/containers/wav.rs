// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! RIFF/WAVE container carrying interleaved PCM.
//!
//! The demuxer exposes a single audio stream in time base `1/sample_rate` and
//! cuts the `data` chunk into packets of [`PACKET_SAMPLES`] sample frames. Every
//! packet is a key frame, so seeking is exact to the sample.

use super::{bytes_written_counter, read_full};
use bytes::{BufMut, Bytes, BytesMut};
use opentelemetry::{metrics::Counter, KeyValue};
use std::io::{self, Read, SeekFrom, Write};
use transkit_core::container::{ContainerWriter, Demuxer, SeekTarget};
use transkit_core::io::{ByteSink, ByteSource};
use transkit_core::types::{MediaKind, Packet, StreamDescriptor};
use transkit_core::{Rational, Result, TranscodeError};

/// Sample frames per demuxed packet.
pub const PACKET_SAMPLES: u64 = 1024;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// Size value used by streaming writers that cannot patch the header.
const UNKNOWN_SIZE: u32 = 0xFFFF_FFFF;
/// Offset of the RIFF size field.
const RIFF_SIZE_OFFSET: u64 = 4;
/// Offset of the data size field in the header this writer produces.
const DATA_SIZE_OFFSET: u64 = 40;
const HEADER_LEN: u64 = 44;

/// Probe score for RIFF/WAVE sources.
pub fn probe(head: &[u8]) -> u8 {
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WAVE" {
        100
    } else {
        0
    }
}

/// Maps a WAVE format tag and sample width to a PCM codec identifier.
fn codec_for(format_tag: u16, bits: u16) -> Result<&'static str> {
    match (format_tag, bits) {
        (FORMAT_PCM, 16) => Ok("pcm_s16le"),
        (FORMAT_IEEE_FLOAT, 32) => Ok("pcm_f32le"),
        (tag, bits) => Err(TranscodeError::UnsupportedFormat(format!(
            "WAVE format tag {tag} with {bits}-bit samples"
        ))),
    }
}

fn format_tag_for(codec: &str) -> Option<(u16, u16)> {
    match codec {
        "pcm_s16le" => Some((FORMAT_PCM, 16)),
        "pcm_f32le" => Some((FORMAT_IEEE_FLOAT, 32)),
        _ => None,
    }
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Discards `len` bytes without requiring a seekable source.
fn skip(source: &mut dyn ByteSource, len: u64) -> Result<()> {
    let copied = io::copy(&mut source.take(len), &mut io::sink())?;
    if copied < len {
        return Err(TranscodeError::Format("Truncated RIFF chunk".to_string()));
    }
    Ok(())
}

pub struct WavDemuxer {
    source: Box<dyn ByteSource>,
    streams: Vec<StreamDescriptor>,
    block_align: u64,
    data_start: u64,
    /// Data chunk length in bytes, `None` when the header did not record it.
    data_len: Option<u64>,
    /// Next sample frame to read.
    sample: u64,
}

impl WavDemuxer {
    /// Parses the RIFF header up to the start of the `data` chunk.
    ///
    /// # Errors
    ///
    /// `Format` for a malformed header, `UnsupportedFormat` for sample formats other
    /// than 16-bit integer and 32-bit float.
    pub fn open(mut source: Box<dyn ByteSource>) -> Result<Self> {
        let mut riff = [0u8; 12];
        if !read_full(source.as_mut(), &mut riff)? || probe(&riff) == 0 {
            return Err(TranscodeError::Format("Not a RIFF/WAVE file".to_string()));
        }
        let mut position = 12u64;

        let mut format: Option<(&'static str, u16, u32, u16)> = None;
        loop {
            let mut chunk = [0u8; 8];
            if !read_full(source.as_mut(), &mut chunk)? {
                return Err(TranscodeError::Format("WAVE file has no data chunk".to_string()));
            }
            position += 8;
            let size = le_u32(&chunk[4..]);

            match &chunk[..4] {
                b"fmt " => {
                    if size < 16 {
                        return Err(TranscodeError::Format(format!("fmt chunk too short ({size} bytes)")));
                    }
                    let mut fmt = vec![0u8; size as usize];
                    if !read_full(source.as_mut(), &mut fmt)? {
                        return Err(TranscodeError::Format("Truncated fmt chunk".to_string()));
                    }
                    position += u64::from(size);
                    let mut tag = le_u16(&fmt[0..2]);
                    if tag == FORMAT_EXTENSIBLE && fmt.len() >= 26 {
                        // The sub-format GUID starts with the real format tag
                        tag = le_u16(&fmt[24..26]);
                    }
                    let channels = le_u16(&fmt[2..4]);
                    let sample_rate = le_u32(&fmt[4..8]);
                    let bits = le_u16(&fmt[14..16]);
                    if channels == 0 || sample_rate == 0 {
                        return Err(TranscodeError::Format(
                            "fmt chunk declares zero channels or sample rate".to_string(),
                        ));
                    }
                    format = Some((codec_for(tag, bits)?, channels, sample_rate, bits));
                    if size % 2 == 1 {
                        skip(source.as_mut(), 1)?;
                        position += 1;
                    }
                },
                b"data" => {
                    let Some((codec, channels, sample_rate, bits)) = format else {
                        return Err(TranscodeError::Format("data chunk before fmt chunk".to_string()));
                    };
                    let data_len = match size {
                        0 | UNKNOWN_SIZE => None,
                        n => Some(u64::from(n)),
                    };
                    let stream = StreamDescriptor::new(
                        0,
                        MediaKind::Audio,
                        codec,
                        Rational::new(1, i64::from(sample_rate)),
                    )
                    .with_param("sample_rate", sample_rate)
                    .with_param("channels", channels);

                    tracing::debug!(codec, sample_rate, channels, ?data_len, "Opened WAVE container");
                    return Ok(Self {
                        source,
                        streams: vec![stream],
                        block_align: u64::from(channels) * u64::from(bits / 8),
                        data_start: position,
                        data_len,
                        sample: 0,
                    });
                },
                other => {
                    tracing::trace!(chunk = %String::from_utf8_lossy(other), size, "Skipping RIFF chunk");
                    let padded = u64::from(size) + u64::from(size % 2);
                    skip(source.as_mut(), padded)?;
                    position += padded;
                },
            }
        }
    }

    fn total_samples(&self) -> Option<u64> {
        self.data_len.map(|len| len / self.block_align)
    }
}

impl Demuxer for WavDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        let mut want = PACKET_SAMPLES;
        if let Some(total) = self.total_samples() {
            want = want.min(total.saturating_sub(self.sample));
        }
        if want == 0 {
            return Ok(None);
        }

        let mut buf = Vec::with_capacity((want * self.block_align) as usize);
        self.source
            .as_mut()
            .take(want * self.block_align)
            .read_to_end(&mut buf)
            .map_err(|e| TranscodeError::from(e).in_container(transkit_core::Stage::Demux))?;

        let samples = buf.len() as u64 / self.block_align;
        let whole = (samples * self.block_align) as usize;
        if whole < buf.len() {
            tracing::warn!(bytes = buf.len() - whole, "Dropping partial sample frame at end of WAVE data");
            buf.truncate(whole);
        }
        if samples == 0 {
            if self.data_len.is_some() {
                tracing::warn!(sample = self.sample, "WAVE data chunk ended early");
            }
            self.data_len = Some(self.sample * self.block_align);
            return Ok(None);
        }

        #[allow(clippy::cast_possible_wrap)]
        let pts = self.sample as i64;
        self.sample += samples;
        #[allow(clippy::cast_possible_wrap)]
        let duration = samples as i64;
        Ok(Some(Packet::new(0, Bytes::from(buf), pts, pts).with_duration(duration)))
    }

    fn seek(&mut self, target: SeekTarget) -> Result<()> {
        let rate = self.streams[0].time_base;
        let mut sample = u64::try_from(target.in_time_base(rate).max(0)).unwrap_or(0);
        if let Some(total) = self.total_samples() {
            sample = sample.min(total);
        }
        self.source
            .seek(SeekFrom::Start(self.data_start + sample * self.block_align))
            .map_err(|e| TranscodeError::Seek(format!("WAVE source is not seekable: {e}")))?;
        self.sample = sample;
        tracing::debug!(sample, "Seeked WAVE container");
        Ok(())
    }
}

pub struct WavWriter {
    sink: Box<dyn ByteSink>,
    data_len: u64,
    header_written: bool,
    finalized: bool,
    bytes_counter: Counter<u64>,
}

impl WavWriter {
    pub fn new(sink: Box<dyn ByteSink>) -> Self {
        Self {
            sink,
            data_len: 0,
            header_written: false,
            finalized: false,
            bytes_counter: bytes_written_counter(),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.sink
            .write_all(buf)
            .map_err(|e| TranscodeError::Mux(format!("Write failed: {e}")))?;
        self.bytes_counter.add(buf.len() as u64, &[KeyValue::new("container", "wav")]);
        Ok(())
    }

    fn patch_sizes(&mut self) -> io::Result<()> {
        let riff_size = u32::try_from(HEADER_LEN - 8 + self.data_len).unwrap_or(UNKNOWN_SIZE);
        let data_size = u32::try_from(self.data_len).unwrap_or(UNKNOWN_SIZE);
        self.sink.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.sink.write_all(&riff_size.to_le_bytes())?;
        self.sink.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.sink.write_all(&data_size.to_le_bytes())?;
        self.sink.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

impl ContainerWriter for WavWriter {
    fn write_header(&mut self, streams: &[StreamDescriptor]) -> Result<()> {
        let [stream] = streams else {
            return Err(TranscodeError::Mux(format!(
                "WAVE holds exactly one audio stream, got {}",
                streams.len()
            )));
        };
        let (tag, bits) = format_tag_for(&stream.codec).ok_or_else(|| {
            TranscodeError::Mux(format!("WAVE cannot carry codec '{}'", stream.codec))
        })?;
        let sample_rate = stream
            .param_u64("sample_rate")
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| TranscodeError::Mux("WAVE stream needs a sample_rate".to_string()))?;
        let channels = stream
            .param_u64("channels")
            .and_then(|v| u16::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| TranscodeError::Mux("WAVE stream needs a channel count".to_string()))?;
        if stream.time_base != Rational::new(1, i64::from(sample_rate)) {
            tracing::debug!(time_base = %stream.time_base, "WAVE timestamps are implied by sample position");
        }

        let block_align = channels * (bits / 8);
        let mut buf = BytesMut::with_capacity(HEADER_LEN as usize);
        buf.put_slice(b"RIFF");
        buf.put_u32_le(UNKNOWN_SIZE);
        buf.put_slice(b"WAVE");
        buf.put_slice(b"fmt ");
        buf.put_u32_le(16);
        buf.put_u16_le(tag);
        buf.put_u16_le(channels);
        buf.put_u32_le(sample_rate);
        buf.put_u32_le(sample_rate * u32::from(block_align));
        buf.put_u16_le(block_align);
        buf.put_u16_le(bits);
        buf.put_slice(b"data");
        buf.put_u32_le(UNKNOWN_SIZE);
        self.write_all(&buf)?;
        self.header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if !self.header_written || self.finalized {
            return Err(TranscodeError::Mux("Packet written outside header/trailer".to_string()));
        }
        self.write_all(&packet.data)?;
        self.data_len += packet.data.len() as u64;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if !self.header_written {
            return Err(TranscodeError::Mux("Trailer written before header".to_string()));
        }
        if self.data_len % 2 == 1 {
            self.write_all(&[0])?;
        }
        if let Err(e) = self.patch_sizes() {
            tracing::warn!(error = %e, "Cannot patch WAVE sizes on a non-seekable sink; leaving streaming sizes");
        }
        self.sink.flush().map_err(|e| TranscodeError::Mux(format!("Flush failed: {e}")))?;
        self.finalized = true;
        tracing::debug!(data_bytes = self.data_len, "Finalized WAVE container");
        Ok(())
    }
}
