// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types that flow through TransKit pipelines.
//!
//! - [`StreamDescriptor`]: static description of an elementary stream
//! - [`Packet`]: encoded unit with timestamps, moved between Demuxer, Decoder,
//!   Encoder and Muxer
//! - [`Frame`]: decoded samples or pixels plus their [`FrameFormat`]
//!
//! Packets and frames are owned by exactly one stage at a time and are moved on
//! handoff. Payloads are reference counted (`Bytes`, `Arc`) so fan-out inside a
//! filter graph does not copy sample data.

use crate::error::{Result, TranscodeError};
use crate::rational::Rational;
use bytes::Bytes;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of media carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Packed pixel layouts understood by the built-in video filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Rgba,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb24 => 3,
            Self::Rgba => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gray8 => "gray8",
            Self::Rgb24 => "rgb24",
            Self::Rgba => "rgba",
        }
    }

    /// Wire identifier used by packet headers.
    pub const fn code(self) -> u8 {
        match self {
            Self::Gray8 => 0,
            Self::Rgb24 => 1,
            Self::Rgba => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Gray8),
            1 => Some(Self::Rgb24),
            2 => Some(Self::Rgba),
            _ => None,
        }
    }
}

impl FromStr for PixelFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gray" | "gray8" => Ok(Self::Gray8),
            "rgb24" => Ok(Self::Rgb24),
            "rgba" => Ok(Self::Rgba),
            other => Err(TranscodeError::Configuration(format!("Unknown pixel format '{other}'"))),
        }
    }
}

/// Interleaved audio sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S16,
    F32,
}

impl SampleFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S16 => "s16",
            Self::F32 => "f32",
        }
    }
}

impl FromStr for SampleFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s16" => Ok(Self::S16),
            "f32" | "flt" => Ok(Self::F32),
            other => {
                Err(TranscodeError::Configuration(format!("Unknown sample format '{other}'")))
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl VideoFormat {
    /// Size in bytes of one packed picture.
    pub const fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Concrete format of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl FrameFormat {
    pub const fn media(&self) -> MediaKind {
        match self {
            Self::Video(_) => MediaKind::Video,
            Self::Audio(_) => MediaKind::Audio,
        }
    }

    pub const fn as_video(&self) -> Option<&VideoFormat> {
        match self {
            Self::Video(v) => Some(v),
            Self::Audio(_) => None,
        }
    }

    pub const fn as_audio(&self) -> Option<&AudioFormat> {
        match self {
            Self::Audio(a) => Some(a),
            Self::Video(_) => None,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(v) => {
                write!(f, "video {}x{} {}", v.width, v.height, v.pixel_format.as_str())
            },
            Self::Audio(a) => write!(
                f,
                "audio {} Hz {}ch {}",
                a.sample_rate,
                a.channels,
                a.sample_format.as_str()
            ),
        }
    }
}

/// Static description of one elementary stream.
///
/// Created when a container is opened (or when an output stream is configured)
/// and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub media: MediaKind,
    /// Codec identifier as registered in the format registry (`pcm_s16le`, `rlev`, ...).
    pub codec: String,
    pub time_base: Rational,
    /// Codec and container specific parameters (`sample_rate`, `width`, ...).
    #[serde(default)]
    pub params: BTreeMap<String, JsonValue>,
}

impl StreamDescriptor {
    pub fn new(index: usize, media: MediaKind, codec: &str, time_base: Rational) -> Self {
        Self { index, media, codec: codec.to_string(), time_base, params: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(JsonValue::as_u64)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(JsonValue::as_str)
    }
}

/// Encoded unit of stream data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    pub data: Bytes,
    /// Presentation timestamp in the stream time base.
    pub pts: i64,
    /// Decoding timestamp in the stream time base.
    pub dts: i64,
    pub duration: i64,
    pub key: bool,
}

impl Packet {
    pub fn new(stream_index: usize, data: impl Into<Bytes>, pts: i64, dts: i64) -> Self {
        Self { stream_index, data: data.into(), pts, dts, duration: 0, key: true }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub const fn with_key(mut self, key: bool) -> Self {
        self.key = key;
        self
    }
}

/// Interleaved audio samples.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSamples {
    S16(Vec<i16>),
    F32(Vec<f32>),
}

impl AudioSamples {
    pub fn len(&self) -> usize {
        match self {
            Self::S16(s) => s.len(),
            Self::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn sample_format(&self) -> SampleFormat {
        match self {
            Self::S16(_) => SampleFormat::S16,
            Self::F32(_) => SampleFormat::F32,
        }
    }

    /// Converts to normalized `f32` samples.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Self::S16(s) => s.iter().map(|&v| f32::from(v) / 32768.0).collect(),
            Self::F32(s) => s.clone(),
        }
    }

    /// Builds samples of the requested format from normalized `f32` values.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f32(samples: Vec<f32>, format: SampleFormat) -> Self {
        match format {
            SampleFormat::F32 => Self::F32(samples),
            SampleFormat::S16 => Self::S16(
                samples.into_iter().map(|v| (v * 32768.0).round().clamp(-32768.0, 32767.0) as i16).collect(),
            ),
        }
    }
}

/// Raw frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    /// Packed pixels, row-major, no padding.
    Video(Bytes),
    Audio(Arc<AudioSamples>),
}

/// Decoded, raw media.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub stream_index: usize,
    pub data: FrameData,
    pub format: FrameFormat,
    /// Presentation timestamp in `time_base`.
    pub pts: i64,
    pub time_base: Rational,
    pub duration: i64,
}

impl Frame {
    pub fn video(
        stream_index: usize,
        format: VideoFormat,
        pixels: impl Into<Bytes>,
        pts: i64,
        time_base: Rational,
    ) -> Self {
        Self {
            stream_index,
            data: FrameData::Video(pixels.into()),
            format: FrameFormat::Video(format),
            pts,
            time_base,
            duration: 0,
        }
    }

    pub fn audio(
        stream_index: usize,
        format: AudioFormat,
        samples: AudioSamples,
        pts: i64,
        time_base: Rational,
    ) -> Self {
        Self {
            stream_index,
            data: FrameData::Audio(Arc::new(samples)),
            format: FrameFormat::Audio(format),
            pts,
            time_base,
            duration: 0,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub const fn pixels(&self) -> Option<&Bytes> {
        match &self.data {
            FrameData::Video(b) => Some(b),
            FrameData::Audio(_) => None,
        }
    }

    pub fn samples(&self) -> Option<&AudioSamples> {
        match &self.data {
            FrameData::Audio(s) => Some(s),
            FrameData::Video(_) => None,
        }
    }

    /// Number of samples per channel, zero for video frames.
    pub fn sample_count(&self) -> usize {
        match (&self.data, &self.format) {
            (FrameData::Audio(s), FrameFormat::Audio(a)) if a.channels > 0 => {
                s.len() / usize::from(a.channels)
            },
            _ => 0,
        }
    }

    /// Presentation timestamp rescaled into another time base.
    pub fn pts_in(&self, time_base: Rational) -> i64 {
        self.time_base.rescale(self.pts, time_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_parse_and_codes() {
        assert_eq!("rgb24".parse::<PixelFormat>().ok(), Some(PixelFormat::Rgb24));
        assert_eq!("gray".parse::<PixelFormat>().ok(), Some(PixelFormat::Gray8));
        assert!("yuv420p".parse::<PixelFormat>().is_err());
        for fmt in [PixelFormat::Gray8, PixelFormat::Rgb24, PixelFormat::Rgba] {
            assert_eq!(PixelFormat::from_code(fmt.code()), Some(fmt));
        }
    }

    #[test]
    fn test_sample_conversion_clamps() {
        let samples = AudioSamples::from_f32(vec![0.0, 0.5, 1.5, -2.0], SampleFormat::S16);
        assert_eq!(samples, AudioSamples::S16(vec![0, 16384, 32767, -32768]));
        let back = AudioSamples::S16(vec![16384]).to_f32();
        assert!((back[0] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_frame_sample_count() {
        let format =
            AudioFormat { sample_format: SampleFormat::F32, sample_rate: 48000, channels: 2 };
        let frame = Frame::audio(0, format, AudioSamples::F32(vec![0.0; 960]), 0, Rational::new(1, 48000));
        assert_eq!(frame.sample_count(), 480);
        assert!(frame.pixels().is_none());
    }

    #[test]
    fn test_stream_descriptor_params() {
        let stream = StreamDescriptor::new(1, MediaKind::Video, "rawvideo", Rational::new(1, 30))
            .with_param("width", 4)
            .with_param("pix_fmt", "rgb24");
        assert_eq!(stream.param_u64("width"), Some(4));
        assert_eq!(stream.param_str("pix_fmt"), Some("rgb24"));
        assert_eq!(stream.param_u64("height"), None);
    }
}
