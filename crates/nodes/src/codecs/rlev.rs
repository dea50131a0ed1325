// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! RLEV: run-length coded video.
//!
//! Every packet carries one complete picture:
//!
//! ```text
//! "RLEV" | width u16 | height u16 | pix_fmt u8 | frame type u8 | reserved u16
//! { run u8 (1..=255) | pixel (bytes_per_pixel) }*
//! ```
//!
//! Pictures are intra coded. The frame type (I, P, B) only drives the encoder's
//! reordering: with `b_frames > 0` the encoder holds B pictures until the next
//! reference picture has been emitted, so packets leave in decode order and the
//! stream declares `reorder_delay = 1` for its decoder.

use super::{video_format, with_video_params};
use bytes::{BufMut, BytesMut};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use transkit_core::codec::{DecodedFrames, EncodedPackets};
use transkit_core::config_helpers::parse_config_optional;
use transkit_core::{
    CodecCapability, ComponentKind, Decoder, DecoderFactory, Encoder, EncoderFactory, FormatCaps,
    FormatRegistry, Frame, FrameFormat, MediaKind, Packet, Rational, Result, StreamDescriptor,
    TranscodeError, VideoFormat,
};

pub const RLEV: &str = "rlev";
pub const MAGIC: &[u8; 4] = b"RLEV";
pub const HEADER_LEN: usize = 12;
const MAX_B_FRAMES: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    P,
    B,
}

impl FrameType {
    const fn code(self) -> u8 {
        match self {
            Self::I => 0,
            Self::P => 1,
            Self::B => 2,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::I),
            1 => Some(Self::P),
            2 => Some(Self::B),
            _ => None,
        }
    }
}

/// Encoder parameters.
#[derive(Deserialize, Debug, Clone, JsonSchema)]
#[serde(default)]
pub struct RlevConfig {
    /// Pictures held between reference pictures (0 disables reordering).
    pub b_frames: u8,
    /// Maximum distance between I pictures, in pictures.
    pub gop_size: u32,
}

impl Default for RlevConfig {
    fn default() -> Self {
        Self { b_frames: 0, gop_size: 12 }
    }
}

impl RlevConfig {
    fn parse(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: Self = parse_config_optional(params)?;
        if config.b_frames > MAX_B_FRAMES {
            return Err(TranscodeError::Configuration(format!(
                "rlev b_frames must be in 0..={MAX_B_FRAMES}, got {}",
                config.b_frames
            )));
        }
        if config.gop_size == 0 {
            return Err(TranscodeError::Configuration("rlev gop_size must be positive".to_string()));
        }
        Ok(config)
    }
}

/// Run-length encodes one picture, header included.
pub fn encode_picture(format: &VideoFormat, pixels: &[u8], frame_type: FrameType) -> Result<Vec<u8>> {
    let (Ok(width), Ok(height)) = (u16::try_from(format.width), u16::try_from(format.height)) else {
        return Err(TranscodeError::Encode(format!(
            "rlev pictures are limited to 65535x65535, got {}x{}",
            format.width, format.height
        )));
    };
    let bpp = format.pixel_format.bytes_per_pixel();
    if pixels.len() != format.frame_size() {
        return Err(TranscodeError::Encode(format!(
            "Picture of {} bytes does not match {}x{} {}",
            pixels.len(),
            format.width,
            format.height,
            format.pixel_format.as_str()
        )));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + pixels.len() / 2);
    buf.put_slice(MAGIC);
    buf.put_u16_le(width);
    buf.put_u16_le(height);
    buf.put_u8(format.pixel_format.code());
    buf.put_u8(frame_type.code());
    buf.put_u16_le(0);

    let mut chunks = pixels.chunks_exact(bpp).peekable();
    while let Some(pixel) = chunks.next() {
        let mut run: u8 = 1;
        while run < u8::MAX && chunks.peek() == Some(&pixel) {
            chunks.next();
            run += 1;
        }
        buf.put_u8(run);
        buf.put_slice(pixel);
    }
    Ok(buf.to_vec())
}

/// Decodes one picture, checking its header against the stream format.
///
/// # Errors
///
/// `CorruptHeader` for a bad magic or a header disagreeing with `format`,
/// `Decode` for a run list that overruns or does not fill the picture.
pub fn decode_picture(format: &VideoFormat, data: &[u8]) -> Result<(FrameType, Vec<u8>)> {
    if data.len() < HEADER_LEN || &data[..4] != MAGIC {
        return Err(TranscodeError::CorruptHeader("rlev packet magic mismatch".to_string()));
    }
    let width = u32::from(u16::from_le_bytes([data[4], data[5]]));
    let height = u32::from(u16::from_le_bytes([data[6], data[7]]));
    if width != format.width || height != format.height || data[8] != format.pixel_format.code() {
        return Err(TranscodeError::CorruptHeader(format!(
            "rlev picture {width}x{height} (pix_fmt {}) disagrees with stream {}x{} {}",
            data[8],
            format.width,
            format.height,
            format.pixel_format.as_str()
        )));
    }
    let frame_type = FrameType::from_code(data[9]).ok_or_else(|| {
        TranscodeError::CorruptHeader(format!("Unknown rlev frame type {}", data[9]))
    })?;

    let bpp = format.pixel_format.bytes_per_pixel();
    let size = format.frame_size();
    let mut pixels = Vec::with_capacity(size);
    let mut body = &data[HEADER_LEN..];
    while !body.is_empty() {
        if body.len() < 1 + bpp {
            return Err(TranscodeError::Decode("rlev run truncated".to_string()));
        }
        let run = usize::from(body[0]);
        if run == 0 {
            return Err(TranscodeError::Decode("rlev run of length zero".to_string()));
        }
        if pixels.len() + run * bpp > size {
            return Err(TranscodeError::Decode("rlev runs overrun the picture".to_string()));
        }
        let pixel = &body[1..=bpp];
        for _ in 0..run {
            pixels.extend_from_slice(pixel);
        }
        body = &body[1 + bpp..];
    }
    if pixels.len() != size {
        return Err(TranscodeError::Decode(format!(
            "rlev runs cover {} of {size} bytes",
            pixels.len()
        )));
    }
    Ok((frame_type, pixels))
}

pub struct RlevFactory;

impl DecoderFactory for RlevFactory {
    fn output_format(&self, stream: &StreamDescriptor) -> Result<FrameFormat> {
        video_format(stream).map(FrameFormat::Video)
    }

    fn create(&self, stream: &StreamDescriptor) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(RlevDecoder { format: video_format(stream)?, time_base: stream.time_base }))
    }
}

impl EncoderFactory for RlevFactory {
    fn accepted_formats(&self, params: Option<&serde_json::Value>) -> Result<Vec<FormatCaps>> {
        RlevConfig::parse(params)?;
        Ok(vec![FormatCaps::any_video()])
    }

    fn output_stream(
        &self,
        format: &FrameFormat,
        time_base: Rational,
        params: Option<&serde_json::Value>,
    ) -> Result<StreamDescriptor> {
        let config = RlevConfig::parse(params)?;
        let video = format
            .as_video()
            .ok_or_else(|| TranscodeError::Configuration(format!("rlev encoder cannot take {format}")))?;
        let mut stream =
            with_video_params(StreamDescriptor::new(0, MediaKind::Video, RLEV, time_base), video);
        if config.b_frames > 0 {
            stream = stream.with_param("reorder_delay", 1);
        }
        Ok(stream)
    }

    fn create(
        &self,
        stream: &StreamDescriptor,
        format: &FrameFormat,
        params: Option<&serde_json::Value>,
    ) -> Result<Box<dyn Encoder>> {
        let config = RlevConfig::parse(params)?;
        let video = format
            .as_video()
            .ok_or_else(|| TranscodeError::Configuration(format!("rlev encoder cannot take {format}")))?;
        Ok(Box::new(RlevEncoder {
            stream_index: stream.index,
            format: *video,
            config,
            submitted: 0,
            since_key: None,
            held: Vec::new(),
        }))
    }
}

struct RlevDecoder {
    format: VideoFormat,
    time_base: Rational,
}

impl Decoder for RlevDecoder {
    fn decode(&mut self, packet: Packet) -> Result<DecodedFrames> {
        let (_, pixels) = decode_picture(&self.format, &packet.data)?;
        let mut out = DecodedFrames::new();
        out.push(
            Frame::video(packet.stream_index, self.format, pixels, packet.pts, self.time_base)
                .with_duration(packet.duration),
        );
        Ok(out)
    }
}

struct RlevEncoder {
    stream_index: usize,
    format: VideoFormat,
    config: RlevConfig,
    submitted: u64,
    /// Reference pictures emitted since the last I picture.
    since_key: Option<u32>,
    /// B pictures waiting for their next reference picture.
    held: Vec<Frame>,
}

impl RlevEncoder {
    fn reference_type(&mut self) -> FrameType {
        match self.since_key {
            Some(n) if n + 1 < self.config.gop_size => {
                self.since_key = Some(n + 1);
                FrameType::P
            },
            _ => {
                self.since_key = Some(0);
                FrameType::I
            },
        }
    }

    fn packet(&self, frame: &Frame, frame_type: FrameType) -> Result<Packet> {
        let pixels = frame
            .pixels()
            .filter(|_| frame.format == FrameFormat::Video(self.format))
            .ok_or_else(|| {
                TranscodeError::Encode(format!(
                    "rlev encoder configured for {} received {}",
                    FrameFormat::Video(self.format),
                    frame.format
                ))
            })?;
        let data = encode_picture(&self.format, pixels, frame_type)?;
        Ok(Packet::new(self.stream_index, data, frame.pts, frame.pts)
            .with_duration(frame.duration)
            .with_key(frame_type == FrameType::I))
    }

    fn emit_held(&mut self, out: &mut EncodedPackets) -> Result<()> {
        for frame in std::mem::take(&mut self.held) {
            out.push(self.packet(&frame, FrameType::B)?);
        }
        Ok(())
    }
}

impl Encoder for RlevEncoder {
    fn encode(&mut self, frame: Frame) -> Result<EncodedPackets> {
        let position = self.submitted;
        self.submitted += 1;
        let mut out = EncodedPackets::new();

        let is_reference = position % (u64::from(self.config.b_frames) + 1) == 0;
        if !is_reference {
            self.held.push(frame);
            return Ok(out);
        }
        let frame_type = self.reference_type();
        out.push(self.packet(&frame, frame_type)?);
        self.emit_held(&mut out)?;
        Ok(out)
    }

    fn delay(&self) -> usize {
        usize::from(self.config.b_frames > 0)
    }

    fn flush(&mut self) -> Result<EncodedPackets> {
        let mut out = EncodedPackets::new();
        if let Some(last) = self.held.pop() {
            // The trailing picture becomes the reference for the rest
            let frame_type = self.reference_type();
            out.push(self.packet(&last, frame_type)?);
            self.emit_held(&mut out)?;
        }
        Ok(out)
    }
}

#[allow(clippy::expect_used)]
pub fn register_rlev_codecs(registry: &mut FormatRegistry) {
    let factory = Arc::new(RlevFactory);
    let schema = serde_json::to_value(schemars::schema_for!(RlevConfig))
        .expect("RlevConfig schema should serialize to JSON");

    registry.register_decoder(
        CodecCapability::new(RLEV, ComponentKind::Decoder)
            .with_media(MediaKind::Video)
            .with_formats(vec![FormatCaps::any_video()])
            .with_description("Run-length coded video pictures."),
        factory.clone(),
    );
    registry.register_encoder(
        CodecCapability::new(RLEV, ComponentKind::Encoder)
            .with_media(MediaKind::Video)
            .with_formats(vec![FormatCaps::any_video()])
            .with_param_schema(schema)
            .with_description(
                "Run-length coded video pictures. `b_frames` holds pictures back until the \
                 next reference picture, producing packets in decode order.",
            ),
        factory,
    );
}
