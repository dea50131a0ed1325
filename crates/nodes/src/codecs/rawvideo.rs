// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Uncompressed packed pictures, one per packet.

use super::{video_format, with_video_params};
use std::sync::Arc;
use transkit_core::codec::{DecodedFrames, EncodedPackets};
use transkit_core::{
    CodecCapability, ComponentKind, Decoder, DecoderFactory, Encoder, EncoderFactory, FormatCaps,
    FormatRegistry, Frame, FrameFormat, MediaKind, Packet, Rational, Result, StreamDescriptor,
    TranscodeError, VideoFormat,
};

pub const RAWVIDEO: &str = "rawvideo";

pub struct RawVideoFactory;

impl DecoderFactory for RawVideoFactory {
    fn output_format(&self, stream: &StreamDescriptor) -> Result<FrameFormat> {
        video_format(stream).map(FrameFormat::Video)
    }

    fn create(&self, stream: &StreamDescriptor) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(RawVideoDecoder { format: video_format(stream)?, time_base: stream.time_base }))
    }
}

impl EncoderFactory for RawVideoFactory {
    fn accepted_formats(&self, _params: Option<&serde_json::Value>) -> Result<Vec<FormatCaps>> {
        Ok(vec![FormatCaps::any_video()])
    }

    fn output_stream(
        &self,
        format: &FrameFormat,
        time_base: Rational,
        _params: Option<&serde_json::Value>,
    ) -> Result<StreamDescriptor> {
        let video = format.as_video().ok_or_else(|| {
            TranscodeError::Configuration(format!("rawvideo encoder cannot take {format}"))
        })?;
        Ok(with_video_params(StreamDescriptor::new(0, MediaKind::Video, RAWVIDEO, time_base), video))
    }

    fn create(
        &self,
        stream: &StreamDescriptor,
        format: &FrameFormat,
        _params: Option<&serde_json::Value>,
    ) -> Result<Box<dyn Encoder>> {
        let video = format.as_video().ok_or_else(|| {
            TranscodeError::Configuration(format!("rawvideo encoder cannot take {format}"))
        })?;
        Ok(Box::new(RawVideoEncoder { stream_index: stream.index, format: *video }))
    }
}

struct RawVideoDecoder {
    format: VideoFormat,
    time_base: Rational,
}

impl Decoder for RawVideoDecoder {
    fn decode(&mut self, packet: Packet) -> Result<DecodedFrames> {
        if packet.data.len() != self.format.frame_size() {
            return Err(TranscodeError::Decode(format!(
                "rawvideo payload of {} bytes, expected {}",
                packet.data.len(),
                self.format.frame_size()
            )));
        }
        let mut out = DecodedFrames::new();
        out.push(
            Frame::video(packet.stream_index, self.format, packet.data, packet.pts, self.time_base)
                .with_duration(packet.duration),
        );
        Ok(out)
    }
}

struct RawVideoEncoder {
    stream_index: usize,
    format: VideoFormat,
}

impl Encoder for RawVideoEncoder {
    fn encode(&mut self, frame: Frame) -> Result<EncodedPackets> {
        let pixels = frame
            .pixels()
            .filter(|_| frame.format == FrameFormat::Video(self.format))
            .ok_or_else(|| {
                TranscodeError::Encode(format!(
                    "rawvideo encoder configured for {} received {}",
                    FrameFormat::Video(self.format),
                    frame.format
                ))
            })?;
        let mut out = EncodedPackets::new();
        out.push(
            Packet::new(self.stream_index, pixels.clone(), frame.pts, frame.pts)
                .with_duration(frame.duration),
        );
        Ok(out)
    }
}

pub fn register_rawvideo_codecs(registry: &mut FormatRegistry) {
    let factory = Arc::new(RawVideoFactory);
    registry.register_decoder(
        CodecCapability::new(RAWVIDEO, ComponentKind::Decoder)
            .with_media(MediaKind::Video)
            .with_formats(vec![FormatCaps::any_video()])
            .with_description("Uncompressed packed pictures."),
        factory.clone(),
    );
    registry.register_encoder(
        CodecCapability::new(RAWVIDEO, ComponentKind::Encoder)
            .with_media(MediaKind::Video)
            .with_formats(vec![FormatCaps::any_video()])
            .with_description("Uncompressed packed pictures."),
        factory,
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use transkit_core::{ErrorKind, PixelFormat};

    fn stream() -> StreamDescriptor {
        StreamDescriptor::new(0, MediaKind::Video, RAWVIDEO, Rational::new(1, 25))
            .with_param("width", 2)
            .with_param("height", 2)
            .with_param("pix_fmt", "gray8")
    }

    #[test]
    fn test_decode_checks_frame_size() {
        let mut decoder = DecoderFactory::create(&RawVideoFactory, &stream()).unwrap();
        let frames = decoder.decode(Packet::new(0, vec![1, 2, 3, 4], 7, 7).with_duration(1)).unwrap();
        assert_eq!(frames[0].pixels().map(|p| p.len()), Some(4));
        assert_eq!(frames[0].duration, 1);

        let err = decoder.decode(Packet::new(0, vec![1, 2, 3], 8, 8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn test_unknown_pixel_format_is_corrupt_header() {
        let bad = stream().with_param("pix_fmt", "yuv420p");
        assert_eq!(RawVideoFactory.output_format(&bad).unwrap_err().kind(), ErrorKind::CorruptHeader);
    }

    #[test]
    fn test_output_stream_carries_picture_params() {
        let format = FrameFormat::Video(VideoFormat { pixel_format: PixelFormat::Rgba, width: 8, height: 6 });
        let out = RawVideoFactory.output_stream(&format, Rational::new(1, 30), None).unwrap();
        assert_eq!(RawVideoFactory.output_format(&out).unwrap(), format);
    }
}
