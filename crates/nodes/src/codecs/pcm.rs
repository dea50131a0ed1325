// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Interleaved little-endian PCM (`pcm_s16le`, `pcm_f32le`).

use super::header_param;
use std::sync::Arc;
use transkit_core::codec::{DecodedFrames, EncodedPackets};
use transkit_core::{
    AudioFormat, AudioSamples, CodecCapability, ComponentKind, Decoder, DecoderFactory, Encoder,
    EncoderFactory, FormatCaps, FormatRegistry, Frame, FrameFormat, MediaKind, Packet, Rational,
    Result, SampleFormat, StreamDescriptor, TranscodeError,
};

pub const PCM_S16LE: &str = "pcm_s16le";
pub const PCM_F32LE: &str = "pcm_f32le";

pub const fn codec_id(format: SampleFormat) -> &'static str {
    match format {
        SampleFormat::S16 => PCM_S16LE,
        SampleFormat::F32 => PCM_F32LE,
    }
}

/// Decoder and encoder factory for one PCM sample layout.
pub struct PcmFactory {
    format: SampleFormat,
}

impl PcmFactory {
    pub const fn new(format: SampleFormat) -> Self {
        Self { format }
    }
}

impl DecoderFactory for PcmFactory {
    fn output_format(&self, stream: &StreamDescriptor) -> Result<FrameFormat> {
        let channels = u16::try_from(header_param(stream, "channels")?).map_err(|_| {
            TranscodeError::CorruptHeader(format!("Stream {} channel count out of range", stream.index))
        })?;
        Ok(FrameFormat::Audio(AudioFormat {
            sample_format: self.format,
            sample_rate: header_param(stream, "sample_rate")?,
            channels,
        }))
    }

    fn create(&self, stream: &StreamDescriptor) -> Result<Box<dyn Decoder>> {
        let FrameFormat::Audio(format) = self.output_format(stream)? else {
            return Err(TranscodeError::CorruptHeader("PCM stream is not audio".to_string()));
        };
        Ok(Box::new(PcmDecoder { format, time_base: stream.time_base }))
    }
}

impl EncoderFactory for PcmFactory {
    fn accepted_formats(&self, _params: Option<&serde_json::Value>) -> Result<Vec<FormatCaps>> {
        Ok(vec![FormatCaps::samples(self.format)])
    }

    fn output_stream(
        &self,
        format: &FrameFormat,
        time_base: Rational,
        _params: Option<&serde_json::Value>,
    ) -> Result<StreamDescriptor> {
        let audio = self.check_input(format)?;
        Ok(StreamDescriptor::new(0, MediaKind::Audio, codec_id(self.format), time_base)
            .with_param("sample_rate", audio.sample_rate)
            .with_param("channels", audio.channels))
    }

    fn create(
        &self,
        stream: &StreamDescriptor,
        format: &FrameFormat,
        _params: Option<&serde_json::Value>,
    ) -> Result<Box<dyn Encoder>> {
        self.check_input(format)?;
        Ok(Box::new(PcmEncoder { stream_index: stream.index, format: self.format }))
    }
}

impl PcmFactory {
    fn check_input<'a>(&self, format: &'a FrameFormat) -> Result<&'a AudioFormat> {
        match format.as_audio() {
            Some(audio) if audio.sample_format == self.format => Ok(audio),
            _ => Err(TranscodeError::Configuration(format!(
                "{} encoder cannot take {format}",
                codec_id(self.format)
            ))),
        }
    }
}

struct PcmDecoder {
    format: AudioFormat,
    time_base: Rational,
}

impl Decoder for PcmDecoder {
    fn decode(&mut self, packet: Packet) -> Result<DecodedFrames> {
        let block = usize::from(self.format.channels) * self.format.sample_format.bytes_per_sample();
        if packet.data.len() % block != 0 {
            return Err(TranscodeError::Decode(format!(
                "PCM payload of {} bytes is not a whole number of {block}-byte sample frames",
                packet.data.len()
            )));
        }

        let samples = match self.format.sample_format {
            SampleFormat::S16 => AudioSamples::S16(
                packet.data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect(),
            ),
            SampleFormat::F32 => AudioSamples::F32(
                packet
                    .data
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
        };
        #[allow(clippy::cast_possible_wrap)]
        let frames = (packet.data.len() / block) as i64;
        let duration =
            Rational::new(1, i64::from(self.format.sample_rate)).rescale(frames, self.time_base);

        let mut out = DecodedFrames::new();
        out.push(
            Frame::audio(packet.stream_index, self.format, samples, packet.pts, self.time_base)
                .with_duration(duration),
        );
        Ok(out)
    }
}

struct PcmEncoder {
    stream_index: usize,
    format: SampleFormat,
}

impl Encoder for PcmEncoder {
    fn encode(&mut self, frame: Frame) -> Result<EncodedPackets> {
        let samples = frame
            .samples()
            .ok_or_else(|| TranscodeError::Encode("PCM encoder received a video frame".to_string()))?;
        let data: Vec<u8> = match (samples, self.format) {
            (AudioSamples::S16(s), SampleFormat::S16) => s.iter().flat_map(|v| v.to_le_bytes()).collect(),
            (AudioSamples::F32(s), SampleFormat::F32) => s.iter().flat_map(|v| v.to_le_bytes()).collect(),
            (other, expected) => {
                return Err(TranscodeError::Encode(format!(
                    "PCM encoder expects {} samples, got {}",
                    expected.as_str(),
                    other.sample_format().as_str()
                )))
            },
        };

        let mut out = EncodedPackets::new();
        out.push(Packet::new(self.stream_index, data, frame.pts, frame.pts).with_duration(frame.duration));
        Ok(out)
    }
}

pub fn register_pcm_codecs(registry: &mut FormatRegistry) {
    for format in [SampleFormat::S16, SampleFormat::F32] {
        let id = codec_id(format);
        let factory = Arc::new(PcmFactory::new(format));
        let description = format!("Interleaved little-endian {} PCM.", format.as_str());

        registry.register_decoder(
            CodecCapability::new(id, ComponentKind::Decoder)
                .with_media(MediaKind::Audio)
                .with_formats(vec![FormatCaps::samples(format)])
                .with_description(&description),
            factory.clone(),
        );
        registry.register_encoder(
            CodecCapability::new(id, ComponentKind::Encoder)
                .with_media(MediaKind::Audio)
                .with_formats(vec![FormatCaps::samples(format)])
                .with_description(&description),
            factory,
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use transkit_core::ErrorKind;

    fn stream(codec: &str) -> StreamDescriptor {
        StreamDescriptor::new(0, MediaKind::Audio, codec, Rational::new(1, 48000))
            .with_param("sample_rate", 48000)
            .with_param("channels", 2)
    }

    #[test]
    fn test_decode_s16_frame() {
        let factory = PcmFactory::new(SampleFormat::S16);
        let mut decoder = DecoderFactory::create(&factory, &stream(PCM_S16LE)).unwrap();
        let data: Vec<u8> = [1i16, -1, 2, -2].iter().flat_map(|v| v.to_le_bytes()).collect();
        let frames = decoder.decode(Packet::new(0, data, 960, 960)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples(), Some(&AudioSamples::S16(vec![1, -1, 2, -2])));
        assert_eq!(frames[0].sample_count(), 2);
        assert_eq!(frames[0].duration, 2);
        assert_eq!(frames[0].pts, 960);
    }

    #[test]
    fn test_partial_sample_frame_is_decode_error() {
        let factory = PcmFactory::new(SampleFormat::F32);
        let mut decoder = DecoderFactory::create(&factory, &stream(PCM_F32LE)).unwrap();
        let err = decoder.decode(Packet::new(0, vec![0u8; 12], 0, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_missing_params_are_corrupt_header() {
        let factory = PcmFactory::new(SampleFormat::S16);
        let bare = StreamDescriptor::new(0, MediaKind::Audio, PCM_S16LE, Rational::new(1, 8000));
        assert_eq!(factory.output_format(&bare).unwrap_err().kind(), ErrorKind::CorruptHeader);
        let zero = bare.with_param("sample_rate", 0).with_param("channels", 1);
        assert_eq!(factory.output_format(&zero).unwrap_err().kind(), ErrorKind::CorruptHeader);
    }

    #[test]
    fn test_encode_matches_decoded_bytes() {
        let factory = PcmFactory::new(SampleFormat::F32);
        let FrameFormat::Audio(format) = factory.output_format(&stream(PCM_F32LE)).unwrap() else {
            unreachable!()
        };
        let out_stream = factory
            .output_stream(&FrameFormat::Audio(format), Rational::new(1, 48000), None)
            .unwrap();
        assert_eq!(out_stream.codec, PCM_F32LE);
        assert_eq!(out_stream.param_u64("channels"), Some(2));

        let mut encoder =
            EncoderFactory::create(&factory, &out_stream, &FrameFormat::Audio(format), None).unwrap();
        let frame = Frame::audio(0, format, AudioSamples::F32(vec![0.5, -0.5]), 10, Rational::new(1, 48000))
            .with_duration(1);
        let packets = encoder.encode(frame).unwrap();
        assert_eq!(packets[0].data.len(), 8);
        assert_eq!(packets[0].duration, 1);
        assert_eq!(&packets[0].data[..4], &0.5f32.to_le_bytes());
    }

    #[test]
    fn test_encoder_rejects_other_sample_format() {
        let factory = PcmFactory::new(SampleFormat::S16);
        let format = FrameFormat::Audio(AudioFormat {
            sample_format: SampleFormat::F32,
            sample_rate: 8000,
            channels: 1,
        });
        let err = factory.output_stream(&format, Rational::new(1, 8000), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
