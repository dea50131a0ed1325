// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Format conversion: pixel layouts, picture size, sample formats, channel
//! layouts and sample rates.
//!
//! The `convert` node is what the graph inserts on an edge whose produced format
//! is not accepted downstream. `scale` and `aresample` reuse the same machinery.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_required;
use transkit_core::{
    AudioFormat, AudioSamples, FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat,
    InputPort, OutputPort, PixelFormat, Rational, Result, TranscodeError, VideoFormat,
};

/// Converts packed pixels between layouts. Gray is derived with integer BT.601 luma.
pub fn convert_pixels(src: &[u8], from: PixelFormat, to: PixelFormat) -> Vec<u8> {
    if from == to {
        return src.to_vec();
    }
    let pixels = src.chunks_exact(from.bytes_per_pixel());
    let mut out = Vec::with_capacity(pixels.len() * to.bytes_per_pixel());
    for px in pixels {
        let (r, g, b, a) = match from {
            PixelFormat::Gray8 => (px[0], px[0], px[0], u8::MAX),
            PixelFormat::Rgb24 => (px[0], px[1], px[2], u8::MAX),
            PixelFormat::Rgba => (px[0], px[1], px[2], px[3]),
        };
        match to {
            PixelFormat::Gray8 => {
                let luma = (77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8;
                #[allow(clippy::cast_possible_truncation)]
                out.push(luma.min(255) as u8);
            },
            PixelFormat::Rgb24 => out.extend_from_slice(&[r, g, b]),
            PixelFormat::Rgba => out.extend_from_slice(&[r, g, b, a]),
        }
    }
    out
}

/// Nearest-neighbour resize of a packed picture.
pub fn scale_nearest(src: &[u8], from: &VideoFormat, width: u32, height: u32) -> Vec<u8> {
    if from.width == width && from.height == height {
        return src.to_vec();
    }
    let bpp = from.pixel_format.bytes_per_pixel();
    let (sw, sh) = (from.width as usize, from.height as usize);
    let (dw, dh) = (width as usize, height as usize);
    let mut out = Vec::with_capacity(dw * dh * bpp);
    for y in 0..dh {
        let sy = y * sh / dh;
        for x in 0..dw {
            let sx = x * sw / dw;
            let at = (sy * sw + sx) * bpp;
            out.extend_from_slice(&src[at..at + bpp]);
        }
    }
    out
}

/// Converts one picture to `target` (pixel layout first, then size).
///
/// # Errors
///
/// `Decode` when the frame is not a video frame or its payload does not match its format.
pub fn convert_video(frame: &Frame, target: &VideoFormat) -> Result<Frame> {
    let (Some(pixels), Some(source)) = (frame.pixels(), frame.format.as_video()) else {
        return Err(TranscodeError::Decode("Video conversion received a non-video frame".to_string()));
    };
    if pixels.len() != source.frame_size() {
        return Err(TranscodeError::Decode(format!(
            "Picture of {} bytes does not match {}",
            pixels.len(),
            frame.format
        )));
    }
    if source == target {
        return Ok(frame.clone());
    }
    let converted = convert_pixels(pixels, source.pixel_format, target.pixel_format);
    let intermediate = VideoFormat { pixel_format: target.pixel_format, ..*source };
    let scaled = scale_nearest(&converted, &intermediate, target.width, target.height);
    Ok(Frame::video(frame.stream_index, *target, scaled, frame.pts, frame.time_base)
        .with_duration(frame.duration))
}

/// Expresses a frame's pts and duration in another time base.
pub fn retime(mut frame: Frame, time_base: Rational) -> Frame {
    if frame.time_base != time_base {
        frame.pts = frame.pts_in(time_base);
        frame.duration = frame.time_base.rescale(frame.duration, time_base);
        frame.time_base = time_base;
    }
    frame
}

/// Maps interleaved samples from one channel count to another.
///
/// Upmixing repeats source channels cyclically; downmixing averages every source
/// channel into output channel `i % to`.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let (from, to) = (usize::from(from), usize::from(to));
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to > from {
            out.extend((0..to).map(|c| frame[c % from]));
        } else {
            for c in 0..to {
                let (sum, n) = frame
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % to == c)
                    .fold((0.0f32, 0u16), |(s, n), (_, v)| (s + v, n + 1));
                out.push(sum / f32::from(n.max(1)));
            }
        }
    }
    out
}

/// Streaming linear-interpolation resampler over interleaved `f32` samples.
///
/// Output sample `k` sits at input position `k * from / to`; positions are kept
/// as exact integers so long streams do not drift.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u64,
    to_rate: u64,
    channels: usize,
    /// Input frames consumed so far.
    consumed: u64,
    /// Output frames produced so far.
    produced: u64,
    /// Last input frame of the previous chunk.
    previous: Vec<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            from_rate: u64::from(from_rate.max(1)),
            to_rate: u64::from(to_rate.max(1)),
            channels: usize::from(channels.max(1)),
            consumed: 0,
            produced: 0,
            previous: Vec::new(),
        }
    }

    pub const fn produced(&self) -> u64 {
        self.produced
    }

    /// Position of the next output frame: integer input index and the
    /// fractional part as a ratio over `to_rate`.
    const fn position(&self) -> (u64, u64) {
        let scaled = self.produced * self.from_rate;
        (scaled / self.to_rate, scaled % self.to_rate)
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let ch = self.channels;
        let frames = (input.len() / ch) as u64;
        if frames == 0 {
            return Vec::new();
        }
        let base = self.consumed;
        let end = base + frames;
        let sample = |idx: u64, c: usize| -> f32 {
            if idx < base {
                self.previous.get(c).copied().unwrap_or(0.0)
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let at = (idx - base) as usize * ch + c;
                input[at]
            }
        };

        let mut out = Vec::new();
        let mut produced = self.produced;
        loop {
            let scaled = produced * self.from_rate;
            let (i, frac) = (scaled / self.to_rate, scaled % self.to_rate);
            if i + 1 >= end {
                break;
            }
            #[allow(clippy::cast_precision_loss)]
            let t = frac as f32 / self.to_rate as f32;
            for c in 0..ch {
                let a = sample(i, c);
                let b = sample(i + 1, c);
                out.push((b - a).mul_add(t, a));
            }
            produced += 1;
        }

        self.produced = produced;
        self.consumed = end;
        #[allow(clippy::cast_possible_truncation)]
        let last = frames as usize * ch;
        self.previous = input[last - ch..last].to_vec();
        out
    }

    /// Emits the tail: outputs that fall between the last input frame and the end
    /// of the input duration, holding the last value. Idempotent.
    pub fn flush(&mut self) -> Vec<f32> {
        let expected = (self.consumed * self.to_rate).div_ceil(self.from_rate);
        let mut out = Vec::new();
        while self.produced < expected && !self.previous.is_empty() {
            let (i, _) = self.position();
            if i >= self.consumed {
                break;
            }
            out.extend_from_slice(&self.previous);
            self.produced += 1;
        }
        out
    }
}

/// Stateful audio converter: sample format, channel layout and rate.
#[derive(Debug, Clone)]
pub struct AudioConverter {
    source: AudioFormat,
    target: AudioFormat,
    resampler: Option<LinearResampler>,
    /// Output pts of the first resampled frame, in `1/target.sample_rate`.
    start_pts: Option<i64>,
    last_frame: Option<(usize, Rational)>,
}

impl AudioConverter {
    pub fn new(source: AudioFormat, target: AudioFormat) -> Self {
        let resampler = (source.sample_rate != target.sample_rate)
            .then(|| LinearResampler::new(source.sample_rate, target.sample_rate, target.channels));
        Self { source, target, resampler, start_pts: None, last_frame: None }
    }

    /// Output time base: `1/target_rate` when resampling, else unchanged.
    pub fn time_base(&self, input: Rational) -> Rational {
        if self.resampler.is_some() {
            Rational::new(1, i64::from(self.target.sample_rate))
        } else {
            input
        }
    }

    /// # Errors
    ///
    /// `Decode` when the frame does not carry audio in the configured source format.
    pub fn convert(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        let samples = match (frame.samples(), frame.format.as_audio()) {
            (Some(samples), Some(format)) if *format == self.source => samples,
            _ => {
                return Err(TranscodeError::Decode(format!(
                    "Audio conversion configured for {} received {}",
                    FrameFormat::Audio(self.source),
                    frame.format
                )))
            },
        };
        if self.source == self.target {
            return Ok(Some(frame.clone()));
        }

        let remixed = remix(&samples.to_f32(), self.source.channels, self.target.channels);
        let Some(resampler) = self.resampler.as_mut() else {
            let converted = AudioSamples::from_f32(remixed, self.target.sample_format);
            return Ok(Some(
                Frame::audio(frame.stream_index, self.target, converted, frame.pts, frame.time_base)
                    .with_duration(frame.duration),
            ));
        };

        let out_tb = Rational::new(1, i64::from(self.target.sample_rate));
        let start = *self.start_pts.get_or_insert_with(|| frame.pts_in(out_tb));
        self.last_frame = Some((frame.stream_index, frame.time_base));
        #[allow(clippy::cast_possible_wrap)]
        let pts = start + resampler.produced() as i64;
        let resampled = resampler.process(&remixed);
        Ok(self.finish(frame.stream_index, resampled, pts))
    }

    /// Emits the resampler tail, if any.
    pub fn flush(&mut self) -> Option<Frame> {
        let (stream_index, _) = self.last_frame?;
        let resampler = self.resampler.as_mut()?;
        #[allow(clippy::cast_possible_wrap)]
        let pts = self.start_pts.unwrap_or(0) + resampler.produced() as i64;
        let tail = resampler.flush();
        self.finish(stream_index, tail, pts)
    }

    fn finish(&self, stream_index: usize, samples: Vec<f32>, pts: i64) -> Option<Frame> {
        if samples.is_empty() {
            return None;
        }
        let frames = samples.len() / usize::from(self.target.channels.max(1));
        let out_tb = Rational::new(1, i64::from(self.target.sample_rate));
        let converted = AudioSamples::from_f32(samples, self.target.sample_format);
        #[allow(clippy::cast_possible_wrap)]
        Some(Frame::audio(stream_index, self.target, converted, pts, out_tb).with_duration(frames as i64))
    }
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct ConvertConfig {
    /// Target format. Wildcards are not allowed here; the graph fills them in.
    pub format: FrameFormat,
}

enum Converter {
    Video(VideoFormat),
    Audio(AudioConverter),
}

/// Implicit conversion node inserted by graph negotiation.
pub struct ConvertNode {
    target: FrameFormat,
    converter: Option<Converter>,
}

impl ConvertNode {
    pub const fn new(target: FrameFormat) -> Self {
        Self { target, converter: None }
    }

    /// # Errors
    ///
    /// `Configuration` when `format` is missing or malformed.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: ConvertConfig = parse_config_required(params)?;
        Ok(Self::new(config.format))
    }
}

impl FilterNode for ConvertNode {
    fn input_ports(&self) -> Vec<InputPort> {
        let accepts = match self.target {
            FrameFormat::Video(_) => FormatCaps::any_video(),
            FrameFormat::Audio(_) => FormatCaps::any_audio(),
        };
        vec![InputPort::new("in", vec![accepts])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(self.target.media()))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        self.converter = Some(match (inputs.first(), self.target) {
            (Some(FrameFormat::Video(_)), FrameFormat::Video(target)) => Converter::Video(target),
            (Some(FrameFormat::Audio(source)), FrameFormat::Audio(target)) => {
                Converter::Audio(AudioConverter::new(*source, target))
            },
            (input, _) => {
                return Err(TranscodeError::FormatNegotiation(format!(
                    "Cannot convert {} into {}",
                    input.map_or_else(|| "nothing".to_string(), ToString::to_string),
                    self.target
                )))
            },
        });
        Ok(vec![self.target])
    }

    fn output_time_base(&self, input: Rational) -> Rational {
        match &self.converter {
            Some(Converter::Audio(audio)) => audio.time_base(input),
            _ => input,
        }
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        let Some(converter) = self.converter.as_mut() else {
            return Err(TranscodeError::Graph("convert used before configure".to_string()));
        };
        for frame in inputs {
            match converter {
                Converter::Video(target) => out.push(0, convert_video(&frame, target)?),
                Converter::Audio(audio) => {
                    if let Some(converted) = audio.convert(&frame)? {
                        out.push(0, converted);
                    }
                },
            }
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut FilterOutput) -> Result<()> {
        if let Some(Converter::Audio(audio)) = self.converter.as_mut() {
            if let Some(tail) = audio.flush() {
                out.push(0, tail);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use transkit_core::SampleFormat;

    #[test]
    fn test_pixel_conversions() {
        assert_eq!(convert_pixels(&[10, 20, 30], PixelFormat::Rgb24, PixelFormat::Rgba), vec![10, 20, 30, 255]);
        assert_eq!(convert_pixels(&[9], PixelFormat::Gray8, PixelFormat::Rgb24), vec![9, 9, 9]);
        assert_eq!(convert_pixels(&[255, 255, 255], PixelFormat::Rgb24, PixelFormat::Gray8), vec![255]);
    }

    #[test]
    fn test_nearest_scaling() {
        let format = VideoFormat { pixel_format: PixelFormat::Gray8, width: 2, height: 2 };
        assert_eq!(scale_nearest(&[1, 2, 3, 4], &format, 4, 1), vec![1, 1, 2, 2]);
        assert_eq!(scale_nearest(&[1, 2, 3, 4], &format, 1, 1), vec![1]);
    }

    #[test]
    fn test_remix() {
        assert_eq!(remix(&[0.5, 1.0], 1, 2), vec![0.5, 0.5, 1.0, 1.0]);
        assert_eq!(remix(&[0.25, 0.75, 0.5, 1.0], 2, 1), vec![0.5, 0.75]);
    }

    #[test]
    fn test_resampler_length_and_continuity() {
        // 2:1 upsampling of a ramp across two chunks
        let mut resampler = LinearResampler::new(1, 2, 1);
        let mut out = resampler.process(&[0.0, 1.0]);
        out.extend(resampler.process(&[2.0, 3.0]));
        out.extend(resampler.flush());
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.0]);
        assert!(resampler.flush().is_empty());
    }

    #[test]
    fn test_resampler_downsamples_exact_count() {
        let mut resampler = LinearResampler::new(48000, 16000, 1);
        let input = vec![0.25f32; 4800];
        let mut total = resampler.process(&input).len();
        total += resampler.flush().len();
        assert_eq!(total, 1600);
    }

    #[test]
    fn test_convert_node_resamples_and_retimes() {
        let source = AudioFormat { sample_format: SampleFormat::S16, sample_rate: 8000, channels: 1 };
        let target = AudioFormat { sample_format: SampleFormat::F32, sample_rate: 16000, channels: 2 };
        let mut node = ConvertNode::new(FrameFormat::Audio(target));
        assert_eq!(node.configure(&[FrameFormat::Audio(source)]).unwrap(), vec![FrameFormat::Audio(target)]);
        assert_eq!(node.output_time_base(Rational::new(1, 8000)), Rational::new(1, 16000));

        let frame = Frame::audio(0, source, AudioSamples::S16(vec![0; 80]), 800, Rational::new(1, 8000));
        let mut out = FilterOutput::new();
        node.process(vec![frame], &mut out).unwrap();
        node.flush(&mut out).unwrap();
        let frames: Vec<Frame> = out.drain().map(|(_, f)| f).collect();
        assert_eq!(frames[0].pts, 1600);
        assert_eq!(frames[0].time_base, Rational::new(1, 16000));
        let total: usize = frames.iter().map(Frame::sample_count).sum();
        assert_eq!(total, 160);
    }
}
