// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `asetnsamples`: re-chunk audio into frames of a fixed sample count.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_optional;
use transkit_core::{
    AudioFormat, AudioSamples, FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort,
    MediaKind, OutputPort, Rational, Result, TranscodeError,
};

const fn default_nb_out_samples() -> usize {
    1024
}

const fn default_pad() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct AsetnsamplesConfig {
    /// Samples per channel in each output frame.
    #[serde(default = "default_nb_out_samples")]
    #[schemars(range(min = 1))]
    pub nb_out_samples: usize,
    /// Pad the last frame with silence up to `nb_out_samples`.
    #[serde(default = "default_pad")]
    pub pad: bool,
}

impl Default for AsetnsamplesConfig {
    fn default() -> Self {
        Self { nb_out_samples: default_nb_out_samples(), pad: default_pad() }
    }
}

pub struct AsetnsamplesNode {
    nb_out_samples: usize,
    pad: bool,
    format: Option<AudioFormat>,
    pending: Vec<f32>,
    /// pts of the first input frame, in the input time base.
    base: Option<(i64, Rational, usize)>,
    emitted: u64,
}

impl AsetnsamplesNode {
    /// # Errors
    ///
    /// `Configuration` when `nb_out_samples` is zero.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: AsetnsamplesConfig = parse_config_optional(params)?;
        if config.nb_out_samples == 0 {
            return Err(TranscodeError::Configuration(
                "asetnsamples nb_out_samples must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            nb_out_samples: config.nb_out_samples,
            pad: config.pad,
            format: None,
            pending: Vec::new(),
            base: None,
            emitted: 0,
        })
    }

    #[allow(clippy::cast_possible_wrap)]
    fn emit(&mut self, format: AudioFormat, samples: Vec<f32>, out: &mut FilterOutput) {
        let Some((start, time_base, stream_index)) = self.base else {
            return;
        };
        let channels = usize::from(format.channels.max(1));
        let frames = (samples.len() / channels) as u64;
        let rate_tb = Rational::new(1, i64::from(format.sample_rate.max(1)));
        let pts = start + rate_tb.rescale(self.emitted as i64, time_base);
        let duration = rate_tb.rescale(frames as i64, time_base);
        self.emitted += frames;
        let data = AudioSamples::from_f32(samples, format.sample_format);
        out.push(0, Frame::audio(stream_index, format, data, pts, time_base).with_duration(duration));
    }
}

impl FilterNode for AsetnsamplesNode {
    fn input_ports(&self) -> Vec<InputPort> {
        vec![InputPort::new("in", vec![FormatCaps::any_audio()])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(MediaKind::Audio))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        let Some(FrameFormat::Audio(format)) = inputs.first() else {
            return Err(TranscodeError::FormatNegotiation(
                "asetnsamples needs an audio input".to_string(),
            ));
        };
        self.format = Some(*format);
        Ok(vec![FrameFormat::Audio(*format)])
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        let format = self
            .format
            .ok_or_else(|| TranscodeError::Graph("asetnsamples used before configure".to_string()))?;
        let chunk = self.nb_out_samples * usize::from(format.channels.max(1));
        for frame in inputs {
            let Some(samples) = frame.samples() else {
                return Err(TranscodeError::Decode("asetnsamples received a video frame".to_string()));
            };
            self.base.get_or_insert((frame.pts, frame.time_base, frame.stream_index));
            self.pending.extend(samples.to_f32());
            while self.pending.len() >= chunk {
                let rest = self.pending.split_off(chunk);
                let full = std::mem::replace(&mut self.pending, rest);
                self.emit(format, full, out);
            }
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut FilterOutput) -> Result<()> {
        let Some(format) = self.format else {
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut tail = std::mem::take(&mut self.pending);
        if self.pad {
            tail.resize(self.nb_out_samples * usize::from(format.channels.max(1)), 0.0);
        }
        self.emit(format, tail, out);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use transkit_core::SampleFormat;

    fn run(params: serde_json::Value) -> Vec<(i64, usize)> {
        let mut node = AsetnsamplesNode::from_params(Some(&params)).unwrap();
        let format = AudioFormat { sample_format: SampleFormat::S16, sample_rate: 1000, channels: 2 };
        node.configure(&[FrameFormat::Audio(format)]).unwrap();
        let tb = Rational::new(1, 1000);
        let frames = vec![
            Frame::audio(0, format, AudioSamples::S16(vec![1; 2 * 150]), 100, tb),
            Frame::audio(0, format, AudioSamples::S16(vec![1; 2 * 100]), 250, tb),
        ];
        let mut out = FilterOutput::new();
        node.process(frames, &mut out).unwrap();
        node.flush(&mut out).unwrap();
        node.flush(&mut out).unwrap();
        out.drain().map(|(_, f)| (f.pts, f.sample_count())).collect()
    }

    #[test]
    fn test_rechunks_and_pads() {
        let got = run(json!({ "nb_out_samples": 100 }));
        assert_eq!(got, vec![(100, 100), (200, 100), (300, 100)]);
    }

    #[test]
    fn test_short_tail_without_padding() {
        let got = run(json!({ "nb_out_samples": 100, "pad": false }));
        assert_eq!(got, vec![(100, 100), (200, 100), (300, 50)]);
    }

    #[test]
    fn test_zero_samples_rejected() {
        assert!(AsetnsamplesNode::from_params(Some(&json!({ "nb_out_samples": 0 }))).is_err());
    }
}
