// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `amix`: sum several float audio inputs into one.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_optional;
use transkit_core::pins::numbered;
use transkit_core::{
    AudioFormat, AudioSamples, FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort,
    MediaKind, OutputPort, Result, SampleFormat, TranscodeError,
};

const fn default_inputs() -> usize {
    2
}

const fn default_normalize() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct AmixConfig {
    #[serde(default = "default_inputs")]
    #[schemars(range(min = 1))]
    pub inputs: usize,
    /// Divide the sum by the number of inputs.
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

impl Default for AmixConfig {
    fn default() -> Self {
        Self { inputs: default_inputs(), normalize: default_normalize() }
    }
}

pub struct AmixNode {
    inputs: usize,
    normalize: bool,
    format: Option<AudioFormat>,
}

impl AmixNode {
    /// # Errors
    ///
    /// `Configuration` when `inputs` is zero.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: AmixConfig = parse_config_optional(params)?;
        if config.inputs == 0 {
            return Err(TranscodeError::Configuration("amix needs at least one input".to_string()));
        }
        Ok(Self { inputs: config.inputs, normalize: config.normalize, format: None })
    }
}

impl FilterNode for AmixNode {
    fn input_ports(&self) -> Vec<InputPort> {
        (0..self.inputs)
            .map(|i| InputPort::new(&numbered("in", i), vec![FormatCaps::samples(SampleFormat::F32)]))
            .collect()
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(MediaKind::Audio))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        let mut formats = inputs.iter().map(FrameFormat::as_audio);
        let Some(Some(first)) = formats.next() else {
            return Err(TranscodeError::FormatNegotiation("amix needs audio inputs".to_string()));
        };
        for other in formats {
            match other {
                Some(other)
                    if other.sample_rate == first.sample_rate && other.channels == first.channels => {},
                _ => {
                    return Err(TranscodeError::FormatNegotiation(format!(
                        "amix inputs must share rate and channels with {}",
                        FrameFormat::Audio(*first)
                    )))
                },
            }
        }
        self.format = Some(*first);
        Ok(vec![FrameFormat::Audio(*first)])
    }

    #[allow(clippy::cast_precision_loss)]
    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        let format = self
            .format
            .ok_or_else(|| TranscodeError::Graph("amix used before configure".to_string()))?;
        let Some(first) = inputs.first() else {
            return Ok(());
        };
        let (stream_index, pts, time_base) = (first.stream_index, first.pts, first.time_base);

        let mut mixed: Vec<f32> = Vec::new();
        let mut duration = 0;
        for frame in &inputs {
            let samples = frame
                .samples()
                .ok_or_else(|| TranscodeError::Decode("amix received a video frame".to_string()))?
                .to_f32();
            if samples.len() > mixed.len() {
                mixed.resize(samples.len(), 0.0);
            }
            for (acc, sample) in mixed.iter_mut().zip(samples) {
                *acc += sample;
            }
            duration = duration.max(frame.duration);
        }
        if self.normalize {
            let scale = 1.0 / inputs.len() as f32;
            for sample in &mut mixed {
                *sample *= scale;
            }
        }
        let samples = AudioSamples::from_f32(mixed, format.sample_format);
        out.push(0, Frame::audio(stream_index, format, samples, pts, time_base).with_duration(duration));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use transkit_core::Rational;

    fn format(rate: u32) -> AudioFormat {
        AudioFormat { sample_format: SampleFormat::F32, sample_rate: rate, channels: 1 }
    }

    fn frame(samples: Vec<f32>) -> Frame {
        Frame::audio(0, format(8000), AudioSamples::F32(samples), 80, Rational::new(1, 8000))
    }

    #[test]
    fn test_mix_pads_shorter_input() {
        let mut node = AmixNode::from_params(None).unwrap();
        node.configure(&[FrameFormat::Audio(format(8000)), FrameFormat::Audio(format(8000))])
            .unwrap();
        let mut out = FilterOutput::new();
        node.process(vec![frame(vec![1.0, 0.5, 0.25]), frame(vec![1.0])], &mut out).unwrap();
        let (_, mixed) = out.drain().next().unwrap();
        assert_eq!(mixed.pts, 80);
        assert_eq!(mixed.samples().unwrap().to_f32(), vec![1.0, 0.25, 0.125]);
    }

    #[test]
    fn test_mix_without_normalization() {
        let mut node = AmixNode::from_params(Some(&json!({ "normalize": false }))).unwrap();
        node.configure(&[FrameFormat::Audio(format(8000)), FrameFormat::Audio(format(8000))])
            .unwrap();
        let mut out = FilterOutput::new();
        node.process(vec![frame(vec![0.25]), frame(vec![0.5])], &mut out).unwrap();
        let (_, mixed) = out.drain().next().unwrap();
        assert_eq!(mixed.samples().unwrap().to_f32(), vec![0.75]);
    }

    #[test]
    fn test_rate_mismatch_fails_negotiation() {
        let mut node = AmixNode::from_params(None).unwrap();
        let err = node
            .configure(&[FrameFormat::Audio(format(8000)), FrameFormat::Audio(format(16000))])
            .unwrap_err();
        assert_eq!(err.kind(), transkit_core::ErrorKind::FormatNegotiationError);
    }
}
