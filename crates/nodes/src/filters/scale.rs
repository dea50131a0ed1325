// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `scale` and `aresample`: explicit size and rate changes.

use super::convert::{convert_video, retime, AudioConverter};
use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::{parse_config_optional, parse_config_required};
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    Rational, Result, TranscodeError, VideoFormat,
};

#[derive(Deserialize, Debug, Clone, Default, JsonSchema)]
#[serde(default)]
pub struct ScaleConfig {
    /// Output width in pixels. 0 keeps the input width.
    pub width: u32,
    /// Output height in pixels. 0 keeps the input height.
    pub height: u32,
}

/// Nearest-neighbour picture resize.
pub struct ScaleNode {
    config: ScaleConfig,
    target: Option<VideoFormat>,
}

impl ScaleNode {
    /// # Errors
    ///
    /// `Configuration` for malformed parameters.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        Ok(Self { config: parse_config_optional(params)?, target: None })
    }
}

impl FilterNode for ScaleNode {
    fn input_ports(&self) -> Vec<InputPort> {
        vec![InputPort::new("in", vec![FormatCaps::any_video()])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(MediaKind::Video))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        let Some(FrameFormat::Video(input)) = inputs.first() else {
            return Err(TranscodeError::FormatNegotiation("scale needs a video input".to_string()));
        };
        let target = VideoFormat {
            pixel_format: input.pixel_format,
            width: if self.config.width == 0 { input.width } else { self.config.width },
            height: if self.config.height == 0 { input.height } else { self.config.height },
        };
        self.target = Some(target);
        Ok(vec![FrameFormat::Video(target)])
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        let target = self
            .target
            .ok_or_else(|| TranscodeError::Graph("scale used before configure".to_string()))?;
        for frame in inputs {
            out.push(0, convert_video(&frame, &target)?);
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct AresampleConfig {
    /// Output sample rate in Hz.
    #[schemars(range(min = 1))]
    pub sample_rate: u32,
}

/// Linear-interpolation sample rate change. Output time base is `1/sample_rate`.
pub struct AresampleNode {
    sample_rate: u32,
    converter: Option<AudioConverter>,
}

impl AresampleNode {
    /// # Errors
    ///
    /// `Configuration` when `sample_rate` is missing or zero.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: AresampleConfig = parse_config_required(params)?;
        if config.sample_rate == 0 {
            return Err(TranscodeError::Configuration(
                "aresample sample_rate must be greater than 0".to_string(),
            ));
        }
        Ok(Self { sample_rate: config.sample_rate, converter: None })
    }
}

impl FilterNode for AresampleNode {
    fn input_ports(&self) -> Vec<InputPort> {
        vec![InputPort::new("in", vec![FormatCaps::any_audio()])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(MediaKind::Audio))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        let Some(FrameFormat::Audio(input)) = inputs.first() else {
            return Err(TranscodeError::FormatNegotiation("aresample needs an audio input".to_string()));
        };
        let target = transkit_core::AudioFormat { sample_rate: self.sample_rate, ..*input };
        self.converter = Some(AudioConverter::new(*input, target));
        Ok(vec![FrameFormat::Audio(target)])
    }

    fn output_time_base(&self, _input: Rational) -> Rational {
        Rational::new(1, i64::from(self.sample_rate))
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        let converter = self
            .converter
            .as_mut()
            .ok_or_else(|| TranscodeError::Graph("aresample used before configure".to_string()))?;
        let tb = Rational::new(1, i64::from(self.sample_rate));
        for frame in inputs {
            if let Some(converted) = converter.convert(&frame)? {
                out.push(0, retime(converted, tb));
            }
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut FilterOutput) -> Result<()> {
        if let Some(tail) = self.converter.as_mut().and_then(AudioConverter::flush) {
            out.push(0, retime(tail, Rational::new(1, i64::from(self.sample_rate))));
        }
        Ok(())
    }
}
