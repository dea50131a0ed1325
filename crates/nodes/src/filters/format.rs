// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `format` / `aformat`: constrain the formats flowing through an edge.
//!
//! The node itself forwards frames unchanged. Its input port advertises the
//! allowed formats, so negotiation inserts a `convert` in front of it whenever
//! the upstream format is not one of them.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_optional;
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    PixelFormat, Result, SampleFormat, TranscodeError,
};

#[derive(Deserialize, Debug, Clone, Default, JsonSchema)]
#[serde(default)]
pub struct FormatConfig {
    /// Allowed pixel formats (`gray8`, `rgb24`, `rgba`), in order of preference.
    pub pix_fmts: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, JsonSchema)]
#[serde(default)]
pub struct AudioFormatConfig {
    /// Allowed sample formats (`s16`, `f32`). Empty allows any.
    pub sample_fmts: Vec<String>,
    /// Allowed sample rates. Empty allows any.
    pub sample_rates: Vec<u32>,
    /// Allowed channel counts. Empty allows any.
    pub channel_counts: Vec<u16>,
}

pub struct FormatNode {
    media: MediaKind,
    accepts: Vec<FormatCaps>,
}

impl FormatNode {
    /// # Errors
    ///
    /// `Configuration` for malformed parameters or unknown pixel formats.
    pub fn video(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: FormatConfig = parse_config_optional(params)?;
        let accepts = if config.pix_fmts.is_empty() {
            vec![FormatCaps::any_video()]
        } else {
            config
                .pix_fmts
                .iter()
                .map(|name| name.parse::<PixelFormat>().map(FormatCaps::pixel))
                .collect::<Result<_>>()?
        };
        Ok(Self { media: MediaKind::Video, accepts })
    }

    /// Builds the cartesian product of the listed sample formats, rates and
    /// channel counts.
    ///
    /// # Errors
    ///
    /// `Configuration` for malformed parameters or unknown sample formats.
    pub fn audio(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: AudioFormatConfig = parse_config_optional(params)?;
        let formats: Vec<Option<SampleFormat>> = if config.sample_fmts.is_empty() {
            vec![None]
        } else {
            config
                .sample_fmts
                .iter()
                .map(|name| name.parse::<SampleFormat>().map(Some))
                .collect::<Result<_>>()?
        };
        let rates = if config.sample_rates.is_empty() { vec![0] } else { config.sample_rates };
        let channels =
            if config.channel_counts.is_empty() { vec![0] } else { config.channel_counts };
        if (rates.contains(&0) && rates.len() > 1) || (channels.contains(&0) && channels.len() > 1) {
            return Err(TranscodeError::Configuration(
                "aformat sample rates and channel counts must be positive".to_string(),
            ));
        }

        let mut accepts = Vec::with_capacity(formats.len() * rates.len() * channels.len());
        for sample_format in &formats {
            for sample_rate in &rates {
                for channel_count in &channels {
                    accepts.push(FormatCaps::Audio {
                        sample_format: *sample_format,
                        sample_rate: *sample_rate,
                        channels: *channel_count,
                    });
                }
            }
        }
        Ok(Self { media: MediaKind::Audio, accepts })
    }
}

impl FilterNode for FormatNode {
    fn input_ports(&self) -> Vec<InputPort> {
        vec![InputPort::new("in", self.accepts.clone())]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(self.media))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        match inputs.first() {
            Some(format) if self.accepts.iter().any(|caps| caps.matches(format)) => Ok(vec![*format]),
            other => Err(TranscodeError::FormatNegotiation(format!(
                "{} is not one of the allowed formats",
                other.map_or_else(|| "missing input".to_string(), ToString::to_string)
            ))),
        }
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        for frame in inputs {
            out.push(0, frame);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use transkit_core::AudioFormat;

    #[test]
    fn test_aformat_cartesian_product() {
        let node = FormatNode::audio(Some(&json!({
            "sample_fmts": ["s16", "f32"],
            "sample_rates": [44100, 48000],
        })))
        .unwrap();
        let ports = node.input_ports();
        let accepts = &ports[0].accepts;
        assert_eq!(accepts.len(), 4);
        assert!(accepts.contains(&FormatCaps::Audio {
            sample_format: Some(SampleFormat::F32),
            sample_rate: 44100,
            channels: 0,
        }));
    }

    #[test]
    fn test_format_rejects_unknown_pixel_format() {
        let err = FormatNode::video(Some(&json!({ "pix_fmts": ["yuv420p"] }))).err().unwrap();
        assert_eq!(err.kind(), transkit_core::ErrorKind::Configuration);
    }

    #[test]
    fn test_configure_requires_allowed_input() {
        let mut node = FormatNode::audio(Some(&json!({ "sample_rates": [8000] }))).unwrap();
        let wrong = FrameFormat::Audio(AudioFormat {
            sample_format: SampleFormat::S16,
            sample_rate: 16000,
            channels: 1,
        });
        assert!(node.configure(&[wrong]).is_err());
    }
}
