// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `split` / `asplit`: fan one input out to several outputs.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_optional;
use transkit_core::pins::numbered;
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    Result, TranscodeError,
};

const fn default_outputs() -> usize {
    2
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct SplitConfig {
    #[serde(default = "default_outputs")]
    #[schemars(range(min = 1))]
    pub outputs: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { outputs: default_outputs() }
    }
}

pub struct SplitNode {
    media: MediaKind,
    outputs: usize,
}

impl SplitNode {
    /// # Errors
    ///
    /// `Configuration` when `outputs` is zero.
    pub fn from_params(media: MediaKind, params: Option<&serde_json::Value>) -> Result<Self> {
        let config: SplitConfig = parse_config_optional(params)?;
        if config.outputs == 0 {
            return Err(TranscodeError::Configuration("split needs at least one output".to_string()));
        }
        Ok(Self { media, outputs: config.outputs })
    }
}

impl FilterNode for SplitNode {
    fn input_ports(&self) -> Vec<InputPort> {
        let caps = match self.media {
            MediaKind::Video => FormatCaps::any_video(),
            MediaKind::Audio => FormatCaps::any_audio(),
        };
        vec![InputPort::new("in", vec![caps])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        (0..self.outputs)
            .map(|i| OutputPort::new(&numbered("out", i), Some(self.media)))
            .collect()
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        let format = inputs
            .first()
            .copied()
            .ok_or_else(|| TranscodeError::FormatNegotiation("split needs an input".to_string()))?;
        Ok(vec![format; self.outputs])
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        for frame in inputs {
            for port in 1..self.outputs {
                out.push(port, frame.clone());
            }
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
    use transkit_core::{PixelFormat, Rational, VideoFormat};

    #[test]
    fn test_every_output_gets_a_copy() {
        let mut node = SplitNode::from_params(MediaKind::Video, Some(&json!({ "outputs": 3 }))).unwrap();
        assert_eq!(node.output_ports().len(), 3);

        let format = VideoFormat { pixel_format: PixelFormat::Gray8, width: 1, height: 1 };
        let formats = node.configure(&[FrameFormat::Video(format)]).unwrap();
        assert_eq!(formats.len(), 3);

        let mut out = FilterOutput::new();
        node.process(vec![Frame::video(0, format, vec![7], 0, Rational::new(1, 25))], &mut out)
            .unwrap();
        let mut ports: Vec<usize> = out.drain().map(|(port, _)| port).collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![0, 1, 2]);
    }

    #[test]
    fn test_defaults_to_two_outputs() {
        let node = SplitNode::from_params(MediaKind::Audio, None).unwrap();
        assert_eq!(node.output_ports().len(), 2);
        assert!(SplitNode::from_params(MediaKind::Audio, Some(&json!({ "outputs": 0 }))).is_err());
    }
}
