// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `settb` / `asettb`: change the time base of a stream.

use super::convert::retime;
use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_required;
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    Rational, Result, TranscodeError,
};

/// Time base as `{num, den}` or a `"num/den"` string.
#[derive(Deserialize, Debug, Clone, JsonSchema)]
#[serde(untagged)]
pub enum TimeBaseParam {
    Rational(Rational),
    Text(String),
}

impl TimeBaseParam {
    /// # Errors
    ///
    /// `Configuration` when the value is not a positive fraction.
    pub fn resolve(&self) -> Result<Rational> {
        let tb = match self {
            Self::Rational(tb) => *tb,
            Self::Text(text) => {
                let invalid =
                    || TranscodeError::Configuration(format!("invalid time base '{text}'"));
                let (num, den) = text.split_once('/').ok_or_else(invalid)?;
                Rational::new(
                    num.trim().parse().map_err(|_| invalid())?,
                    den.trim().parse().map_err(|_| invalid())?,
                )
            },
        };
        if !tb.is_valid() {
            return Err(TranscodeError::Configuration(format!("time base {tb} must be positive")));
        }
        Ok(tb)
    }
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct SetTbConfig {
    pub tb: TimeBaseParam,
}

pub struct SetTbNode {
    media: MediaKind,
    time_base: Rational,
}

impl SetTbNode {
    /// # Errors
    ///
    /// `Configuration` when `tb` is missing or invalid.
    pub fn from_params(media: MediaKind, params: Option<&serde_json::Value>) -> Result<Self> {
        let config: SetTbConfig = parse_config_required(params)?;
        Ok(Self { media, time_base: config.tb.resolve()? })
    }
}

impl FilterNode for SetTbNode {
    fn input_ports(&self) -> Vec<InputPort> {
        let caps = match self.media {
            MediaKind::Video => FormatCaps::any_video(),
            MediaKind::Audio => FormatCaps::any_audio(),
        };
        vec![InputPort::new("in", vec![caps])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(self.media))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        Ok(inputs.to_vec())
    }

    fn output_time_base(&self, _input: Rational) -> Rational {
        self.time_base
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        for frame in inputs {
            out.push(0, retime(frame, self.time_base));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use transkit_core::{PixelFormat, VideoFormat};

    #[test]
    fn test_rescales_timestamps() {
        let mut node = SetTbNode::from_params(MediaKind::Video, Some(&json!({ "tb": "1/90000" })))
            .unwrap();
        assert_eq!(node.output_time_base(Rational::new(1, 25)), Rational::new(1, 90_000));

        let format = VideoFormat { pixel_format: PixelFormat::Gray8, width: 1, height: 1 };
        let frame = Frame::video(0, format, vec![0], 3, Rational::new(1, 25)).with_duration(1);
        let mut out = FilterOutput::new();
        node.process(vec![frame], &mut out).unwrap();
        let (_, frame) = out.drain().next().unwrap();
        assert_eq!((frame.pts, frame.duration), (10_800, 3600));
        assert_eq!(frame.time_base, Rational::new(1, 90_000));
    }

    #[test]
    fn test_accepts_structured_time_base() {
        let params = json!({ "tb": { "num": 1, "den": 48000 } });
        let node = SetTbNode::from_params(MediaKind::Audio, Some(&params)).unwrap();
        assert_eq!(node.time_base, Rational::new(1, 48000));
    }

    #[test]
    fn test_rejects_invalid_time_base() {
        for tb in ["abc", "1/0", "-1/25"] {
            assert!(SetTbNode::from_params(MediaKind::Video, Some(&json!({ "tb": tb }))).is_err());
        }
    }
}
