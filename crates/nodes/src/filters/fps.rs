// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `fps`: constant frame rate by duplicating or dropping frames.
//!
//! Output timestamps count frames in `1/fps`. One frame is held back: it is
//! emitted for every output slot before the next input frame's slot.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_required;
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    Rational, Result, TranscodeError,
};

const fn default_max_duplicates() -> u32 {
    1000
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct FpsConfig {
    /// Output frame rate in frames per second.
    #[schemars(range(min = 1))]
    pub fps: u32,
    /// Largest gap, in output frames, filled by repeating the previous frame.
    /// Wider gaps are left as a timestamp jump.
    #[serde(default = "default_max_duplicates")]
    pub max_duplicates: u32,
}

pub struct FpsNode {
    time_base: Rational,
    max_duplicates: i64,
    pending: Option<Frame>,
    next: i64,
}

impl FpsNode {
    /// # Errors
    ///
    /// `Configuration` when `fps` is missing or zero.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: FpsConfig = parse_config_required(params)?;
        if config.fps == 0 {
            return Err(TranscodeError::Configuration("fps must be greater than 0".to_string()));
        }
        Ok(Self {
            time_base: Rational::new(1, i64::from(config.fps)),
            max_duplicates: i64::from(config.max_duplicates),
            pending: None,
            next: 0,
        })
    }

    fn emit(&mut self, frame: &Frame, out: &mut FilterOutput) {
        let mut copy = frame.clone();
        copy.pts = self.next;
        copy.time_base = self.time_base;
        copy.duration = 1;
        out.push(0, copy);
        self.next += 1;
    }
}

impl FilterNode for FpsNode {
    fn input_ports(&self) -> Vec<InputPort> {
        vec![InputPort::new("in", vec![FormatCaps::any_video()])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(MediaKind::Video))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        Ok(inputs.to_vec())
    }

    fn output_time_base(&self, _input: Rational) -> Rational {
        self.time_base
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        for frame in inputs {
            let slot = frame.pts_in(self.time_base);
            match self.pending.take() {
                None => self.next = slot,
                Some(pending) => {
                    let gap = slot.saturating_sub(self.next);
                    if gap > self.max_duplicates {
                        tracing::warn!(
                            from = self.next,
                            to = slot,
                            max_duplicates = self.max_duplicates,
                            "Timestamp gap too wide to fill, skipping ahead"
                        );
                        self.emit(&pending, out);
                        self.next = slot;
                    }
                    while self.next < slot {
                        self.emit(&pending, out);
                    }
                },
            }
            self.pending = Some(frame);
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut FilterOutput) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            self.emit(&pending, out);
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

    fn frame(value: u8, pts: i64, tb: Rational) -> Frame {
        let format = VideoFormat { pixel_format: PixelFormat::Gray8, width: 1, height: 1 };
        Frame::video(0, format, vec![value], pts, tb)
    }

    fn run(node: &mut FpsNode, frames: Vec<Frame>) -> Vec<(i64, u8)> {
        let mut out = FilterOutput::new();
        node.process(frames, &mut out).unwrap();
        node.flush(&mut out).unwrap();
        out.drain().map(|(_, f)| (f.pts, f.pixels().unwrap()[0])).collect()
    }

    #[test]
    fn test_upsampling_duplicates_frames() {
        let mut node = FpsNode::from_params(Some(&json!({ "fps": 30 }))).unwrap();
        let tb = Rational::new(1, 10);
        let got = run(&mut node, vec![frame(1, 0, tb), frame(2, 1, tb), frame(3, 2, tb)]);
        assert_eq!(
            got,
            vec![(0, 1), (1, 1), (2, 1), (3, 2), (4, 2), (5, 2), (6, 3)]
        );
    }

    #[test]
    fn test_downsampling_drops_frames() {
        let mut node = FpsNode::from_params(Some(&json!({ "fps": 10 }))).unwrap();
        let tb = Rational::new(1, 30);
        let frames = (0..6).map(|i| frame(u8::try_from(i).unwrap(), i, tb)).collect();
        // Input pts round to slots 0,0,1,1,1,2; the last frame in each slot wins.
        assert_eq!(run(&mut node, frames), vec![(0, 1), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_wide_gap_is_not_filled() {
        let tb = Rational::new(1, 10);
        let mut node = FpsNode::from_params(Some(&json!({ "fps": 10, "max_duplicates": 5 }))).unwrap();
        assert_eq!(run(&mut node, vec![frame(1, 0, tb), frame(2, 1000, tb)]), vec![(0, 1), (1000, 2)]);

        // Gaps within the bound are still filled.
        let mut node = FpsNode::from_params(Some(&json!({ "fps": 10, "max_duplicates": 5 }))).unwrap();
        assert_eq!(run(&mut node, vec![frame(1, 0, tb), frame(2, 5, tb)]).len(), 6);

        let mut node = FpsNode::from_params(Some(&json!({ "fps": 10 }))).unwrap();
        let mut out = FilterOutput::new();
        node.process(vec![frame(1, 0, tb), frame(2, i64::MAX / 2, tb)], &mut out).unwrap();
        assert_eq!(out.drain().count(), 1);
    }

    #[test]
    fn test_flush_is_idempotent_and_rate_required() {
        let mut node = FpsNode::from_params(Some(&json!({ "fps": 25 }))).unwrap();
        let mut out = FilterOutput::new();
        node.flush(&mut out).unwrap();
        assert!(out.is_empty());
        assert!(FpsNode::from_params(Some(&json!({ "fps": 0 }))).is_err());
        assert!(FpsNode::from_params(None).is_err());
    }
}
