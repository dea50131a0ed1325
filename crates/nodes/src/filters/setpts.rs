// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `setpts` / `asetpts`: rewrite presentation timestamps.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_optional;
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    Rational, Result, TranscodeError,
};

/// Timestamp expression.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub enum PtsExpr {
    /// Keep the input timestamp.
    #[default]
    #[serde(rename = "PTS")]
    Pts,
    /// Shift so the first frame starts at zero.
    #[serde(rename = "PTS-STARTPTS")]
    PtsMinusStart,
    /// Frame index for video, sample offset for audio.
    #[serde(rename = "N")]
    Count,
}

#[derive(Deserialize, Debug, Clone, JsonSchema)]
#[serde(default)]
pub struct SetPtsConfig {
    pub expr: PtsExpr,
    /// Playback speed factor; timestamps and durations are divided by it.
    pub speed: f64,
}

impl Default for SetPtsConfig {
    fn default() -> Self {
        Self { expr: PtsExpr::Pts, speed: 1.0 }
    }
}

pub struct SetPtsNode {
    media: MediaKind,
    expr: PtsExpr,
    speed: f64,
    start: Option<i64>,
    /// Frames seen (video) or samples seen (audio).
    count: u64,
}

impl SetPtsNode {
    /// # Errors
    ///
    /// `Configuration` for an unknown expression or a non-positive speed.
    pub fn from_params(media: MediaKind, params: Option<&serde_json::Value>) -> Result<Self> {
        let config: SetPtsConfig = parse_config_optional(params)?;
        if !(config.speed.is_finite() && config.speed > 0.0) {
            return Err(TranscodeError::Configuration(format!(
                "setpts speed must be positive, got {}",
                config.speed
            )));
        }
        Ok(Self { media, expr: config.expr, speed: config.speed, start: None, count: 0 })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn scaled(&self, value: i64) -> i64 {
        if (self.speed - 1.0).abs() < f64::EPSILON {
            value
        } else {
            (value as f64 / self.speed).round() as i64
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn base_pts(&mut self, frame: &Frame) -> i64 {
        let start = *self.start.get_or_insert(frame.pts);
        match self.expr {
            PtsExpr::Pts => frame.pts,
            PtsExpr::PtsMinusStart => frame.pts - start,
            PtsExpr::Count => match frame.format.as_audio() {
                Some(audio) if audio.sample_rate > 0 => Rational::new(1, i64::from(audio.sample_rate))
                    .rescale(self.count as i64, frame.time_base),
                _ => self.count as i64,
            },
        }
    }
}

impl FilterNode for SetPtsNode {
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

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        for mut frame in inputs {
            let pts = self.base_pts(&frame);
            self.count += match self.media {
                MediaKind::Video => 1,
                MediaKind::Audio => frame.sample_count() as u64,
            };
            frame.pts = self.scaled(pts);
            frame.duration = self.scaled(frame.duration);
            out.push(0, frame);
        }
        Ok(())
    }
}
