// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `overlay`: draw the second input on top of the first.
//!
//! The graph engine only fires this node with one timestamp-matched frame per
//! port, so `process` always receives `[main, overlay]`.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::parse_config_optional;
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    PixelFormat, Result, TranscodeError, VideoFormat,
};

#[derive(Deserialize, Debug, Clone, Default, JsonSchema)]
#[serde(default)]
pub struct OverlayConfig {
    /// Horizontal offset of the overlay in the main picture. May be negative.
    pub x: i64,
    /// Vertical offset of the overlay in the main picture. May be negative.
    pub y: i64,
}

pub struct OverlayNode {
    config: OverlayConfig,
    formats: Option<(VideoFormat, VideoFormat)>,
}

impl OverlayNode {
    /// # Errors
    ///
    /// `Configuration` for malformed parameters.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        Ok(Self { config: parse_config_optional(params)?, formats: None })
    }
}

/// Copies the rows of `top` that fall inside `base`, clipping at every edge.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn blit(base: &mut [u8], base_fmt: &VideoFormat, top: &[u8], top_fmt: &VideoFormat, x: i64, y: i64) {
    let bpp = base_fmt.pixel_format.bytes_per_pixel();
    let (bw, bh) = (i64::from(base_fmt.width), i64::from(base_fmt.height));
    let (tw, th) = (i64::from(top_fmt.width), i64::from(top_fmt.height));
    let x0 = x.max(0);
    let x1 = (x + tw).min(bw);
    if x0 >= x1 {
        return;
    }
    for row in y.max(0)..(y + th).min(bh) {
        let top_row = (row - y) as usize;
        let src_start = (top_row * top_fmt.width as usize + (x0 - x) as usize) * bpp;
        let dst_start = (row as usize * base_fmt.width as usize + x0 as usize) * bpp;
        let len = (x1 - x0) as usize * bpp;
        base[dst_start..dst_start + len].copy_from_slice(&top[src_start..src_start + len]);
    }
}

impl FilterNode for OverlayNode {
    fn input_ports(&self) -> Vec<InputPort> {
        vec![
            InputPort::new("main", vec![FormatCaps::pixel(PixelFormat::Rgb24)]),
            InputPort::new("overlay", vec![FormatCaps::pixel(PixelFormat::Rgb24)]),
        ]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(MediaKind::Video))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        match inputs {
            [FrameFormat::Video(main), FrameFormat::Video(top)] => {
                self.formats = Some((*main, *top));
                Ok(vec![FrameFormat::Video(*main)])
            },
            _ => Err(TranscodeError::FormatNegotiation(
                "overlay needs two video inputs".to_string(),
            )),
        }
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        let (main_fmt, top_fmt) = self
            .formats
            .ok_or_else(|| TranscodeError::Graph("overlay used before configure".to_string()))?;
        let [main, top]: [Frame; 2] = inputs.try_into().map_err(|frames: Vec<Frame>| {
            TranscodeError::Graph(format!("overlay fired with {} inputs", frames.len()))
        })?;
        let (Some(base), Some(layer)) = (main.pixels(), top.pixels()) else {
            return Err(TranscodeError::Decode("overlay received an audio frame".to_string()));
        };
        if base.len() != main_fmt.frame_size() || layer.len() != top_fmt.frame_size() {
            return Err(TranscodeError::Decode("overlay input size mismatch".to_string()));
        }
        let mut pixels = base.to_vec();
        blit(&mut pixels, &main_fmt, layer, &top_fmt, self.config.x, self.config.y);
        let mut composed = main;
        composed.data = transkit_core::FrameData::Video(pixels.into());
        out.push(0, composed);
        Ok(())
    }
}
