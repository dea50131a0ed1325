// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Graph endpoints (`buffer`, `buffersink`) and passthrough filters (`null`, `anull`).
//!
//! The graph engine feeds `buffer` outputs itself and collects whatever reaches
//! the `buffersink` input; both nodes only describe their ports and formats.

use schemars::JsonSchema;
use serde::Deserialize;
use transkit_core::config_helpers::{parse_config_optional, parse_config_required};
use transkit_core::{
    FilterNode, FilterOutput, FormatCaps, Frame, FrameFormat, InputPort, MediaKind, OutputPort,
    Result, TranscodeError,
};

#[derive(Deserialize, Debug, Clone, JsonSchema)]
pub struct BufferConfig {
    /// Format of the decoded frames entering the graph.
    pub format: FrameFormat,
}

/// Graph source. Parameters are filled in by the graph engine.
pub struct BufferSource {
    format: FrameFormat,
}

impl BufferSource {
    /// # Errors
    ///
    /// `Configuration` when the format parameter is missing.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: BufferConfig = parse_config_required(params)?;
        Ok(Self { format: config.format })
    }
}

impl FilterNode for BufferSource {
    fn input_ports(&self) -> Vec<InputPort> {
        Vec::new()
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(self.format.media()))]
    }

    fn configure(&mut self, _inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        Ok(vec![self.format])
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        for frame in inputs {
            out.push(0, frame);
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Default, JsonSchema)]
#[serde(default)]
pub struct BufferSinkConfig {
    /// Formats the downstream encoder accepts. Empty accepts anything.
    pub accepts: Vec<FormatCaps>,
}

/// Graph sink.
pub struct BufferSink {
    accepts: Vec<FormatCaps>,
    format: Option<FrameFormat>,
}

impl BufferSink {
    /// # Errors
    ///
    /// `Configuration` for malformed parameters.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let config: BufferSinkConfig = parse_config_optional(params)?;
        Ok(Self { accepts: config.accepts, format: None })
    }

    /// Negotiated format of the frames leaving the graph.
    pub const fn format(&self) -> Option<FrameFormat> {
        self.format
    }
}

impl FilterNode for BufferSink {
    fn input_ports(&self) -> Vec<InputPort> {
        vec![InputPort::new("in", self.accepts.clone())]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        Vec::new()
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        self.format = inputs.first().copied();
        Ok(Vec::new())
    }

    fn process(&mut self, _inputs: Vec<Frame>, _out: &mut FilterOutput) -> Result<()> {
        Err(TranscodeError::Graph("buffersink frames are collected by the graph".to_string()))
    }
}

/// `null` / `anull`: forwards frames unchanged.
pub struct Passthrough {
    media: MediaKind,
}

impl Passthrough {
    pub const fn new(media: MediaKind) -> Self {
        Self { media }
    }
}

impl FilterNode for Passthrough {
    fn input_ports(&self) -> Vec<InputPort> {
        let accepts = match self.media {
            MediaKind::Video => FormatCaps::any_video(),
            MediaKind::Audio => FormatCaps::any_audio(),
        };
        vec![InputPort::new("in", vec![accepts])]
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", Some(self.media))]
    }

    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
        Ok(inputs.to_vec())
    }

    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
        for frame in inputs {
            out.push(0, frame);
        }
        Ok(())
    }
}
