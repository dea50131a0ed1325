// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Filter node abstraction.
//!
//! - [`FilterNode`]: the trait every filter implements
//! - [`FilterOutput`]: collector handed to a node while it fires
//! - [`FilterFactory`]: registry factory building a node from JSON parameters
//!
//! Nodes never see channels or other nodes. The graph engine decides when a node
//! fires, hands it exactly one frame per input port, and routes whatever the node
//! pushed into its [`FilterOutput`] along the outgoing links.

use crate::error::Result;
use crate::pins::{InputPort, OutputPort};
use crate::rational::Rational;
use crate::types::{Frame, FrameFormat};
use smallvec::SmallVec;
use std::sync::Arc;

/// A transform over raw frames.
///
/// State (pending frames, sample accumulators) is owned by the instance; one
/// instance serves exactly one graph.
pub trait FilterNode: Send {
    fn input_ports(&self) -> Vec<InputPort>;

    fn output_ports(&self) -> Vec<OutputPort>;

    /// Called once at validation time with the negotiated format of every input
    /// port, in port order. Returns the concrete format of every output port.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot operate on the given formats.
    fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>>;

    /// Time base of the emitted frames given the time base of input port 0.
    /// Called after [`FilterNode::configure`].
    fn output_time_base(&self, input: Rational) -> Rational {
        input
    }

    /// Processes one synchronized input set (`inputs[i]` arrived on port `i`).
    ///
    /// # Errors
    ///
    /// Recoverable errors skip this input set; other errors end the stream.
    fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()>;

    /// Emits residual state at end of stream. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Same contract as [`FilterNode::process`].
    fn flush(&mut self, _out: &mut FilterOutput) -> Result<()> {
        Ok(())
    }
}

/// Frames produced by one firing, tagged with their output port.
#[derive(Debug, Default)]
pub struct FilterOutput {
    frames: SmallVec<[(usize, Frame); 4]>,
}

impl FilterOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, port: usize, frame: Frame) {
        self.frames.push((port, frame));
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (usize, Frame)> + '_ {
        self.frames.drain(..)
    }
}

/// A factory function that creates a filter node from its parameters.
pub type FilterFactory =
    Arc<dyn Fn(Option<&serde_json::Value>) -> Result<Box<dyn FilterNode>> + Send + Sync>;
