// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Container reading and writing abstractions.

use crate::error::Result;
use crate::io::{ByteSink, ByteSource};
use crate::rational::Rational;
use crate::types::{Packet, StreamDescriptor};
use std::sync::Arc;

/// Position requested by [`Demuxer::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    pub timestamp: i64,
    pub time_base: Rational,
}

impl SeekTarget {
    pub const fn new(timestamp: i64, time_base: Rational) -> Self {
        Self { timestamp, time_base }
    }

    /// The target expressed in a stream's time base.
    pub fn in_time_base(&self, time_base: Rational) -> i64 {
        self.time_base.rescale(self.timestamp, time_base)
    }
}

/// Reads packets out of a container.
///
/// Packets of one stream come out in non-decreasing dts order. Packets of
/// different streams are interleaved as stored.
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamDescriptor];

    /// Returns the next packet, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// `Format` for malformed data, `Io` for source failures.
    fn next_packet(&mut self) -> Result<Option<Packet>>;

    /// Repositions every stream on its nearest key frame at or before `target`.
    ///
    /// Decoders fed from this demuxer must be flushed or discarded afterwards.
    ///
    /// # Errors
    ///
    /// `Seek` if the source cannot seek or a stream has no key frame.
    fn seek(&mut self, target: SeekTarget) -> Result<()>;
}

/// Writes packets into a container, in the order it receives them.
///
/// Interleaving is the caller's job; see the engine's `Muxer`.
pub trait ContainerWriter: Send {
    /// Declares the output streams. Their time bases are fixed from here on.
    ///
    /// # Errors
    ///
    /// `Mux` when the streams cannot be represented by the container.
    fn write_header(&mut self, streams: &[StreamDescriptor]) -> Result<()>;

    /// # Errors
    ///
    /// `Mux` or `Io` on write failure.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Writes indexes and trailers and flushes the sink.
    ///
    /// # Errors
    ///
    /// `Mux` or `Io` on write failure.
    fn write_trailer(&mut self) -> Result<()>;
}

/// Opens a demuxer over a byte source.
pub type DemuxerFactory =
    Arc<dyn Fn(Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> + Send + Sync>;

/// Creates a container writer over a byte sink.
pub type MuxerFactory =
    Arc<dyn Fn(Box<dyn ByteSink>) -> Result<Box<dyn ContainerWriter>> + Send + Sync>;

/// Scores how likely the leading bytes belong to a format (0 = no, 100 = certain).
pub type ProbeFn = fn(&[u8]) -> u8;
