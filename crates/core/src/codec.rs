// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Decoder and encoder abstractions.
//!
//! Codec implementations are plain synchronous state machines. The engine's
//! pools own one instance per stream, create it lazily, and wrap it with the
//! reorder and timestamp discipline the pipeline relies on.

use crate::caps::FormatCaps;
use crate::error::Result;
use crate::rational::Rational;
use crate::types::{Frame, FrameFormat, Packet, StreamDescriptor};
use smallvec::SmallVec;

/// Frames produced by one decode call, in decode order.
pub type DecodedFrames = SmallVec<[Frame; 2]>;

/// Packets produced by one encode call, in decode order.
pub type EncodedPackets = SmallVec<[Packet; 2]>;

pub trait Decoder: Send {
    /// Decodes one packet.
    ///
    /// # Errors
    ///
    /// `Decode` for a damaged packet (skipped by the caller), `CorruptHeader`
    /// when the stream cannot continue.
    fn decode(&mut self, packet: Packet) -> Result<DecodedFrames>;

    /// Returns frames still held by the codec. A second call returns nothing.
    ///
    /// # Errors
    ///
    /// Same contract as [`Decoder::decode`].
    fn flush(&mut self) -> Result<DecodedFrames> {
        Ok(DecodedFrames::new())
    }
}

pub trait Encoder: Send {
    /// Encodes one frame. Returned packets carry pts and the key flag; the
    /// encoder pool assigns decoding timestamps.
    ///
    /// # Errors
    ///
    /// `Encode` for a frame that cannot be encoded (skipped by the caller).
    fn encode(&mut self, frame: Frame) -> Result<EncodedPackets>;

    /// How many packets the decode order may run ahead of presentation order.
    /// Zero for encoders that never reorder.
    fn delay(&self) -> usize {
        0
    }

    /// Returns packets still held by the codec. A second call returns nothing.
    ///
    /// # Errors
    ///
    /// Same contract as [`Encoder::encode`].
    fn flush(&mut self) -> Result<EncodedPackets> {
        Ok(EncodedPackets::new())
    }
}

/// Registry entry able to describe and build decoders.
pub trait DecoderFactory: Send + Sync {
    /// Format of the frames a decoder for `stream` produces, derived from the
    /// stream parameters alone.
    ///
    /// # Errors
    ///
    /// `CorruptHeader` when the stream parameters are missing or inconsistent.
    fn output_format(&self, stream: &StreamDescriptor) -> Result<FrameFormat>;

    /// # Errors
    ///
    /// `CorruptHeader` when the stream parameters are missing or inconsistent.
    fn create(&self, stream: &StreamDescriptor) -> Result<Box<dyn Decoder>>;
}

/// Registry entry able to describe and build encoders.
pub trait EncoderFactory: Send + Sync {
    /// Patterns the encoder accepts as input for the given parameters.
    ///
    /// # Errors
    ///
    /// `Configuration` for invalid parameters.
    fn accepted_formats(&self, params: Option<&serde_json::Value>) -> Result<Vec<FormatCaps>>;

    /// Describes the output stream produced from frames of `format`.
    ///
    /// The returned descriptor's index is a placeholder; the caller assigns it.
    ///
    /// # Errors
    ///
    /// `Configuration` for invalid parameters or an unsupported input format.
    fn output_stream(
        &self,
        format: &FrameFormat,
        time_base: Rational,
        params: Option<&serde_json::Value>,
    ) -> Result<StreamDescriptor>;

    /// # Errors
    ///
    /// `Configuration` for invalid parameters or an unsupported input format.
    fn create(
        &self,
        stream: &StreamDescriptor,
        format: &FrameFormat,
        params: Option<&serde_json::Value>,
    ) -> Result<Box<dyn Encoder>>;
}
