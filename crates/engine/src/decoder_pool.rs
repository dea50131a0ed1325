// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-stream decoders with presentation-order output.
//!
//! Decoders are created on the first packet of their stream. Their output passes
//! through a [`ReorderBuffer`] holding back `reorder_delay` frames (a stream
//! parameter, 0 when absent), so frames leave each stream with strictly increasing
//! pts. Frames that arrive after a later pts has already been released are dropped
//! with a warning. A stream whose delay does not fit in `max_reorder_depth` is not
//! decoded.

use std::collections::HashMap;
use std::sync::Arc;
use transkit_core::{
    Decoder, FormatRegistry, Frame, Packet, ReorderBuffer, Result, StreamDescriptor,
    TranscodeError,
};

struct DecoderSlot {
    decoder: Box<dyn Decoder>,
    reorder: ReorderBuffer<Frame>,
    delay: usize,
    flushed: bool,
}

impl DecoderSlot {
    fn admit(&mut self, frame: Frame, dropped: &mut u64) {
        let (stream, pts) = (frame.stream_index, frame.pts);
        if let Err(err) = self.reorder.push(pts, frame) {
            *dropped += 1;
            tracing::warn!(stream, pts, error = %err, "Dropping decoded frame");
        }
    }

    fn release(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(frame) = self.reorder.pop_ready(self.delay) {
            out.push(frame);
        }
        out
    }
}

pub struct DecoderPool {
    registry: Arc<FormatRegistry>,
    streams: HashMap<usize, StreamDescriptor>,
    slots: HashMap<usize, DecoderSlot>,
    max_reorder_depth: usize,
    dropped: u64,
}

impl DecoderPool {
    pub fn new(
        registry: Arc<FormatRegistry>,
        streams: impl IntoIterator<Item = StreamDescriptor>,
        max_reorder_depth: usize,
    ) -> Self {
        Self {
            registry,
            streams: streams.into_iter().map(|s| (s.index, s)).collect(),
            slots: HashMap::new(),
            max_reorder_depth: max_reorder_depth.max(1),
            dropped: 0,
        }
    }

    /// Frames dropped by reorder overflow or late arrival so far.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    fn slot(&mut self, stream_index: usize) -> Result<&mut DecoderSlot> {
        if !self.slots.contains_key(&stream_index) {
            let stream = self.streams.get(&stream_index).ok_or_else(|| {
                TranscodeError::Configuration(format!("No decoder configured for stream {stream_index}"))
            })?;
            let delay = stream
                .param_u64("reorder_delay")
                .map_or(Ok(0), usize::try_from)
                .ok()
                .filter(|delay| *delay < self.max_reorder_depth)
                .ok_or_else(|| {
                    TranscodeError::CorruptHeader(format!(
                        "Stream {stream_index} declares reorder_delay {}, max_reorder_depth is {}",
                        stream.param_u64("reorder_delay").unwrap_or_default(),
                        self.max_reorder_depth
                    ))
                })?;
            let decoder = self.registry.decoder(&stream.codec)?.create(stream)?;
            let capacity = self.max_reorder_depth;
            tracing::debug!(stream = stream_index, codec = %stream.codec, delay, "Created decoder");
            self.slots.insert(
                stream_index,
                DecoderSlot { decoder, reorder: ReorderBuffer::new(capacity), delay, flushed: false },
            );
        }
        self.slots.get_mut(&stream_index).ok_or_else(|| {
            TranscodeError::Configuration(format!("No decoder configured for stream {stream_index}"))
        })
    }

    /// Decodes one packet and returns the frames that are ready in presentation order.
    ///
    /// # Errors
    ///
    /// Codec errors are passed through: `DecodeError` for a bad packet (the caller
    /// skips it), `CorruptHeader` when the stream cannot be decoded at all.
    pub fn decode(&mut self, packet: Packet) -> Result<Vec<Frame>> {
        let stream_index = packet.stream_index;
        let mut dropped = 0;
        let slot = self.slot(stream_index)?;
        slot.flushed = false;
        for frame in slot.decoder.decode(packet)? {
            slot.admit(frame, &mut dropped);
        }
        let ready = slot.release();
        self.dropped += dropped;
        Ok(ready)
    }

    /// Drains the codec and the reorder buffer of one stream.
    ///
    /// A second flush without intervening packets returns nothing.
    ///
    /// # Errors
    ///
    /// Codec errors from the final drain.
    pub fn flush(&mut self, stream_index: usize) -> Result<Vec<Frame>> {
        let Some(slot) = self.slots.get_mut(&stream_index) else {
            return Ok(Vec::new());
        };
        if slot.flushed {
            return Ok(Vec::new());
        }
        slot.flushed = true;

        let mut dropped = 0;
        match slot.decoder.flush() {
            Ok(frames) => {
                for frame in frames {
                    slot.admit(frame, &mut dropped);
                }
            },
            Err(err) if err.is_recoverable() => {
                tracing::warn!(stream = stream_index, error = %err, "Decoder flush failed");
            },
            Err(err) => return Err(err),
        }
        self.dropped += dropped;
        Ok(slot.reorder.drain())
    }

    /// Forgets every decoder and buffered frame, e.g. after a seek.
    pub fn discard(&mut self) {
        tracing::debug!(decoders = self.slots.len(), "Discarding decoder state");
        self.slots.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use transkit_core::{BuildProfile, MediaKind, Rational};

    fn registry() -> Arc<FormatRegistry> {
        let mut registry = FormatRegistry::new();
        transkit_nodes::register_components(&mut registry);
        registry.finalize(&BuildProfile::default()).unwrap()
    }

    fn raw_stream(reorder_delay: Option<u64>) -> StreamDescriptor {
        let stream = StreamDescriptor::new(0, MediaKind::Video, "rawvideo", Rational::new(1, 25))
            .with_param("width", 1)
            .with_param("height", 1)
            .with_param("pix_fmt", "gray");
        match reorder_delay {
            Some(delay) => stream.with_param("reorder_delay", delay),
            None => stream,
        }
    }

    fn packet(pts: i64) -> Packet {
        Packet::new(0, vec![u8::try_from(pts).unwrap()], pts, pts).with_duration(1)
    }

    fn pts(frames: &[Frame]) -> Vec<i64> {
        frames.iter().map(|f| f.pts).collect()
    }

    #[test]
    fn test_reorders_with_declared_delay() {
        let mut pool = DecoderPool::new(registry(), [raw_stream(Some(1))], 4);
        let mut out = Vec::new();
        for p in [0, 2, 1, 4, 3] {
            out.extend(pool.decode(packet(p)).unwrap());
        }
        out.extend(pool.flush(0).unwrap());
        assert_eq!(pts(&out), vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.dropped(), 0);
    }

    #[test]
    fn test_delay_beyond_max_depth_is_rejected() {
        let mut pool = DecoderPool::new(registry(), [raw_stream(Some(4))], 4);
        let err = pool.decode(packet(0)).unwrap_err();
        assert_eq!(err.kind(), transkit_core::ErrorKind::CorruptHeader);
        assert!(err.to_string().contains("reorder_delay 4"), "{err}");

        let mut pool = DecoderPool::new(registry(), [raw_stream(Some(u64::MAX))], 4);
        assert!(pool.decode(packet(0)).is_err());

        let mut pool = DecoderPool::new(registry(), [raw_stream(Some(3))], 4);
        let mut out = Vec::new();
        for p in [1, 0, 3, 2] {
            out.extend(pool.decode(packet(p)).unwrap());
        }
        out.extend(pool.flush(0).unwrap());
        assert_eq!(pts(&out), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_late_frame_is_dropped() {
        let mut pool = DecoderPool::new(registry(), [raw_stream(None)], 4);
        assert_eq!(pts(&pool.decode(packet(5)).unwrap()), vec![5]);
        assert!(pool.decode(packet(3)).unwrap().is_empty());
        assert_eq!(pts(&pool.decode(packet(6)).unwrap()), vec![6]);
        assert_eq!(pool.dropped(), 1);
    }

    #[test]
    fn test_second_flush_is_empty() {
        let mut pool = DecoderPool::new(registry(), [raw_stream(Some(2))], 4);
        assert!(pool.decode(packet(0)).unwrap().is_empty());
        assert!(pool.decode(packet(1)).unwrap().is_empty());
        assert_eq!(pts(&pool.flush(0).unwrap()), vec![0, 1]);
        assert!(pool.flush(0).unwrap().is_empty());
        // Unknown or never-used streams flush to nothing.
        assert!(pool.flush(7).unwrap().is_empty());
    }

    #[test]
    fn test_discard_resets_release_history() {
        let mut pool = DecoderPool::new(registry(), [raw_stream(None)], 4);
        pool.decode(packet(10)).unwrap();
        pool.discard();
        assert_eq!(pts(&pool.decode(packet(2)).unwrap()), vec![2]);
    }

    #[test]
    fn test_bad_packet_is_a_decode_error() {
        let mut pool = DecoderPool::new(registry(), [raw_stream(None)], 4);
        let err = pool.decode(Packet::new(0, vec![1, 2, 3], 0, 0)).unwrap_err();
        assert_eq!(err.kind(), transkit_core::ErrorKind::DecodeError);
        // The pool stays usable.
        assert_eq!(pts(&pool.decode(packet(1)).unwrap()), vec![1]);
    }
}
