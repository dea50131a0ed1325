// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-stream encoders and decode timestamp assignment.
//!
//! Encoders only report pts. The pool records the pts of every submitted frame in a
//! [`ReorderBuffer`] and stamps the n-th packet out with the (n - delay)-th
//! smallest submitted pts, where `delay` is the encoder's declared reorder delay.
//! The first `delay` packets get dts extrapolated backwards from the first pts by
//! one frame duration each. The result is clamped so dts never decreases and
//! never exceeds the packet's pts.

use std::collections::HashMap;
use std::sync::Arc;
use transkit_core::{
    Encoder, EncoderFactory, Frame, FrameFormat, Packet, Rational, ReorderBuffer, Result,
    StreamDescriptor, TranscodeError,
};

/// Everything needed to create one stream's encoder on its first frame.
#[derive(Clone)]
pub struct EncoderSetup {
    pub factory: Arc<dyn EncoderFactory>,
    /// Output stream as announced to the muxer.
    pub stream: StreamDescriptor,
    /// Format of the frames the filter graph hands over.
    pub format: FrameFormat,
    pub params: Option<serde_json::Value>,
}

struct EncoderSlot {
    encoder: Box<dyn Encoder>,
    stream_index: usize,
    time_base: Rational,
    delay: usize,
    pending: ReorderBuffer<i64>,
    first_pts: Option<i64>,
    frame_duration: i64,
    packets_out: usize,
    last_dts: Option<i64>,
    flushed: bool,
}

impl EncoderSlot {
    fn stamp(&mut self, mut packet: Packet) -> Packet {
        let candidate = if self.packets_out < self.delay {
            let first = self.first_pts.unwrap_or(packet.pts);
            let steps = i64::try_from(self.delay - self.packets_out).unwrap_or(i64::MAX);
            first.saturating_sub(steps.saturating_mul(self.frame_duration.max(1)))
        } else {
            self.pending.pop_ready(0).unwrap_or(packet.pts)
        };
        self.packets_out += 1;

        let mut dts = candidate.min(packet.pts);
        if let Some(last) = self.last_dts {
            dts = dts.max(last);
        }
        self.last_dts = Some(dts);

        packet.dts = dts;
        packet.stream_index = self.stream_index;
        if packet.duration == 0 {
            packet.duration = self.frame_duration;
        }
        packet
    }
}

pub struct EncoderPool {
    setups: HashMap<usize, EncoderSetup>,
    slots: HashMap<usize, EncoderSlot>,
    max_reorder_depth: usize,
    dropped: u64,
}

impl EncoderPool {
    pub fn new(max_reorder_depth: usize) -> Self {
        Self {
            setups: HashMap::new(),
            slots: HashMap::new(),
            max_reorder_depth: max_reorder_depth.max(1),
            dropped: 0,
        }
    }

    /// Declares an output stream. Its encoder is created on the first frame.
    pub fn add_stream(&mut self, setup: EncoderSetup) {
        self.setups.insert(setup.stream.index, setup);
    }

    /// Submitted frames whose pts was lost to reorder overflow.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    fn slot(&mut self, stream_index: usize) -> Result<&mut EncoderSlot> {
        if !self.slots.contains_key(&stream_index) {
            let setup = self.setups.get(&stream_index).ok_or_else(|| {
                TranscodeError::Configuration(format!("No encoder configured for stream {stream_index}"))
            })?;
            let encoder = setup.factory.create(&setup.stream, &setup.format, setup.params.as_ref())?;
            let delay = encoder.delay();
            tracing::debug!(stream = stream_index, codec = %setup.stream.codec, delay, "Created encoder");
            self.slots.insert(
                stream_index,
                EncoderSlot {
                    encoder,
                    stream_index,
                    time_base: setup.stream.time_base,
                    delay,
                    pending: ReorderBuffer::new(self.max_reorder_depth.max(delay + 1)),
                    first_pts: None,
                    frame_duration: 0,
                    packets_out: 0,
                    last_dts: None,
                    flushed: false,
                },
            );
        }
        self.slots.get_mut(&stream_index).ok_or_else(|| {
            TranscodeError::Configuration(format!("No encoder configured for stream {stream_index}"))
        })
    }

    /// Encodes one frame for `stream_index`, rescaling it into the output time base.
    ///
    /// # Errors
    ///
    /// `EncodeError` from the codec (the caller skips the frame) or `Configuration`
    /// for an undeclared stream.
    pub fn encode(&mut self, stream_index: usize, mut frame: Frame) -> Result<Vec<Packet>> {
        let mut dropped = 0;
        let slot = self.slot(stream_index)?;
        slot.flushed = false;

        if frame.time_base != slot.time_base {
            frame.pts = frame.pts_in(slot.time_base);
            frame.duration = frame.time_base.rescale(frame.duration, slot.time_base);
            frame.time_base = slot.time_base;
        }
        let (pts, duration) = (frame.pts, frame.duration);
        // A frame the codec rejects must not occupy a dts slot.
        let packets = slot.encoder.encode(frame)?;
        if slot.first_pts.is_none() {
            slot.first_pts = Some(pts);
            slot.frame_duration = duration;
        }
        if let Err(err) = slot.pending.push(pts, pts) {
            dropped += 1;
            tracing::warn!(stream = stream_index, error = %err, "Encoder reorder queue overflow");
        }

        let out = packets.into_iter().map(|p| slot.stamp(p)).collect();
        self.dropped += dropped;
        Ok(out)
    }

    /// Drains the encoder of one stream. A second flush returns nothing.
    ///
    /// # Errors
    ///
    /// `EncodeError` from the codec's final drain.
    pub fn flush(&mut self, stream_index: usize) -> Result<Vec<Packet>> {
        let Some(slot) = self.slots.get_mut(&stream_index) else {
            return Ok(Vec::new());
        };
        if slot.flushed {
            return Ok(Vec::new());
        }
        slot.flushed = true;
        let packets = slot.encoder.flush()?;
        Ok(packets.into_iter().map(|p| slot.stamp(p)).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use transkit_core::{BuildProfile, FormatRegistry, PixelFormat, VideoFormat};

    const FORMAT: VideoFormat = VideoFormat { pixel_format: PixelFormat::Gray8, width: 1, height: 1 };

    fn pool(codec: &str, params: Option<serde_json::Value>, time_base: Rational) -> EncoderPool {
        let mut registry = FormatRegistry::new();
        transkit_nodes::register_components(&mut registry);
        let registry = registry.finalize(&BuildProfile::default()).unwrap();

        let factory = registry.encoder(codec).unwrap();
        let format = FrameFormat::Video(FORMAT);
        let mut stream = factory.output_stream(&format, time_base, params.as_ref()).unwrap();
        stream.index = 3;

        let mut pool = EncoderPool::new(8);
        pool.add_stream(EncoderSetup { factory, stream, format, params });
        pool
    }

    fn frame(pts: i64, time_base: Rational) -> Frame {
        Frame::video(0, FORMAT, vec![0], pts, time_base).with_duration(1)
    }

    #[test]
    fn test_dts_matches_pts_without_delay() {
        let tb = Rational::new(1, 25);
        let mut pool = pool("rawvideo", None, tb);
        let mut packets = Vec::new();
        for pts in 0..3 {
            packets.extend(pool.encode(3, frame(pts, tb)).unwrap());
        }
        packets.extend(pool.flush(3).unwrap());
        let stamps: Vec<(usize, i64, i64)> = packets.iter().map(|p| (p.stream_index, p.pts, p.dts)).collect();
        assert_eq!(stamps, vec![(3, 0, 0), (3, 1, 1), (3, 2, 2)]);
    }

    #[test]
    fn test_b_frames_get_shifted_dts() {
        let tb = Rational::new(1, 25);
        let mut pool = pool("rlev", Some(json!({ "b_frames": 1 })), tb);
        let mut packets = Vec::new();
        for pts in 0..4 {
            packets.extend(pool.encode(3, frame(pts, tb)).unwrap());
        }
        packets.extend(pool.flush(3).unwrap());

        let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
        let dts: Vec<i64> = packets.iter().map(|p| p.dts).collect();
        assert_eq!(pts, vec![0, 2, 1, 3]);
        assert_eq!(dts, vec![-1, 0, 1, 2]);
        for packet in &packets {
            assert!(packet.dts <= packet.pts);
        }
        assert!(pool.flush(3).unwrap().is_empty());
    }

    #[test]
    fn test_rejected_frame_does_not_shift_dts() {
        let tb = Rational::new(1, 25);
        let mut pool = pool("rawvideo", None, tb);
        let wide = VideoFormat { width: 2, ..FORMAT };
        let mut packets = pool.encode(3, frame(0, tb)).unwrap();
        let err = pool.encode(3, Frame::video(0, wide, vec![0, 0], 1, tb)).unwrap_err();
        assert_eq!(err.kind(), transkit_core::ErrorKind::EncodeError);
        for pts in 2..4 {
            packets.extend(pool.encode(3, frame(pts, tb)).unwrap());
        }
        let stamps: Vec<(i64, i64)> = packets.iter().map(|p| (p.pts, p.dts)).collect();
        assert_eq!(stamps, vec![(0, 0), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_frames_are_rescaled_to_output_time_base() {
        let mut pool = pool("rawvideo", None, Rational::new(1, 90000));
        let packets = pool.encode(3, frame(2, Rational::new(1, 25))).unwrap();
        assert_eq!(packets[0].pts, 7200);
        assert_eq!(packets[0].duration, 3600);
    }

    #[test]
    fn test_undeclared_stream_is_rejected() {
        let tb = Rational::new(1, 25);
        let mut pool = pool("rawvideo", None, tb);
        assert!(pool.encode(0, frame(0, tb)).is_err());
        assert!(pool.flush(0).unwrap().is_empty());
    }
}
