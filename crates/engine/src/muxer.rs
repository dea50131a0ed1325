// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Interleaving container writer.
//!
//! Packets are buffered per stream and written in global dts order: the smallest
//! buffered head (compared exactly across time bases, ties broken by stream index)
//! is written as soon as every stream that is still open has a head to compare
//! against. A stream that stops producing would stall the others, so once more
//! than `max_interleave_packets` are buffered the smallest head is written anyway.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use transkit_core::{
    ContainerWriter, Packet, Rational, Result, Stage, StreamDescriptor, TranscodeError,
};

/// Work items for the muxer thread.
#[derive(Debug)]
pub enum MuxMessage {
    Packet(Packet),
    /// No more packets will arrive for this output stream.
    EndOfStream(usize),
}

/// What the muxer wrote, per output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxSummary {
    pub packets_written: Vec<u64>,
    /// Times the interleave bound forced a write.
    pub forced_writes: u64,
}

struct MuxStream {
    time_base: Rational,
    queue: VecDeque<Packet>,
    open: bool,
    last_dts: Option<i64>,
    written: u64,
}

pub struct Muxer {
    writer: Box<dyn ContainerWriter>,
    streams: Vec<MuxStream>,
    buffered: usize,
    max_interleave_packets: usize,
    forced_writes: u64,
    lagging: bool,
    packets_counter: Counter<u64>,
}

impl Muxer {
    /// Writes the container header and fixes the output time bases.
    ///
    /// `streams[i].index` must equal `i`.
    ///
    /// # Errors
    ///
    /// `MuxError` if the header cannot be written or the stream table is inconsistent.
    pub fn open(
        mut writer: Box<dyn ContainerWriter>,
        streams: &[StreamDescriptor],
        max_interleave_packets: usize,
    ) -> Result<Self> {
        if let Some((i, s)) = streams.iter().enumerate().find(|(i, s)| s.index != *i) {
            return Err(TranscodeError::Mux(format!(
                "output stream at position {i} declares index {}",
                s.index
            )));
        }
        writer.write_header(streams).map_err(|e| e.in_container(Stage::Mux))?;

        let meter = global::meter("transkit_engine");
        Ok(Self {
            writer,
            streams: streams
                .iter()
                .map(|s| MuxStream {
                    time_base: s.time_base,
                    queue: VecDeque::new(),
                    open: true,
                    last_dts: None,
                    written: 0,
                })
                .collect(),
            buffered: 0,
            max_interleave_packets: max_interleave_packets.max(1),
            forced_writes: 0,
            lagging: false,
            packets_counter: meter
                .u64_counter("muxer.packets_written")
                .with_description("Packets written to the output container")
                .build(),
        })
    }

    /// Queues a packet and writes whatever became ready.
    ///
    /// # Errors
    ///
    /// `MuxError` for an unknown or already ended stream, a dts lower than the
    /// stream's previous dts, or a failed write.
    pub fn write_packet(&mut self, packet: Packet) -> Result<()> {
        let index = packet.stream_index;
        let stream = self
            .streams
            .get_mut(index)
            .ok_or_else(|| TranscodeError::Mux(format!("packet for unknown stream {index}")))?;
        if !stream.open {
            return Err(TranscodeError::Mux(format!("packet for stream {index} after its end")));
        }
        if let Some(last) = stream.last_dts {
            if packet.dts < last {
                return Err(TranscodeError::Mux(format!(
                    "stream {index}: dts {} is lower than previous dts {last}",
                    packet.dts
                )));
            }
        }
        stream.last_dts = Some(packet.dts);
        stream.queue.push_back(packet);
        self.buffered += 1;

        self.write_ready()?;
        while self.buffered > self.max_interleave_packets {
            if !self.lagging {
                let waiting: Vec<usize> = self
                    .streams
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.open && s.queue.is_empty())
                    .map(|(i, _)| i)
                    .collect();
                tracing::warn!(
                    buffered = self.buffered,
                    limit = self.max_interleave_packets,
                    ?waiting,
                    "Interleave buffer full, writing ahead of lagging streams"
                );
                self.lagging = true;
            }
            self.forced_writes += 1;
            if !self.write_min_head()? {
                break;
            }
        }
        Ok(())
    }

    /// Marks a stream as finished so it no longer holds back the others.
    ///
    /// # Errors
    ///
    /// `MuxError` for an unknown stream or a failed write.
    pub fn end_stream(&mut self, index: usize) -> Result<()> {
        let stream = self
            .streams
            .get_mut(index)
            .ok_or_else(|| TranscodeError::Mux(format!("end of unknown stream {index}")))?;
        if stream.open {
            tracing::debug!(stream = index, written = stream.written, "Output stream ended");
            stream.open = false;
        }
        self.write_ready()
    }

    /// Writes every buffered packet in order, then the trailer.
    ///
    /// # Errors
    ///
    /// `MuxError` if a write or the trailer fails.
    pub fn finalize(mut self) -> Result<MuxSummary> {
        for stream in &mut self.streams {
            stream.open = false;
        }
        while self.write_min_head()? {}
        self.writer.write_trailer().map_err(|e| e.in_container(Stage::Mux))?;
        tracing::info!(forced_writes = self.forced_writes, "Output finalized");
        Ok(MuxSummary {
            packets_written: self.streams.iter().map(|s| s.written).collect(),
            forced_writes: self.forced_writes,
        })
    }

    fn write_ready(&mut self) -> Result<()> {
        while !self.streams.iter().any(|s| s.open && s.queue.is_empty()) {
            if !self.write_min_head()? {
                break;
            }
        }
        if self.lagging && self.buffered <= self.max_interleave_packets / 2 {
            self.lagging = false;
        }
        Ok(())
    }

    fn min_head(&self) -> Option<usize> {
        let mut best: Option<(usize, i64, Rational)> = None;
        for (index, stream) in self.streams.iter().enumerate() {
            let Some(head) = stream.queue.front() else {
                continue;
            };
            let better = best.is_none_or(|(_, dts, tb)| {
                Rational::compare_timestamps(head.dts, stream.time_base, dts, tb).is_lt()
            });
            if better {
                best = Some((index, head.dts, stream.time_base));
            }
        }
        best.map(|(index, _, _)| index)
    }

    /// Writes the smallest buffered head. Returns false when nothing is buffered.
    fn write_min_head(&mut self) -> Result<bool> {
        let Some(index) = self.min_head() else {
            return Ok(false);
        };
        let Some(packet) = self.streams[index].queue.pop_front() else {
            return Ok(false);
        };
        self.buffered -= 1;
        tracing::trace!(stream = index, dts = packet.dts, pts = packet.pts, "Writing packet");
        self.writer.write_packet(&packet).map_err(|e| e.in_container(Stage::Mux))?;
        self.streams[index].written += 1;
        self.packets_counter.add(1, &[]);
        Ok(true)
    }
}

/// Drives a muxer from a queue until every sender is gone, then finalizes.
///
/// Runs on a blocking thread. A failed write stops consumption; dropping the
/// receiver makes the workers' sends fail so they stop too.
///
/// # Errors
///
/// The first `MuxError`.
pub fn run_muxer(mut muxer: Muxer, mut rx: mpsc::Receiver<MuxMessage>) -> Result<MuxSummary> {
    while let Some(message) = rx.blocking_recv() {
        let result = match message {
            MuxMessage::Packet(packet) => muxer.write_packet(packet),
            MuxMessage::EndOfStream(index) => muxer.end_stream(index),
        };
        if let Err(err) = result {
            tracing::error!(error = %err, "Muxer failed");
            return Err(err);
        }
    }
    muxer.finalize()
}
