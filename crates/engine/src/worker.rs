// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! One output stream: packets in, encoded (or copied) packets out to the muxer.

use crate::decoder_pool::DecoderPool;
use crate::encoder_pool::EncoderPool;
use crate::filter_graph::FilterGraph;
use crate::muxer::MuxMessage;
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use transkit_core::queue_helpers::batch_greedy;
use transkit_core::{
    ErrorKind, Frame, Packet, Rational, Result, Severity, Stage, StreamStats, StreamStatsTracker,
    TelemetryEmitter, TranscodeError,
};

/// How an output stream is produced.
pub enum StreamMode {
    /// Packets are forwarded untouched apart from time base and stream index.
    Copy { input_time_base: Rational, output_time_base: Rational },
    Transcode { decoders: DecoderPool, graph: FilterGraph, encoders: EncoderPool },
}

/// Final state of one output stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamStatus {
    Completed,
    Failed { kind: ErrorKind, severity: Severity, stage: Stage, message: String },
}

impl StreamStatus {
    fn failed(err: &TranscodeError, stage: Stage) -> Self {
        Self::Failed {
            kind: err.kind(),
            severity: err.severity(),
            stage,
            message: err.to_string(),
        }
    }
}

/// What happened to one output stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    /// `None` for a stream excluded before any packet was read.
    pub output_index: Option<usize>,
    pub input_index: usize,
    /// Output codec, or `copy`.
    pub codec: String,
    pub status: StreamStatus,
    /// Packets, frames or filter batches lost to recoverable errors.
    pub skipped: u64,
    /// Filled in from the muxer once the output is finalized.
    pub packets_written: u64,
    pub stats: StreamStats,
}

impl StreamReport {
    pub(crate) fn excluded(input_index: usize, codec: &str, err: &TranscodeError) -> Self {
        Self {
            output_index: None,
            input_index,
            codec: codec.to_string(),
            status: StreamStatus::failed(err, Stage::Decode),
            skipped: 0,
            packets_written: 0,
            stats: StreamStats::default(),
        }
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self.status, StreamStatus::Failed { .. })
    }
}

pub struct StreamWorker {
    output_index: usize,
    input_index: usize,
    codec: String,
    mode: StreamMode,
    stats: StreamStatsTracker,
    /// One emitter per stage, so rate limits hold across batches.
    telemetry: HashMap<Stage, TelemetryEmitter>,
    batch_size: usize,
    skipped: u64,
    frames_counter: Counter<u64>,
    skipped_counter: Counter<u64>,
    metric_labels: [KeyValue; 1],
}

/// Signals that the stream cannot continue.
struct StreamFailure {
    error: TranscodeError,
    stage: Stage,
}

impl StreamWorker {
    pub fn new(
        output_index: usize,
        input_index: usize,
        codec: String,
        mode: StreamMode,
        stats: StreamStatsTracker,
        telemetry: TelemetryEmitter,
        batch_size: usize,
    ) -> Self {
        let meter = global::meter("transkit_engine");
        let metric_labels = [KeyValue::new("codec", codec.clone())];
        let mut emitters: HashMap<Stage, TelemetryEmitter> = [Stage::Filter, Stage::Encode, Stage::Mux]
            .into_iter()
            .map(|stage| (stage, telemetry.for_stage(stage)))
            .collect();
        emitters.insert(Stage::Decode, telemetry);
        Self {
            output_index,
            input_index,
            codec,
            mode,
            stats,
            telemetry: emitters,
            batch_size: batch_size.max(1),
            skipped: 0,
            frames_counter: meter
                .u64_counter("decoder.frames_decoded")
                .with_description("Frames produced by decoders")
                .build(),
            skipped_counter: meter
                .u64_counter("worker.packets_skipped")
                .with_description("Packets, frames or batches skipped after recoverable errors")
                .build(),
            metric_labels,
        }
    }

    /// Consumes packets until the demuxer closes the queue or the stream fails,
    /// then flushes every stage and tells the muxer the stream has ended.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Packet>, mux: mpsc::Sender<MuxMessage>) -> StreamReport {
        tracing::info!(input = self.input_index, codec = %self.codec, "Stream worker started");
        let mut failure = None;

        'recv: while let Some(first) = rx.recv().await {
            for packet in batch_greedy(first, &mut rx, self.batch_size) {
                let outcome = match self.handle_packet(packet) {
                    Ok(packets) => self.forward(packets, &mux).await,
                    Err(failed) => Err(failed),
                };
                if let Err(failed) = outcome {
                    failure = Some(failed);
                    break 'recv;
                }
            }
            self.stats.maybe_send();
            self.telemetry.values_mut().for_each(|t| {
                t.maybe_emit_health();
            });
        }
        // Closing the queue lets the demuxer stop routing to a failed stream.
        drop(rx);

        if failure.as_ref().is_none_or(|f| f.error.severity() != Severity::PipelineFatal) {
            match self.drain() {
                Ok(packets) => {
                    if let Err(failed) = self.forward(packets, &mux).await {
                        failure.get_or_insert(failed);
                    }
                },
                Err(failed) => {
                    failure.get_or_insert(failed);
                },
            }
        }
        if mux.send(MuxMessage::EndOfStream(self.output_index)).await.is_err() {
            tracing::debug!("Muxer gone before end of stream");
        }

        let status = match failure {
            Some(StreamFailure { error, stage }) => {
                tracing::error!(stage = %stage, error = %error, "Stream failed");
                self.emit_error(stage, "stream.failed", &error);
                StreamStatus::failed(&error, stage)
            },
            None => StreamStatus::Completed,
        };
        let stats = self.stats.finish();
        tracing::info!(
            skipped = self.skipped,
            muxed = stats.muxed,
            status = ?status,
            "Stream worker finished"
        );
        StreamReport {
            output_index: Some(self.output_index),
            input_index: self.input_index,
            codec: self.codec,
            status,
            skipped: self.skipped,
            packets_written: 0,
            stats,
        }
    }

    async fn forward(
        &mut self,
        packets: Vec<Packet>,
        mux: &mpsc::Sender<MuxMessage>,
    ) -> std::result::Result<(), StreamFailure> {
        let count = packets.len() as u64;
        for packet in packets {
            if mux.send(MuxMessage::Packet(packet)).await.is_err() {
                return Err(StreamFailure {
                    error: TranscodeError::Mux("Muxer stopped accepting packets".to_string()),
                    stage: Stage::Mux,
                });
            }
        }
        self.stats.muxed(count);
        Ok(())
    }

    fn emit_error(&self, stage: Stage, event_type: &str, error: &TranscodeError) {
        if let Some(telemetry) = self.telemetry.get(&stage) {
            telemetry.emit_error(event_type, error);
        }
    }

    /// Applies the severity table to a stage error: recoverable errors are
    /// counted and skipped, anything else ends the stream.
    fn absorb<T>(&mut self, stage: Stage, result: Result<T>) -> std::result::Result<Option<T>, StreamFailure> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_recoverable() => {
                self.skipped += 1;
                self.skipped_counter.add(1, &self.metric_labels);
                self.stats.errored(stage);
                tracing::warn!(stage = %stage, error = %error, "Skipping after recoverable error");
                self.emit_error(stage, &format!("{stage}.skipped"), &error);
                Ok(None)
            },
            Err(error) => Err(StreamFailure { error, stage }),
        }
    }

    fn handle_packet(&mut self, mut packet: Packet) -> std::result::Result<Vec<Packet>, StreamFailure> {
        tracing::trace!(pts = packet.pts, dts = packet.dts, size = packet.data.len(), "Packet received");
        if let StreamMode::Copy { input_time_base, output_time_base } = self.mode {
            if input_time_base != output_time_base {
                packet.pts = input_time_base.rescale(packet.pts, output_time_base);
                packet.dts = input_time_base.rescale(packet.dts, output_time_base);
                packet.duration = input_time_base.rescale(packet.duration, output_time_base);
            }
            packet.stream_index = self.output_index;
            return Ok(vec![packet]);
        }

        self.stats.received(Stage::Decode);
        let decoded = match &mut self.mode {
            StreamMode::Transcode { decoders, .. } => decoders.decode(packet),
            StreamMode::Copy { .. } => Ok(Vec::new()),
        };
        let Some(frames) = self.absorb(Stage::Decode, decoded)? else {
            return Ok(Vec::new());
        };
        self.stats.sent(Stage::Decode, frames.len());
        self.frames_counter.add(frames.len() as u64, &self.metric_labels);
        self.filter_and_encode(frames)
    }

    fn filter_and_encode(&mut self, frames: Vec<Frame>) -> std::result::Result<Vec<Packet>, StreamFailure> {
        let mut packets = Vec::new();
        for frame in frames {
            self.stats.received(Stage::Filter);
            let filtered = match &mut self.mode {
                StreamMode::Transcode { graph, .. } => graph.push(frame),
                StreamMode::Copy { .. } => Ok(Vec::new()),
            };
            if let Some(filtered) = self.absorb(Stage::Filter, filtered)? {
                self.stats.sent(Stage::Filter, filtered.len());
                packets.extend(self.encode(filtered)?);
            }
        }
        Ok(packets)
    }

    fn encode(&mut self, frames: Vec<Frame>) -> std::result::Result<Vec<Packet>, StreamFailure> {
        let mut packets = Vec::new();
        for frame in frames {
            self.stats.received(Stage::Encode);
            let encoded = match &mut self.mode {
                StreamMode::Transcode { encoders, .. } => encoders.encode(self.output_index, frame),
                StreamMode::Copy { .. } => Ok(Vec::new()),
            };
            if let Some(encoded) = self.absorb(Stage::Encode, encoded)? {
                self.stats.sent(Stage::Encode, encoded.len());
                packets.extend(encoded);
            }
        }
        Ok(packets)
    }

    /// Flushes decoder, graph and encoder in that order.
    fn drain(&mut self) -> std::result::Result<Vec<Packet>, StreamFailure> {
        let input_index = self.input_index;
        let flushed = match &mut self.mode {
            StreamMode::Copy { .. } => return Ok(Vec::new()),
            StreamMode::Transcode { decoders, .. } => decoders.flush(input_index),
        };
        let frames = self.absorb(Stage::Decode, flushed)?.unwrap_or_default();
        self.stats.sent(Stage::Decode, frames.len());
        let mut packets = self.filter_and_encode(frames)?;

        let tail = match &mut self.mode {
            StreamMode::Transcode { graph, .. } => graph.flush(),
            StreamMode::Copy { .. } => Ok(Vec::new()),
        };
        let tail = self.absorb(Stage::Filter, tail)?.unwrap_or_default();
        self.stats.sent(Stage::Filter, tail.len());
        packets.extend(self.encode(tail)?);

        let output_index = self.output_index;
        let flushed = match &mut self.mode {
            StreamMode::Transcode { encoders, .. } => encoders.flush(output_index),
            StreamMode::Copy { .. } => Ok(Vec::new()),
        };
        let flushed = self.absorb(Stage::Encode, flushed)?.unwrap_or_default();
        self.stats.sent(Stage::Encode, flushed.len());
        packets.extend(flushed);

        if let StreamMode::Transcode { decoders, graph, encoders } = &self.mode {
            let discarded = decoders.dropped() + graph.dropped() + encoders.dropped();
            if discarded > 0 {
                self.stats.discarded(Stage::Filter, graph.dropped());
                self.stats.discarded(Stage::Decode, decoders.dropped());
                self.stats.discarded(Stage::Encode, encoders.dropped());
                tracing::debug!(discarded, "Frames discarded by reordering and alignment");
            }
        }
        Ok(packets)
    }
}
