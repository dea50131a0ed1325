// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline orchestration.
//!
//! [`Pipeline::open`] resolves a [`TranscodeJob`] against the format registry: it
//! opens the demuxer, validates every filter graph, negotiates encoder inputs and
//! writes the output header. Any failure there is reported before a single packet
//! is read.
//!
//! [`Pipeline::run`] then wires three kinds of tasks together:
//!
//! ```text
//! demux thread ──bounded──▶ stream worker (decode → filter → encode) ──┐
//!              ──bounded──▶ stream worker                             ├─bounded──▶ muxer thread
//!              ──bounded──▶ stream worker (copy)                      ─┘
//! ```
//!
//! Every queue is bounded, so a slow muxer eventually pauses the demuxer.

use crate::config::PipelineConfig;
use crate::constants::PROBE_SIZE;
use crate::decoder_pool::DecoderPool;
use crate::encoder_pool::{EncoderPool, EncoderSetup};
use crate::filter_graph::FilterGraph;
use crate::muxer::{run_muxer, MuxMessage, MuxSummary, Muxer};
use crate::worker::{StreamMode, StreamReport, StreamStatus, StreamWorker};
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use transkit_api::{FilterGraphSpec, OutputStreamSpec, TranscodeJob};
use transkit_core::io::{ByteSink, ByteSource};
use transkit_core::{
    ComponentKind, Demuxer, ErrorKind, FormatRegistry, Packet, PipelineState, PipelineStateUpdate,
    Rational, Result, SeekTarget, Severity, Stage, StreamDescriptor, StreamStatsTracker,
    StreamStatsUpdate, TelemetryEmitter, TelemetryEvent, TranscodeError,
};

/// How a pipeline ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Every stream reached the output, but something was skipped, cut short or lost.
    PartialSuccess { warnings: Vec<String> },
    /// First fatal error and the stage that raised it.
    Failed { kind: ErrorKind, stage: Stage, message: String },
}

/// Final status of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeReport {
    pub outcome: Outcome,
    pub final_state: PipelineState,
    pub streams: Vec<StreamReport>,
}

impl TranscodeReport {
    /// A report for a pipeline that never got past [`Pipeline::open`].
    pub fn open_failed(err: &TranscodeError) -> Self {
        let stage = open_stage(err);
        Self {
            outcome: Outcome::Failed { kind: err.kind(), stage, message: err.to_string() },
            final_state: PipelineState::Error { kind: err.kind(), stage },
            streams: Vec::new(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn warnings(&self) -> &[String] {
        match &self.outcome {
            Outcome::PartialSuccess { warnings } => warnings,
            _ => &[],
        }
    }
}

/// Stage blamed for an error raised while opening a pipeline.
pub const fn open_stage(err: &TranscodeError) -> Stage {
    match err {
        TranscodeError::UnsupportedFormat(_) => Stage::Registry,
        TranscodeError::Format(_) | TranscodeError::Io(_) | TranscodeError::Seek(_) => Stage::Demux,
        TranscodeError::Mux(_) => Stage::Mux,
        TranscodeError::Decode(_) | TranscodeError::CorruptHeader(_) => Stage::Decode,
        TranscodeError::Encode(_) => Stage::Encode,
        TranscodeError::Graph(_)
        | TranscodeError::FormatNegotiation(_)
        | TranscodeError::ReorderOverflow(_) => Stage::Filter,
        TranscodeError::Configuration(_) | TranscodeError::Cancelled => Stage::Orchestrator,
    }
}

/// Publishes validated state transitions.
struct StateCell {
    pipeline: String,
    tx: watch::Sender<PipelineStateUpdate>,
    telemetry: Option<TelemetryEmitter>,
}

impl StateCell {
    fn new(pipeline: String) -> Self {
        let (tx, _) = watch::channel(PipelineStateUpdate::new(PipelineState::Idle));
        Self { pipeline, tx, telemetry: None }
    }

    fn get(&self) -> PipelineState {
        self.tx.borrow().state
    }

    fn transition(&self, next: PipelineState) {
        let current = self.get();
        if !current.can_transition_to(&next) {
            tracing::warn!(
                pipeline = %self.pipeline,
                from = current.name(),
                to = next.name(),
                "Ignoring invalid state transition"
            );
            return;
        }
        match next {
            PipelineState::Error { kind, stage } => tracing::error!(
                pipeline = %self.pipeline,
                from = current.name(),
                kind = %kind,
                stage = %stage,
                "Pipeline entered error state"
            ),
            _ => tracing::info!(
                pipeline = %self.pipeline,
                from = current.name(),
                to = next.name(),
                "Pipeline state changed"
            ),
        }
        if let Some(telemetry) = &self.telemetry {
            telemetry.emit("pipeline.state", json!({ "from": current, "to": next }));
        }
        self.tx.send_replace(PipelineStateUpdate::new(next));
    }
}

/// One output stream, ready to be handed to a worker.
struct Route {
    output_index: usize,
    input_index: usize,
    codec: String,
    mode: StreamMode,
}

/// An opened pipeline. Consumed by [`Pipeline::run`].
pub struct Pipeline {
    name: String,
    config: PipelineConfig,
    demuxer: Box<dyn Demuxer>,
    muxer: Muxer,
    routes: Vec<Route>,
    excluded: Vec<StreamReport>,
    start: Option<SeekTarget>,
    state: StateCell,
    stats_tx: Option<mpsc::Sender<StreamStatsUpdate>>,
    telemetry_tx: Option<mpsc::Sender<TelemetryEvent>>,
}

impl Pipeline {
    /// Opens input and output and prepares every output stream.
    ///
    /// Streams whose decoder rejects the stream header are excluded with a warning
    /// and reported as failed; the rest of the job proceeds.
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat`: a container, codec or filter is unknown or disabled
    /// - `FormatError`: the input cannot be probed or parsed
    /// - `GraphError` / `FormatNegotiationError`: a filter graph is invalid
    /// - `Configuration`: the job references missing streams or bad parameters
    /// - `MuxError`: the output header cannot be written
    ///
    /// [`open_stage`] names the stage to blame for each of these.
    pub fn open(
        registry: &Arc<FormatRegistry>,
        config: &PipelineConfig,
        job: &TranscodeJob,
        mut source: Box<dyn ByteSource>,
        sink: Box<dyn ByteSink>,
    ) -> Result<Self> {
        let name = job.name.clone().unwrap_or_else(|| "transcode".to_string());
        let state = StateCell::new(name.clone());
        tracing::info!(pipeline = %name, output = %job.output_format, "Opening pipeline");

        let input_format = match &job.input_format {
            Some(format) => format.clone(),
            None => probe(registry, source.as_mut())?,
        };
        registry.require(ComponentKind::Demuxer, &input_format)?;
        registry.require(ComponentKind::Muxer, &job.output_format)?;

        let demuxer =
            registry.open_demuxer(&input_format, source).map_err(|e| e.in_container(Stage::Demux))?;
        let inputs = demuxer.streams().to_vec();
        tracing::info!(format = %input_format, streams = inputs.len(), "Input opened");

        let specs = if job.streams.is_empty() {
            inputs.iter().map(|s| OutputStreamSpec::copy(s.index)).collect()
        } else {
            job.streams.clone()
        };

        let mut routes = Vec::new();
        let mut outputs = Vec::new();
        let mut excluded = Vec::new();
        for spec in specs {
            let input = inputs.iter().find(|s| s.index == spec.input_stream).ok_or_else(|| {
                TranscodeError::Configuration(format!(
                    "Input has no stream {} (it has {})",
                    spec.input_stream,
                    inputs.len()
                ))
            })?;
            let output_index = routes.len();
            match prepare_route(registry, config, &spec, input, output_index)? {
                Prepared::Ready(route, descriptor) => {
                    tracing::info!(
                        input = route.input_index,
                        output = output_index,
                        codec = %route.codec,
                        "Output stream configured"
                    );
                    routes.push(route);
                    outputs.push(descriptor);
                },
                Prepared::Excluded(err) => {
                    tracing::warn!(
                        input = input.index,
                        error = %err,
                        "Excluding stream with unreadable header"
                    );
                    excluded.push(StreamReport::excluded(input.index, &spec.codec, &err));
                },
            }
        }
        if routes.is_empty() {
            return Err(match excluded.first() {
                Some(_) => TranscodeError::CorruptHeader("No decodable input stream left".to_string()),
                None => TranscodeError::Configuration("Job has no output streams".to_string()),
            });
        }

        let writer = registry
            .create_writer(&job.output_format, sink)
            .map_err(|e| e.in_container(Stage::Mux))?;
        let muxer = Muxer::open(writer, &outputs, config.max_interleave_packets)?;

        let start = job.start_time_us().map(|us| SeekTarget::new(us, Rational::MICROS));
        state.transition(PipelineState::Opened);

        Ok(Self {
            name,
            config: config.clone(),
            demuxer,
            muxer,
            routes,
            excluded,
            start,
            state,
            stats_tx: None,
            telemetry_tx: None,
        })
    }

    /// Sends periodic per-stream statistics to `tx`.
    #[must_use]
    pub fn with_stats_sender(mut self, tx: mpsc::Sender<StreamStatsUpdate>) -> Self {
        self.stats_tx = Some(tx);
        self
    }

    /// Sends structured stage events to `tx`. Delivery is best-effort.
    #[must_use]
    pub fn with_telemetry_sender(mut self, tx: mpsc::Sender<TelemetryEvent>) -> Self {
        self.telemetry_tx = Some(tx);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Observes state transitions, starting with the current state.
    ///
    /// The channel closes when [`Pipeline::run`] returns; the final state stays
    /// readable through the receiver.
    pub fn subscribe(&self) -> watch::Receiver<PipelineStateUpdate> {
        self.state.tx.subscribe()
    }

    /// Output streams as `(output index, input index, codec)`.
    pub fn output_streams(&self) -> Vec<(usize, usize, &str)> {
        self.routes.iter().map(|r| (r.output_index, r.input_index, r.codec.as_str())).collect()
    }

    /// Runs the pipeline to completion.
    ///
    /// Cancelling `cancel` stops reading input; everything already read is still
    /// flushed through every stage and the output is finalized.
    pub async fn run(self, cancel: CancellationToken) -> TranscodeReport {
        let started = Instant::now();
        let Self {
            name,
            config,
            demuxer,
            muxer,
            routes,
            excluded,
            start,
            mut state,
            stats_tx,
            telemetry_tx,
        } = self;
        state.telemetry = telemetry_tx
            .as_ref()
            .map(|tx| TelemetryEmitter::new(Stage::Orchestrator, None, Some(tx.clone())));
        state.transition(PipelineState::Running);

        let (mux_tx, mux_rx) = mpsc::channel(config.resolved_mux_queue_capacity());
        let muxer_task = tokio::task::spawn_blocking(move || run_muxer(muxer, mux_rx));

        let mut targets: HashMap<usize, Vec<mpsc::Sender<Packet>>> = HashMap::new();
        let mut workers = Vec::with_capacity(routes.len());
        for route in routes {
            let (tx, rx) = mpsc::channel(config.resolved_stream_queue_capacity());
            targets.entry(route.input_index).or_default().push(tx);

            let worker = StreamWorker::new(
                route.output_index,
                route.input_index,
                route.codec,
                route.mode,
                StreamStatsTracker::new(route.output_index, config.stats_interval_packets, stats_tx.clone()),
                TelemetryEmitter::new(Stage::Decode, Some(route.output_index), telemetry_tx.clone()),
                config.batch_size,
            );
            let span = tracing::info_span!("stream_worker", stream = route.output_index);
            workers.push(tokio::spawn(worker.run(rx, mux_tx.clone()).instrument(span)));
        }
        // Workers hold the only remaining senders; the muxer stops once they finish.
        drop(mux_tx);

        let demux_telemetry = TelemetryEmitter::new(Stage::Demux, None, telemetry_tx.clone());
        let handle = tokio::runtime::Handle::current();
        let demux_cancel = cancel.clone();
        let demux_task = tokio::task::spawn_blocking(move || {
            demux_loop(&handle, demuxer, targets, start, &demux_cancel, &demux_telemetry)
        });

        let demux = match demux_task.await {
            Ok(outcome) => outcome,
            Err(e) => DemuxOutcome {
                error: Some(TranscodeError::Format(format!("Demux thread failed: {e}"))),
                ..DemuxOutcome::default()
            },
        };
        state.transition(PipelineState::Draining);

        let mut streams = Vec::with_capacity(workers.len() + excluded.len());
        for result in futures::future::join_all(workers).await {
            match result {
                Ok(report) => streams.push(report),
                Err(e) => tracing::error!(error = %e, "Stream worker task failed"),
            }
        }
        let mux_result = match muxer_task.await {
            Ok(result) => result,
            Err(e) => Err(TranscodeError::Mux(format!("Muxer thread failed: {e}"))),
        };

        if let Ok(MuxSummary { packets_written, forced_writes }) = &mux_result {
            for report in &mut streams {
                if let Some(written) = report.output_index.and_then(|i| packets_written.get(i)) {
                    report.packets_written = *written;
                }
            }
            if *forced_writes > 0 {
                tracing::warn!(forced_writes, "Output interleaving was forced by a lagging stream");
            }
        }
        streams.extend(excluded);

        let outcome = decide_outcome(&demux, mux_result.err(), &streams, cancel.is_cancelled());
        let final_state = match &outcome {
            Outcome::Failed { kind, stage, .. } => PipelineState::Error { kind: *kind, stage: *stage },
            _ => PipelineState::Closed,
        };
        state.transition(final_state);

        let elapsed = started.elapsed().as_secs_f64();
        let status = if matches!(final_state, PipelineState::Closed) { "ok" } else { "error" };
        global::meter("transkit_engine")
            .f64_histogram("pipeline.duration")
            .with_description("Wall-clock time of a pipeline run in seconds")
            .with_unit("s")
            .build()
            .record(elapsed, &[KeyValue::new("status", status)]);
        tracing::info!(
            pipeline = %name,
            elapsed_secs = elapsed,
            packets_demuxed = demux.packets,
            outcome = ?outcome,
            "Pipeline finished"
        );

        TranscodeReport { outcome, final_state, streams }
    }
}

enum Prepared {
    Ready(Route, StreamDescriptor),
    Excluded(TranscodeError),
}

/// Resolves one output stream spec into a worker route and its output descriptor.
fn prepare_route(
    registry: &Arc<FormatRegistry>,
    config: &PipelineConfig,
    spec: &OutputStreamSpec,
    input: &StreamDescriptor,
    output_index: usize,
) -> Result<Prepared> {
    if spec.is_copy() {
        let mut descriptor = input.clone();
        descriptor.index = output_index;
        if let Some(tb) = spec.time_base {
            descriptor.time_base = tb;
        }
        let mode = StreamMode::Copy {
            input_time_base: input.time_base,
            output_time_base: descriptor.time_base,
        };
        let route = Route { output_index, input_index: input.index, codec: spec.codec.clone(), mode };
        return Ok(Prepared::Ready(route, descriptor));
    }

    let decoder = registry.decoder(&input.codec)?;
    let encoder = registry.encoder(&spec.codec)?;
    let decoded_format = match decoder.output_format(input) {
        Ok(format) => format,
        Err(err) if err.severity() == Severity::StreamFatal => return Ok(Prepared::Excluded(err)),
        Err(err) => return Err(err),
    };

    let graph_spec = match spec.filters.clone() {
        Some(filters) => filters.into_graph()?,
        None => FilterGraphSpec::passthrough(),
    };
    let accepts = encoder.accepted_formats(spec.params.as_ref())?;
    let graph = FilterGraph::validate(&graph_spec, decoded_format, input.time_base, &accepts, registry)?;
    tracing::debug!(input = input.index, schedule = ?graph.schedule(), "Filter graph validated");

    let time_base = spec.time_base.unwrap_or_else(|| graph.output_time_base());
    let format = graph.output_format();
    let mut descriptor = encoder.output_stream(&format, time_base, spec.params.as_ref())?;
    descriptor.index = output_index;

    let decoders = DecoderPool::new(Arc::clone(registry), [input.clone()], config.max_reorder_depth);
    let mut encoders = EncoderPool::new(config.max_reorder_depth);
    encoders.add_stream(EncoderSetup {
        factory: encoder,
        stream: descriptor.clone(),
        format,
        params: spec.params.clone(),
    });

    let route = Route {
        output_index,
        input_index: input.index,
        codec: spec.codec.clone(),
        mode: StreamMode::Transcode { decoders, graph, encoders },
    };
    Ok(Prepared::Ready(route, descriptor))
}

/// Picks a demuxer from the first bytes of `source`, then rewinds it.
fn probe(registry: &FormatRegistry, source: &mut dyn ByteSource) -> Result<String> {
    let mut head = Vec::with_capacity(PROBE_SIZE);
    Read::take(&mut *source, PROBE_SIZE as u64).read_to_end(&mut head)?;
    source.seek(SeekFrom::Start(0)).map_err(|e| {
        TranscodeError::Format(format!("Cannot rewind input after probing ({e}); set input_format"))
    })?;
    let format = registry.probe(&head).ok_or_else(|| {
        TranscodeError::UnsupportedFormat("No enabled demuxer recognizes the input".to_string())
    })?;
    tracing::debug!(format, bytes = head.len(), "Probed input format");
    Ok(format.to_string())
}

#[derive(Default)]
struct DemuxOutcome {
    packets: u64,
    skipped: u64,
    cancelled: bool,
    seek_failed: Option<String>,
    error: Option<TranscodeError>,
}

/// Reads packets and routes them to the workers of their input stream.
///
/// Runs on a blocking thread. Queue waits also watch `cancel`, so a stalled
/// pipeline can still be cancelled.
fn demux_loop(
    handle: &tokio::runtime::Handle,
    mut demuxer: Box<dyn Demuxer>,
    mut targets: HashMap<usize, Vec<mpsc::Sender<Packet>>>,
    start: Option<SeekTarget>,
    cancel: &CancellationToken,
    telemetry: &TelemetryEmitter,
) -> DemuxOutcome {
    let mut outcome = DemuxOutcome::default();
    let counter: Counter<u64> = global::meter("transkit_engine")
        .u64_counter("demuxer.packets_read")
        .with_description("Packets read from the input container")
        .build();

    if let Some(target) = start {
        if let Err(err) = demuxer.seek(target) {
            tracing::warn!(error = %err, "Seek failed, reading from the start");
            telemetry.emit_error("demux.seek_failed", &err);
            outcome.seek_failed = Some(err.to_string());
        }
    }

    loop {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        if targets.is_empty() {
            tracing::debug!("Every stream worker stopped, ending demux early");
            break;
        }
        let packet = match demuxer.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(err) if err.is_recoverable() => {
                outcome.skipped += 1;
                tracing::warn!(error = %err, "Skipping unreadable packet");
                telemetry.emit_error("demux.skipped", &err);
                continue;
            },
            Err(err) => {
                let err = err.in_container(Stage::Demux);
                telemetry.emit_error("demux.failed", &err);
                outcome.error = Some(err);
                break;
            },
        };
        outcome.packets += 1;
        counter.add(1, &[]);

        let input = packet.stream_index;
        let Some(senders) = targets.get_mut(&input) else {
            tracing::trace!(stream = input, "Dropping packet of unmapped stream");
            continue;
        };
        let mut closed = Vec::new();
        for (i, tx) in senders.iter().enumerate() {
            let sent = handle.block_on(async {
                tokio::select! {
                    () = cancel.cancelled() => None,
                    result = tx.send(packet.clone()) => Some(result.is_ok()),
                }
            });
            match sent {
                Some(true) => {},
                Some(false) => closed.push(i),
                None => {
                    outcome.cancelled = true;
                    break;
                },
            }
        }
        for i in closed.into_iter().rev() {
            tracing::debug!(stream = input, "Stream worker stopped accepting packets");
            senders.remove(i);
        }
        if senders.is_empty() {
            targets.remove(&input);
        }
        if outcome.cancelled {
            break;
        }
    }
    if outcome.cancelled {
        tracing::info!(packets = outcome.packets, "Demuxing cancelled");
    } else {
        tracing::info!(packets = outcome.packets, "Demuxing finished");
    }
    outcome
}

/// Applies the failure rules to everything that happened during a run.
fn decide_outcome(
    demux: &DemuxOutcome,
    mux_error: Option<TranscodeError>,
    streams: &[StreamReport],
    cancelled: bool,
) -> Outcome {
    let failed = |err: &TranscodeError, stage| Outcome::Failed {
        kind: err.kind(),
        stage,
        message: err.to_string(),
    };
    if let Some(err) = &demux.error {
        return failed(err, Stage::Demux);
    }
    if let Some(err) = &mux_error {
        return failed(err, Stage::Mux);
    }
    for report in streams {
        if let StreamStatus::Failed { kind, severity, stage, message } = &report.status {
            if *severity == Severity::PipelineFatal {
                return Outcome::Failed { kind: *kind, stage: *stage, message: message.clone() };
            }
        }
    }
    if !streams.is_empty() && streams.iter().all(StreamReport::is_failed) {
        if let Some(StreamStatus::Failed { kind, stage, message, .. }) =
            streams.first().map(|r| &r.status)
        {
            return Outcome::Failed { kind: *kind, stage: *stage, message: message.clone() };
        }
    }

    let mut warnings = Vec::new();
    if cancelled || demux.cancelled {
        warnings.push("cancelled".to_string());
    }
    if let Some(message) = &demux.seek_failed {
        warnings.push(format!("seek failed, output starts at the beginning: {message}"));
    }
    if demux.skipped > 0 {
        warnings.push(format!("{} unreadable input packets skipped", demux.skipped));
    }
    for report in streams {
        let label = report.output_index.map_or_else(
            || format!("input stream {}", report.input_index),
            |i| format!("output stream {i}"),
        );
        if let StreamStatus::Failed { kind, message, .. } = &report.status {
            warnings.push(format!("{label} failed ({kind}): {message}"));
        }
        if report.skipped > 0 {
            warnings.push(format!("{label}: {} items skipped after errors", report.skipped));
        }
        let discarded = report.stats.decode.discarded + report.stats.filter.discarded + report.stats.encode.discarded;
        if discarded > 0 {
            warnings.push(format!("{label}: {discarded} frames discarded"));
        }
    }

    if warnings.is_empty() {
        Outcome::Success
    } else {
        Outcome::PartialSuccess { warnings }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use transkit_core::StreamStats;

    fn report(index: usize, status: StreamStatus, skipped: u64) -> StreamReport {
        StreamReport {
            output_index: Some(index),
            input_index: index,
            codec: "copy".to_string(),
            status,
            skipped,
            packets_written: 0,
            stats: StreamStats::default(),
        }
    }

    fn corrupt() -> StreamStatus {
        StreamStatus::Failed {
            kind: ErrorKind::CorruptHeader,
            severity: Severity::StreamFatal,
            stage: Stage::Decode,
            message: "bad header".to_string(),
        }
    }

    #[test]
    fn test_clean_run_is_success() {
        let streams = [report(0, StreamStatus::Completed, 0), report(1, StreamStatus::Completed, 0)];
        assert_eq!(decide_outcome(&DemuxOutcome::default(), None, &streams, false), Outcome::Success);
    }

    #[test]
    fn test_one_failed_stream_is_partial_success() {
        let streams = [
            report(0, StreamStatus::Completed, 0),
            report(1, corrupt(), 0),
            report(2, StreamStatus::Completed, 3),
        ];
        let outcome = decide_outcome(&DemuxOutcome::default(), None, &streams, false);
        let Outcome::PartialSuccess { warnings } = outcome else { panic!("expected partial success") };
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("corrupt_header"));
    }

    #[test]
    fn test_all_streams_failed_is_failure() {
        let streams = [report(0, corrupt(), 0)];
        let outcome = decide_outcome(&DemuxOutcome::default(), None, &streams, false);
        assert!(matches!(outcome, Outcome::Failed { kind: ErrorKind::CorruptHeader, stage: Stage::Decode, .. }));
    }

    #[test]
    fn test_container_errors_win() {
        let demux = DemuxOutcome { error: Some(TranscodeError::Format("truncated".into())), ..Default::default() };
        let streams = [report(0, StreamStatus::Completed, 0)];
        let outcome = decide_outcome(&demux, Some(TranscodeError::Mux("late".into())), &streams, true);
        assert!(matches!(outcome, Outcome::Failed { kind: ErrorKind::FormatError, stage: Stage::Demux, .. }));
    }

    #[test]
    fn test_cancellation_is_a_warning() {
        let streams = [report(0, StreamStatus::Completed, 0)];
        let outcome = decide_outcome(&DemuxOutcome::default(), None, &streams, true);
        assert_eq!(outcome, Outcome::PartialSuccess { warnings: vec!["cancelled".to_string()] });
    }

    #[test]
    fn test_open_stage_mapping() {
        assert_eq!(open_stage(&TranscodeError::UnsupportedFormat("x".into())), Stage::Registry);
        assert_eq!(open_stage(&TranscodeError::Graph("x".into())), Stage::Filter);
        assert_eq!(open_stage(&TranscodeError::Mux("x".into())), Stage::Mux);
        let report = TranscodeReport::open_failed(&TranscodeError::FormatNegotiation("x".into()));
        assert_eq!(
            report.final_state,
            PipelineState::Error { kind: ErrorKind::FormatNegotiationError, stage: Stage::Filter }
        );
    }

    #[test]
    fn test_state_cell_rejects_invalid_transitions() {
        let cell = StateCell::new("test".to_string());
        let mut rx = cell.tx.subscribe();
        cell.transition(PipelineState::Running);
        assert_eq!(cell.get(), PipelineState::Idle);
        cell.transition(PipelineState::Opened);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, PipelineState::Opened);
    }
}
