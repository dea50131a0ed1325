// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::config::PipelineConfig;
use crate::pipeline::{Outcome, Pipeline};
use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;
use transkit_api::{OutputStreamSpec, TranscodeJob};
use transkit_core::PipelineState;

fn open(job: &TranscodeJob, input: Bytes, sink: &MemorySink) -> Pipeline {
    Pipeline::open(
        &registry(),
        &PipelineConfig::default(),
        job,
        Box::new(memory_source(input)),
        Box::new(sink.clone()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_remux_reproduces_packets() {
    let registry = registry();
    let input = av_fixture(&registry);
    let (_, original) = read_tkc(&registry, input.clone());

    let sink = MemorySink::new();
    let pipeline = open(&TranscodeJob::new("tkc").with_input_format("tkc"), input, &sink);
    assert_eq!(pipeline.state(), PipelineState::Opened);
    let report = pipeline.run(CancellationToken::new()).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.final_state, PipelineState::Closed);
    assert_eq!(report.streams.iter().map(|s| s.packets_written).collect::<Vec<_>>(), vec![10, 10]);

    let (streams, remuxed) = read_tkc(&registry, sink.contents());
    assert_eq!(streams.len(), 2);
    for stream in 0..2 {
        let before = stream_packets(&original, stream);
        let after = stream_packets(&remuxed, stream);
        assert_eq!(before, after, "stream {stream} changed");
    }
}

#[tokio::test]
async fn test_output_is_interleaved_by_time() {
    let registry = registry();
    let sink = MemorySink::new();
    let report = open(&TranscodeJob::new("tkc"), av_fixture(&registry), &sink)
        .run(CancellationToken::new())
        .await;
    assert!(report.is_success());

    let (streams, packets) = read_tkc(&registry, sink.contents());
    for pair in packets.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let order = Rational::compare_timestamps(
            a.dts,
            streams[a.stream_index].time_base,
            b.dts,
            streams[b.stream_index].time_base,
        );
        assert_ne!(order, Ordering::Greater, "{a:?} written before {b:?}");
    }
    // 1024/48000 s is shorter than 1/30 s, so audio packets overtake video ones.
    let order: Vec<usize> = packets.iter().take(4).map(|p| p.stream_index).collect();
    assert_eq!(order, vec![0, 1, 1, 0]);
}

#[tokio::test]
async fn test_copy_rescales_to_requested_time_base() {
    let registry = registry();
    let job = TranscodeJob::new("tkc")
        .with_stream(OutputStreamSpec::copy(0).with_time_base(Rational::new(1, 90000)));
    let sink = MemorySink::new();
    let report = open(&job, av_fixture(&registry), &sink).run(CancellationToken::new()).await;
    assert!(report.is_success());

    let (streams, packets) = read_tkc(&registry, sink.contents());
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].time_base, Rational::new(1, 90000));
    let pts: Vec<i64> = packets.iter().take(3).map(|p| p.pts).collect();
    assert_eq!(pts, vec![0, 3000, 6000]);
    assert_eq!(packets[1].duration, 3000);
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let registry = registry();
    let sink = MemorySink::new();
    let pipeline = open(&TranscodeJob::new("tkc"), av_fixture(&registry), &sink);
    let mut rx = pipeline.subscribe();
    assert_eq!(rx.borrow_and_update().state, PipelineState::Opened);

    let report = pipeline.run(CancellationToken::new()).await;
    // The last state is still delivered after the pipeline is gone.
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().state, PipelineState::Closed);
    assert_eq!(report.final_state, PipelineState::Closed);
    assert!(rx.changed().await.is_err(), "channel closes once run returns");
}

#[tokio::test]
async fn test_stream_reports_carry_stats() {
    let registry = registry();
    let sink = MemorySink::new();
    let (stats_tx, mut stats_rx) = tokio::sync::mpsc::channel(16);
    let report = open(&TranscodeJob::new("tkc"), av_fixture(&registry), &sink)
        .with_stats_sender(stats_tx)
        .run(CancellationToken::new())
        .await;

    for stream in &report.streams {
        assert_eq!(stream.codec, "copy");
        assert_eq!(stream.stats.muxed, 10);
        assert_eq!(stream.stats.losses(), 0);
    }
    // Every worker sends a final snapshot.
    let mut finals = Vec::new();
    while let Ok(update) = stats_rx.try_recv() {
        finals.push(update.stream_index);
    }
    finals.sort_unstable();
    finals.dedup();
    assert_eq!(finals, vec![0, 1]);
}

#[tokio::test]
async fn test_missing_input_stream_is_rejected() {
    let registry = registry();
    let job = TranscodeJob::new("tkc").with_stream(OutputStreamSpec::copy(5));
    let err = Pipeline::open(
        &registry,
        &PipelineConfig::default(),
        &job,
        Box::new(memory_source(av_fixture(&registry))),
        Box::new(MemorySink::new()),
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), transkit_core::ErrorKind::Configuration);
}
