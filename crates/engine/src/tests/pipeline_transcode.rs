// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::config::PipelineConfig;
use crate::decoder_pool::DecoderPool;
use crate::pipeline::{Outcome, Pipeline, TranscodeReport};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use transkit_api::{FilterNodeSpec, FilterSpec, OutputStreamSpec, TranscodeJob, UserGraph};
use transkit_core::{ErrorKind, Frame};

async fn transcode(job: &TranscodeJob, input: Bytes) -> (TranscodeReport, Bytes) {
    let sink = MemorySink::new();
    let pipeline = Pipeline::open(
        &registry(),
        &PipelineConfig::default(),
        job,
        Box::new(memory_source(input)),
        Box::new(sink.clone()),
    )
    .unwrap();
    let report = pipeline.run(CancellationToken::new()).await;
    (report, sink.contents())
}

fn steps(kind: &str, params: serde_json::Value) -> FilterSpec {
    let graph = transkit_api::FilterGraphSpec::chain(vec![FilterNodeSpec::new(kind).with_params(params)]);
    FilterSpec::Graph(graph)
}

#[tokio::test]
async fn test_b_frame_encode_keeps_timestamps_consistent() {
    let registry = registry();
    let job = TranscodeJob::new("tkc").with_stream(
        OutputStreamSpec::encode(0, "rlev")
            .with_params(json!({ "b_frames": 1 }))
            .with_filters(steps("scale", json!({ "width": 2, "height": 2 }))),
    );
    let (report, output) = transcode(&job, av_fixture(&registry)).await;
    assert_eq!(report.outcome, Outcome::Success);

    let (streams, packets) = read_tkc(&registry, output);
    assert_eq!(streams[0].codec, "rlev");
    assert_eq!(streams[0].param_u64("width"), Some(2));
    assert_eq!(streams[0].param_u64("reorder_delay"), Some(1));
    assert_eq!(packets.len(), 10);
    for packet in &packets {
        assert!(packet.dts <= packet.pts, "{packet:?}");
    }
    for pair in packets.windows(2) {
        assert!(pair[0].dts <= pair[1].dts);
    }
    assert_ne!(
        packets.iter().map(|p| p.pts).collect::<Vec<_>>(),
        (0..10).collect::<Vec<_>>(),
        "packets should leave in decode order"
    );

    let mut decoders = DecoderPool::new(Arc::clone(&registry), streams, 16);
    let mut frames: Vec<Frame> = Vec::new();
    for packet in packets {
        frames.extend(decoders.decode(packet).unwrap());
    }
    frames.extend(decoders.flush(0).unwrap());
    assert_eq!(frames.iter().map(|f| f.pts).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    assert_eq!(frames[3].pixels().unwrap().to_vec(), vec![3; 4]);
}

#[tokio::test]
async fn test_one_input_feeds_copy_and_transcode() {
    let registry = registry();
    let job = TranscodeJob::new("tkc")
        .with_stream(OutputStreamSpec::copy(1))
        .with_stream(OutputStreamSpec::encode(1, "pcm_f32le"));
    let (report, output) = transcode(&job, av_fixture(&registry)).await;
    assert!(report.is_success(), "{:?}", report.outcome);

    let (streams, packets) = read_tkc(&registry, output);
    assert_eq!(streams[0].codec, "pcm_s16le");
    assert_eq!(streams[1].codec, "pcm_f32le");
    let copied = stream_packets(&packets, 0);
    let converted = stream_packets(&packets, 1);
    assert_eq!(copied.len(), 10);
    assert_eq!(converted.len(), 10);
    // Same samples, twice the bytes.
    assert_eq!(converted[4].data.len(), copied[4].data.len() * 2);
    assert_eq!(converted[4].pts, copied[4].pts);
}

#[tokio::test]
async fn test_bad_packet_is_skipped() {
    let registry = registry();
    let mut packets: Vec<Packet> = (0..6).map(|pts| gray_packet(0, pts)).collect();
    packets[3] = Packet::new(0, vec![0; 3], 3, 3);
    let input = write_tkc(&registry, &[gray_stream(0)], &packets);

    let job = TranscodeJob::new("tkc").with_stream(OutputStreamSpec::encode(0, "rawvideo"));
    let (report, output) = transcode(&job, input).await;

    let Outcome::PartialSuccess { warnings } = &report.outcome else {
        panic!("expected partial success, got {:?}", report.outcome);
    };
    assert_eq!(warnings.len(), 1);
    let stream = &report.streams[0];
    assert_eq!(stream.skipped, 1);
    assert_eq!(stream.stats.decode.errored, 1);
    assert_eq!(stream.packets_written, 5);

    let (_, written) = read_tkc(&registry, output);
    assert_eq!(written.iter().map(|p| p.pts).collect::<Vec<_>>(), vec![0, 1, 2, 4, 5]);
}

#[tokio::test]
async fn test_yaml_steps_filters() {
    let registry = registry();
    let filters: UserGraph = serde_saphyr::from_str(
        r#"
steps:
  - kind: settb
    params: { tb: "1/1000" }
"#,
    )
    .unwrap();
    let job = TranscodeJob::new("tkc")
        .with_stream(OutputStreamSpec::encode(0, "rawvideo").with_filters(FilterSpec::User(filters)));
    let (report, output) = transcode(&job, av_fixture(&registry)).await;
    assert!(report.is_success());

    let (streams, packets) = read_tkc(&registry, output);
    assert_eq!(streams[0].time_base, Rational::new(1, 1000));
    assert_eq!(packets[3].pts, 100);
}

#[test]
fn test_invalid_graphs_fail_before_running() {
    let registry = registry();
    let open = |spec: OutputStreamSpec| {
        Pipeline::open(
            &registry,
            &PipelineConfig::default(),
            &TranscodeJob::new("tkc").with_stream(spec),
            Box::new(memory_source(av_fixture(&registry))),
            Box::new(MemorySink::new()),
        )
        .err()
        .map(|e| e.kind())
    };

    // Audio into a picture scaler.
    let audio_scaled = OutputStreamSpec::encode(1, "pcm_s16le").with_filters(steps("scale", json!({})));
    assert_eq!(open(audio_scaled), Some(ErrorKind::FormatNegotiationError));

    let unknown_filter = OutputStreamSpec::encode(0, "rawvideo").with_filters(steps("sharpen", json!({})));
    assert_eq!(open(unknown_filter), Some(ErrorKind::UnsupportedFormat));

    assert_eq!(open(OutputStreamSpec::encode(0, "h264")), Some(ErrorKind::UnsupportedFormat));
}
