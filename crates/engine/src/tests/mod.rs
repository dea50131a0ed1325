// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Unit tests for the engine crate: whole pipelines over in-memory containers.

#![allow(clippy::unwrap_used)]

mod pipeline_copy;
mod pipeline_transcode;

use bytes::Bytes;
use std::sync::Arc;
use transkit_core::io::{memory_source, MemorySink};
use transkit_core::{BuildProfile, FormatRegistry, MediaKind, Packet, Rational, StreamDescriptor};

fn registry() -> Arc<FormatRegistry> {
    let mut registry = FormatRegistry::new();
    transkit_nodes::register_components(&mut registry);
    registry.finalize(&BuildProfile::default()).unwrap()
}

/// Mono 16-bit PCM at 48 kHz.
fn pcm_stream(index: usize) -> StreamDescriptor {
    StreamDescriptor::new(index, MediaKind::Audio, "pcm_s16le", Rational::new(1, 48000))
        .with_param("sample_rate", 48000)
        .with_param("channels", 1)
}

/// 4x2 gray pictures at 30 fps.
fn gray_stream(index: usize) -> StreamDescriptor {
    StreamDescriptor::new(index, MediaKind::Video, "rawvideo", Rational::new(1, 30))
        .with_param("width", 4)
        .with_param("height", 2)
        .with_param("pix_fmt", "gray")
}

fn gray_packet(stream: usize, pts: i64) -> Packet {
    let shade = u8::try_from(pts % 256).unwrap();
    Packet::new(stream, vec![shade; 8], pts, pts).with_duration(1)
}

fn pcm_packet(stream: usize, pts: i64, samples: usize) -> Packet {
    let data: Vec<u8> = (0..samples).flat_map(|i| i16::try_from(i).unwrap().to_le_bytes()).collect();
    Packet::new(stream, data, pts, pts).with_duration(i64::try_from(samples).unwrap())
}

/// Ten gray pictures (1/30) and ten 1024-sample PCM packets (1/48000), stored
/// stream by stream the way a naive writer would.
fn av_fixture(registry: &FormatRegistry) -> Bytes {
    let mut packets: Vec<Packet> = (0..10).map(|pts| gray_packet(0, pts)).collect();
    packets.extend((0..10).map(|k| pcm_packet(1, k * 1024, 1024)));
    write_tkc(registry, &[gray_stream(0), pcm_stream(1)], &packets)
}

fn write_tkc(registry: &FormatRegistry, streams: &[StreamDescriptor], packets: &[Packet]) -> Bytes {
    let sink = MemorySink::new();
    let mut writer = registry.create_writer("tkc", Box::new(sink.clone())).unwrap();
    writer.write_header(streams).unwrap();
    for packet in packets {
        writer.write_packet(packet).unwrap();
    }
    writer.write_trailer().unwrap();
    sink.contents()
}

fn read_tkc(registry: &FormatRegistry, data: Bytes) -> (Vec<StreamDescriptor>, Vec<Packet>) {
    let mut demuxer = registry.open_demuxer("tkc", Box::new(memory_source(data))).unwrap();
    let streams = demuxer.streams().to_vec();
    let mut packets = Vec::new();
    while let Some(packet) = demuxer.next_packet().unwrap() {
        packets.push(packet);
    }
    (streams, packets)
}

fn stream_packets(packets: &[Packet], stream: usize) -> Vec<&Packet> {
    packets.iter().filter(|p| p.stream_index == stream).collect()
}
