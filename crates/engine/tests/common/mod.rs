// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for the engine integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use transkit_core::io::{memory_source, MemorySink};
use transkit_core::{FormatRegistry, MediaKind, Packet, Rational, StreamDescriptor};
use transkit_engine::config::RegistryConfig;
use transkit_engine::{Engine, EngineConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn engine(flags: &[&str]) -> Engine {
    let config = EngineConfig {
        registry: RegistryConfig { flags: flags.iter().map(ToString::to_string).collect() },
        ..EngineConfig::default()
    };
    Engine::new(config).expect("engine should build")
}

pub fn pcm_stream(index: usize, channels: u32) -> StreamDescriptor {
    StreamDescriptor::new(index, MediaKind::Audio, "pcm_s16le", Rational::new(1, 48000))
        .with_param("sample_rate", 48000)
        .with_param("channels", channels)
}

pub fn gray_stream(index: usize, codec: &str, time_base: Rational) -> StreamDescriptor {
    StreamDescriptor::new(index, MediaKind::Video, codec, time_base)
        .with_param("width", 4)
        .with_param("height", 2)
        .with_param("pix_fmt", "gray")
}

pub fn gray_packets(stream: usize, count: i64) -> Vec<Packet> {
    (0..count)
        .map(|pts| {
            let shade = u8::try_from(pts % 256).unwrap();
            Packet::new(stream, vec![shade; 8], pts, pts).with_duration(1)
        })
        .collect()
}

pub fn pcm_packets(stream: usize, count: i64, samples: i64) -> Vec<Packet> {
    (0..count)
        .map(|k| {
            let data = vec![0u8; usize::try_from(samples * 2).unwrap()];
            Packet::new(stream, data, k * samples, k * samples).with_duration(samples)
        })
        .collect()
}

pub fn write_tkc(registry: &FormatRegistry, streams: &[StreamDescriptor], packets: &[Packet]) -> Bytes {
    let sink = MemorySink::new();
    let mut writer = registry.create_writer("tkc", Box::new(sink.clone())).unwrap();
    writer.write_header(streams).unwrap();
    for packet in packets {
        writer.write_packet(packet).unwrap();
    }
    writer.write_trailer().unwrap();
    sink.contents()
}

pub fn read_tkc(registry: &FormatRegistry, data: Bytes) -> (Vec<StreamDescriptor>, Vec<Packet>) {
    let mut demuxer = registry.open_demuxer("tkc", Box::new(memory_source(data))).unwrap();
    let streams = demuxer.streams().to_vec();
    let mut packets = Vec::new();
    while let Some(packet) = demuxer.next_packet().unwrap() {
        packets.push(packet);
    }
    (streams, packets)
}

pub fn count_stream(packets: &[Packet], stream: usize) -> usize {
    packets.iter().filter(|p| p.stream_index == stream).count()
}
