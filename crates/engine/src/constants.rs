// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared performance constants for the pipeline orchestrator.
//!
//! This module provides the canonical default values for all performance-related
//! configuration. [`crate::config::PipelineConfig`] and its profiles reference these
//! constants to keep the defaults in one place.
//!
//! # Queue Capacity Guidelines
//!
//! Queue capacities are measured in packets (not bytes). The actual memory footprint
//! depends on packet size: a 640x360 rgb24 picture is ~690KB uncompressed, a
//! 1024-sample stereo s16 audio packet is 4KB.
//!
//! - **Higher capacity** = more buffering, smoother throughput, more memory
//! - **Lower capacity** = less buffering, earlier backpressure on the demuxer

// === Batch Processing ===

/// Default batch size for packet processing in stream workers.
///
/// A worker drains up to this many queued packets before yielding back to the
/// runtime. Higher values reduce wakeups, lower values interleave workers more
/// finely on a small thread pool.
///
/// Recommended range: 8-64
pub const DEFAULT_BATCH_SIZE: usize = 32;

// === Pipeline Queue Capacities ===

/// Default capacity of the queue between the demuxer and each stream worker.
///
/// The demux thread blocks when a worker's queue is full, which is how a slow
/// encoder throttles reading. Every output stream has its own queue, so a slow
/// video worker does not starve audio until its queue fills.
///
/// Recommended:
/// - Low-latency: 8
/// - Balanced: 64
/// - High-throughput: 256
pub const DEFAULT_STREAM_QUEUE_CAPACITY: usize = 64;

/// Default capacity of the queue feeding the muxer writer thread.
///
/// This is the muxer high-watermark: once this many encoded packets wait for the
/// writer, workers block on send until the writer catches up.
///
/// Recommended:
/// - Low-latency: 16
/// - Balanced: 128
/// - High-throughput: 512
pub const DEFAULT_MUX_QUEUE_CAPACITY: usize = 128;

/// Default bound on packets held by the muxer for interleaving.
///
/// The muxer only writes a packet once every open stream has a buffered head to
/// compare against. A stream that stops producing (long gap, slow filter) would
/// make the other streams pile up; past this bound the smallest head is written
/// anyway and a warning is logged.
pub const DEFAULT_MAX_INTERLEAVE_PACKETS: usize = 1024;

/// Default depth of the decoder and encoder reorder buffers.
///
/// Bounds how far presentation order may lag decode order. Codecs with more
/// consecutive B pictures than this lose frames with a `ReorderOverflow` warning.
pub const DEFAULT_MAX_REORDER_DEPTH: usize = 16;

/// Default number of packets between stream statistics updates.
///
/// Updates are also sent on a timer, so this only matters for fast streams.
pub const DEFAULT_STATS_INTERVAL_PACKETS: u64 = 500;

// === Observer Channels ===

/// Default buffer size for stats and telemetry subscriber channels.
///
/// Senders use `try_send`, so a subscriber that falls this far behind loses
/// updates instead of slowing the pipeline.
pub const DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY: usize = 128;

/// Number of leading bytes read from a source for format probing.
pub const PROBE_SIZE: usize = 64;
