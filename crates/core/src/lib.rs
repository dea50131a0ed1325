// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! TransKit Core - Fundamental traits and data structures for media transcoding.
//!
//! This crate defines the abstractions every TransKit pipeline is built from:
//!
//! ## Core Modules
//!
//! - [`types`]: Stream descriptors, packets, frames and their formats
//! - [`rational`]: Time bases and exact timestamp rescaling
//! - [`container`]: Demuxer and ContainerWriter traits
//! - [`codec`]: Decoder and Encoder traits and their factories
//! - [`node`]: FilterNode trait for filter graph nodes
//! - [`caps`]: Format capabilities and negotiation
//! - [`pins`]: Port declarations used for graph validation
//! - [`registry`]: Component discovery keyed by kind and identifier
//! - [`profile`]: Build profiles (enable/disable component lists)
//! - [`reorder`]: Bounded pts reorder buffer
//! - [`io`]: Byte source and sink abstractions
//! - [`state`]: Pipeline state machine
//! - [`stats`]: Per-stream statistics collection
//! - [`telemetry`]: Structured event emission
//! - [`error`]: Error types, kinds and severities
//! - [`helpers`]: Parameter parsing and queue draining utilities
//!
//! ## Quick Start
//!
//! ```ignore
//! use transkit_core::node::{FilterNode, FilterOutput};
//! use transkit_core::registry::{CodecCapability, ComponentKind, FormatRegistry};
//!
//! struct Invert;
//!
//! impl FilterNode for Invert {
//!     fn input_ports(&self) -> Vec<InputPort> { /* ... */ }
//!     fn output_ports(&self) -> Vec<OutputPort> { /* ... */ }
//!     fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> { /* ... */ }
//!     fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> { /* ... */ }
//! }
//!
//! let mut registry = FormatRegistry::new();
//! registry.register_filter(CodecCapability::new("invert", ComponentKind::Filter), |_| {
//!     Ok(Box::new(Invert) as Box<dyn FilterNode>)
//! });
//! ```

pub mod caps;
pub mod codec;
pub mod container;
pub mod error;
pub mod helpers;
pub mod io;
pub mod node;
pub mod pins;
pub mod profile;
pub mod rational;
pub mod registry;
pub mod reorder;
pub mod state;
pub mod stats;
pub mod telemetry;
pub mod types;

// Error handling
pub use error::{ErrorKind, Result, Severity, Stage, TranscodeError};

// Data model
pub use rational::Rational;
pub use types::{
    AudioFormat, AudioSamples, Frame, FrameData, FrameFormat, MediaKind, Packet, PixelFormat,
    SampleFormat, StreamDescriptor, VideoFormat,
};

// Component traits
pub use codec::{Decoder, DecoderFactory, Encoder, EncoderFactory};
pub use container::{ContainerWriter, Demuxer, SeekTarget};
pub use node::{FilterNode, FilterOutput};

// Registry and profiles
pub use caps::{FormatCaps, Negotiation};
pub use pins::{InputPort, OutputPort};
pub use profile::BuildProfile;
pub use registry::{CodecCapability, ComponentFactory, ComponentKind, FormatRegistry};

// State, statistics and telemetry
pub use state::{PipelineState, PipelineStateUpdate};
pub use stats::{StageStats, StreamStats, StreamStatsTracker, StreamStatsUpdate};
pub use telemetry::{TelemetryEmitter, TelemetryEvent};

pub use helpers::{config_helpers, queue_helpers};
pub use reorder::ReorderBuffer;
