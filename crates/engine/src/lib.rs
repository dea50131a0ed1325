// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! engine: The transcoding pipeline engine for TransKit.
//!
//! This crate turns a [`TranscodeJob`] into a running pipeline: a demuxer thread,
//! one worker per output stream (decode, filter graph, encode, or stream copy)
//! and a single interleaving muxer thread, connected by bounded queues.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use transkit_core::io::{ByteSink, ByteSource};
use transkit_core::{FormatRegistry, Result};

// --- Public Modules ---

pub mod config;
pub mod constants;
pub mod decoder_pool;
pub mod encoder_pool;
pub mod filter_graph;
pub mod logging;
pub mod muxer;
pub mod pipeline;
pub mod worker;

// Re-exports
pub use config::{EngineConfig, PipelineConfig};
pub use pipeline::{Outcome, Pipeline, TranscodeReport};
pub use transkit_api::{OutputStreamSpec, TranscodeJob};
pub use worker::{StreamReport, StreamStatus};

#[cfg(test)]
mod tests;

/// Unified entry point: a finalized component registry plus engine settings.
pub struct Engine {
    registry: Arc<FormatRegistry>,
    config: EngineConfig,
}

impl Engine {
    /// Registers the built-in components and applies the configured build profile.
    ///
    /// # Errors
    ///
    /// `Configuration` if a registry flag is malformed.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut registry = FormatRegistry::new();
        transkit_nodes::register_components(&mut registry);
        let registry = registry.finalize(&config.registry.profile())?;
        tracing::info!(
            codecs = registry.enabled_codecs().len(),
            unavailable = registry.unavailable().len(),
            "Engine ready"
        );
        Ok(Self { registry, config })
    }

    pub const fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens a pipeline without running it, e.g. to subscribe to its state first.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::open`].
    pub fn open_pipeline(
        &self,
        job: &TranscodeJob,
        source: Box<dyn ByteSource>,
        sink: Box<dyn ByteSink>,
    ) -> Result<Pipeline> {
        Pipeline::open(&self.registry, &self.config.engine, job, source, sink)
    }

    /// Opens and runs a job. Open failures are folded into the report.
    pub async fn transcode(
        &self,
        job: &TranscodeJob,
        source: Box<dyn ByteSource>,
        sink: Box<dyn ByteSink>,
        cancel: CancellationToken,
    ) -> TranscodeReport {
        match self.open_pipeline(job, source, sink) {
            Ok(pipeline) => pipeline.run(cancel).await,
            Err(err) => {
                tracing::error!(error = %err, "Failed to open pipeline");
                TranscodeReport::open_failed(&err)
            },
        }
    }

    /// Runs a job between two local files.
    pub async fn transcode_files(
        &self,
        job: &TranscodeJob,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> TranscodeReport {
        let io = transkit_nodes::protocols::open_file(&self.registry, input).and_then(|source| {
            Ok((source, transkit_nodes::protocols::create_file(&self.registry, output)?))
        });
        match io {
            Ok((source, sink)) => self.transcode(job, source, sink, cancel).await,
            Err(err) => TranscodeReport::open_failed(&err),
        }
    }
}
