// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! api: Job and filter graph descriptions for TransKit.
//!
//! A [`TranscodeJob`] says which container to read, which container to write,
//! and how every output stream is produced from an input stream (stream copy or
//! decode, filter, encode). Jobs are plain serde types so they can be written
//! as YAML or JSON.

use serde::{Deserialize, Serialize};
use transkit_core::rational::Rational;
use transkit_core::{Result, TranscodeError};

pub mod graph;
pub mod yaml;

pub use graph::{FilterGraphSpec, FilterNodeSpec, Link};
pub use yaml::UserGraph;

/// Codec identifier requesting stream copy: packets bypass decode, filter and encode.
pub const STREAM_COPY: &str = "copy";

/// Filters attached to an output stream, in either explicit or YAML form.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum FilterSpec {
    Graph(FilterGraphSpec),
    User(UserGraph),
}

impl FilterSpec {
    /// Resolves the filters into the explicit graph form.
    ///
    /// # Errors
    ///
    /// `Graph` if the YAML form cannot be compiled.
    pub fn into_graph(self) -> Result<FilterGraphSpec> {
        match self {
            Self::Graph(graph) => Ok(graph),
            Self::User(user) => yaml::compile(user).map_err(TranscodeError::Graph),
        }
    }
}

/// How one output stream is produced.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OutputStreamSpec {
    /// Index of the input stream feeding this output.
    pub input_stream: usize,
    /// Encoder identifier, or `copy`.
    pub codec: String,
    /// Encoder parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Filter graph between decoder and encoder. Absent means passthrough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSpec>,
    /// Output time base. Defaults to the time base of the filtered frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_base: Option<Rational>,
}

impl OutputStreamSpec {
    pub fn copy(input_stream: usize) -> Self {
        Self {
            input_stream,
            codec: STREAM_COPY.to_string(),
            params: None,
            filters: None,
            time_base: None,
        }
    }

    pub fn encode(input_stream: usize, codec: &str) -> Self {
        Self { codec: codec.to_string(), ..Self::copy(input_stream) }
    }

    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: FilterSpec) -> Self {
        self.filters = Some(filters);
        self
    }

    #[must_use]
    pub const fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = Some(time_base);
        self
    }

    pub fn is_copy(&self) -> bool {
        self.codec == STREAM_COPY
    }
}

/// A complete transcoding request.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TranscodeJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Demuxer identifier. Absent means probe the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,
    /// Muxer identifier.
    pub output_format: String,
    /// Output streams, in output index order. Empty means copy every input stream.
    #[serde(default)]
    pub streams: Vec<OutputStreamSpec>,
    /// Seek target in seconds applied before the first packet is read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
}

impl TranscodeJob {
    pub fn new(output_format: &str) -> Self {
        Self {
            name: None,
            input_format: None,
            output_format: output_format.to_string(),
            streams: Vec::new(),
            start_time: None,
        }
    }

    #[must_use]
    pub fn with_input_format(mut self, format: &str) -> Self {
        self.input_format = Some(format.to_string());
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: OutputStreamSpec) -> Self {
        self.streams.push(stream);
        self
    }

    #[must_use]
    pub const fn with_start_time(mut self, seconds: f64) -> Self {
        self.start_time = Some(seconds);
        self
    }

    /// Parses a job from YAML.
    ///
    /// # Errors
    ///
    /// `Configuration` if the document is not a valid job.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_saphyr::from_str(yaml)
            .map_err(|e| TranscodeError::Configuration(format!("Invalid job: {e}")))
    }

    /// The seek target in microseconds, if any.
    #[allow(clippy::cast_possible_truncation)]
    pub fn start_time_us(&self) -> Option<i64> {
        self.start_time.map(|s| (s * 1_000_000.0).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_job_from_yaml() {
        let yaml = r"
name: shrink
input_format: tkc
output_format: tkc
start_time: 0.5
streams:
  - input_stream: 0
    codec: rlev
    params: { b_frames: 2 }
    filters:
      steps:
        - kind: scale
          params: { width: 2, height: 2 }
    time_base: { num: 1, den: 90000 }
  - input_stream: 1
    codec: copy
";
        let job = TranscodeJob::from_yaml(yaml).unwrap();
        assert_eq!(job.streams.len(), 2);
        assert_eq!(job.start_time_us(), Some(500_000));
        assert!(job.streams[1].is_copy());
        assert_eq!(job.streams[0].time_base, Some(Rational::new(1, 90000)));

        let graph = job.streams[0].filters.clone().unwrap().into_graph().unwrap();
        assert_eq!(graph.nodes["step_0"].kind, "scale");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_explicit_graph_is_preferred_when_links_present() {
        let yaml = r"
nodes:
  in: { kind: buffer }
  out: { kind: buffersink }
links:
  - { from: in, to: out }
";
        let filters: FilterSpec = serde_saphyr::from_str(yaml).unwrap();
        assert!(matches!(filters, FilterSpec::Graph(_)));
    }

    #[test]
    fn test_invalid_job_is_configuration_error() {
        let err = TranscodeJob::from_yaml("streams: 3").err().map(|e| e.kind());
        assert_eq!(err, Some(transkit_core::ErrorKind::Configuration));
    }
}
