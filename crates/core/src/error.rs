// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for TransKit.
//!
//! Every error a stage can raise is a [`TranscodeError`]. Besides the message, each
//! variant maps to a stable [`ErrorKind`] (used in telemetry and in the final
//! pipeline status) and to a [`Severity`] that tells the orchestrator how far the
//! failure propagates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for TransKit operations.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// A container, codec or filter identifier is unknown or disabled in the active
    /// build profile.
    ///
    /// Examples:
    /// - Requesting the `h264` decoder when the profile only enables `pcm_s16le`
    /// - Opening a container whose demuxer was disabled with `--disable-demuxers`
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Malformed input container.
    ///
    /// Examples:
    /// - Bad magic bytes or truncated stream table
    /// - Packet record pointing at a stream that does not exist
    #[error("Format error: {0}")]
    Format(String),

    /// Failure while writing the output container.
    ///
    /// Examples:
    /// - Packet decoding timestamp going backwards within a stream
    /// - Sink write failure while flushing the trailer
    #[error("Mux error: {0}")]
    Mux(String),

    /// A single packet could not be decoded. The packet is skipped.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A single frame could not be encoded. The frame is skipped.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Header-level corruption. The affected stream cannot continue.
    ///
    /// Examples:
    /// - Packet header magic mismatch
    /// - Frame dimensions that disagree with the stream parameters
    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    /// Structural filter graph error, detected at validation time.
    ///
    /// Examples:
    /// - Circular dependency between filter nodes
    /// - Input port left unconnected or connected twice
    #[error("Graph error: {0}")]
    Graph(String),

    /// No format is acceptable on both sides of a filter graph edge and no
    /// implicit conversion can bridge them.
    #[error("Format negotiation error: {0}")]
    FormatNegotiation(String),

    /// A reorder buffer exceeded its maximum depth. The oldest entry was dropped.
    #[error("Reorder overflow: {0}")]
    ReorderOverflow(String),

    /// Seeking failed (non-seekable source, no key frame available).
    #[error("Seek error: {0}")]
    Seek(String),

    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Invalid component parameters (zero sample rate, unknown pixel format)
    /// - Malformed build profile flag
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error from the underlying byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was interrupted by a cancellation request.
    #[error("Cancelled")]
    Cancelled,
}

/// Convenience type alias for Results using `TranscodeError`.
pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Stable, serializable classification of a [`TranscodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    FormatError,
    MuxError,
    DecodeError,
    EncodeError,
    CorruptHeader,
    GraphError,
    FormatNegotiationError,
    ReorderOverflow,
    SeekError,
    Configuration,
    Io,
    Cancelled,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::FormatError => "format_error",
            Self::MuxError => "mux_error",
            Self::DecodeError => "decode_error",
            Self::EncodeError => "encode_error",
            Self::CorruptHeader => "corrupt_header",
            Self::GraphError => "graph_error",
            Self::FormatNegotiationError => "format_negotiation_error",
            Self::ReorderOverflow => "reorder_overflow",
            Self::SeekError => "seek_error",
            Self::Configuration => "configuration",
            Self::Io => "io",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Absorbed at the stage boundary: the packet or frame is skipped and counted.
    Recoverable,
    /// Ends the affected stream; other streams keep running.
    StreamFatal,
    /// Ends the whole pipeline.
    PipelineFatal,
}

/// Pipeline stage that raised an error or emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registry,
    Demux,
    Decode,
    Filter,
    Encode,
    Mux,
    Orchestrator,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Demux => "demux",
            Self::Decode => "decode",
            Self::Filter => "filter",
            Self::Encode => "encode",
            Self::Mux => "mux",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TranscodeError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Format(_) => ErrorKind::FormatError,
            Self::Mux(_) => ErrorKind::MuxError,
            Self::Decode(_) => ErrorKind::DecodeError,
            Self::Encode(_) => ErrorKind::EncodeError,
            Self::CorruptHeader(_) => ErrorKind::CorruptHeader,
            Self::Graph(_) => ErrorKind::GraphError,
            Self::FormatNegotiation(_) => ErrorKind::FormatNegotiationError,
            Self::ReorderOverflow(_) => ErrorKind::ReorderOverflow,
            Self::Seek(_) => ErrorKind::SeekError,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub const fn severity(&self) -> Severity {
        match self {
            Self::Decode(_) | Self::Encode(_) | Self::ReorderOverflow(_) | Self::Seek(_) => {
                Severity::Recoverable
            },
            Self::CorruptHeader(_) => Severity::StreamFatal,
            Self::UnsupportedFormat(_)
            | Self::Format(_)
            | Self::Mux(_)
            | Self::Graph(_)
            | Self::FormatNegotiation(_)
            | Self::Configuration(_)
            | Self::Io(_)
            | Self::Cancelled => Severity::PipelineFatal,
        }
    }

    pub const fn is_recoverable(&self) -> bool {
        matches!(self.severity(), Severity::Recoverable)
    }

    /// Re-labels an I/O failure as a container error for the given stage, leaving
    /// other variants untouched.
    #[must_use]
    pub fn in_container(self, stage: Stage) -> Self {
        match (self, stage) {
            (Self::Io(e), Stage::Mux) => Self::Mux(e.to_string()),
            (Self::Io(e), Stage::Demux) => Self::Format(e.to_string()),
            (other, _) => other,
        }
    }
}

impl From<TranscodeError> for String {
    fn from(err: TranscodeError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TranscodeError::UnsupportedFormat("decoder 'h264' is disabled".to_string());
        assert_eq!(err.to_string(), "Unsupported format: decoder 'h264' is disabled");

        let err = TranscodeError::CorruptHeader("bad magic".to_string());
        assert_eq!(err.to_string(), "Corrupt header: bad magic");
    }

    #[test]
    fn test_severity_table() {
        assert_eq!(TranscodeError::Decode(String::new()).severity(), Severity::Recoverable);
        assert_eq!(TranscodeError::ReorderOverflow(String::new()).severity(), Severity::Recoverable);
        assert_eq!(TranscodeError::Seek(String::new()).severity(), Severity::Recoverable);
        assert_eq!(TranscodeError::CorruptHeader(String::new()).severity(), Severity::StreamFatal);
        assert_eq!(
            TranscodeError::UnsupportedFormat(String::new()).severity(),
            Severity::PipelineFatal
        );
        assert_eq!(TranscodeError::Graph(String::new()).severity(), Severity::PipelineFatal);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::FormatNegotiationError).unwrap_or_default();
        assert_eq!(json, "\"format_negotiation_error\"");
        assert_eq!(ErrorKind::CorruptHeader.to_string(), "corrupt_header");
    }

    #[test]
    fn test_io_error_relabeling() {
        let io_err = std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full");
        let err = TranscodeError::from(io_err).in_container(Stage::Mux);
        assert_eq!(err.kind(), ErrorKind::MuxError);
        assert!(err.to_string().contains("disk full"));

        let err = TranscodeError::Decode("x".into()).in_container(Stage::Mux);
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }
}
