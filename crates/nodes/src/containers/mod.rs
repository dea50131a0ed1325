// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! This module contains all built-in container formats (demuxers and writers).

use opentelemetry::{global, metrics::Counter};
use std::io;
use transkit_core::io::ByteSource;
use transkit_core::{FormatRegistry, Result, Stage, TranscodeError};

#[cfg(feature = "tkc")]
pub mod tkc;
#[cfg(feature = "wav")]
pub mod wav;

/// Registers all available containers with the registry.
pub fn register_containers(registry: &mut FormatRegistry) {
    #[cfg(feature = "tkc")]
    {
        registry.register_demuxer(
            "tkc",
            |source| Ok(Box::new(tkc::TkcDemuxer::open(source)?) as Box<dyn transkit_core::Demuxer>),
            Some(tkc::probe),
            "TransKit native container with key-frame index.",
        );
        registry.register_muxer(
            "tkc",
            |sink| Ok(Box::new(tkc::TkcWriter::new(sink)) as Box<dyn transkit_core::ContainerWriter>),
            "TransKit native container with key-frame index.",
        );
    }

    #[cfg(feature = "wav")]
    {
        registry.register_demuxer(
            "wav",
            |source| Ok(Box::new(wav::WavDemuxer::open(source)?) as Box<dyn transkit_core::Demuxer>),
            Some(wav::probe),
            "RIFF/WAVE PCM audio (16-bit integer or 32-bit float).",
        );
        registry.register_muxer(
            "wav",
            |sink| Ok(Box::new(wav::WavWriter::new(sink)) as Box<dyn transkit_core::ContainerWriter>),
            "RIFF/WAVE PCM audio (16-bit integer or 32-bit float).",
        );
    }

    // Silences the unused warning when every container feature is off.
    let _ = registry;
}

/// Fills `buf` completely.
///
/// Returns `Ok(false)` when the input ends before the first byte; ending
/// anywhere else is a `Format` error.
pub(crate) fn read_full(source: &mut dyn ByteSource, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(TranscodeError::Format(
                    "Unexpected end of input inside a record".to_string(),
                ))
            },
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(TranscodeError::from(e).in_container(Stage::Demux)),
        }
    }
    Ok(true)
}

/// Counter shared by every container writer, labelled with the container id.
pub(crate) fn bytes_written_counter() -> Counter<u64> {
    global::meter("transkit_nodes")
        .u64_counter("container.bytes_written")
        .with_description("Bytes written by container writers")
        .build()
}
