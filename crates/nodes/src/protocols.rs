// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Byte-level protocols.
//!
//! Only local files are built in. The protocol is registered as a descriptor so
//! build profiles can disable it like any other component.

use std::fs::File;
use std::path::Path;
use transkit_core::io::{ByteSink, ByteSource};
use transkit_core::{CodecCapability, ComponentKind, FormatRegistry, Result, TranscodeError};

pub const FILE_PROTOCOL: &str = "file";

pub fn register_protocols(registry: &mut FormatRegistry) {
    registry.register_descriptor(
        CodecCapability::new(FILE_PROTOCOL, ComponentKind::Protocol)
            .with_description("Local file system paths."),
    );
}

/// Opens a local file as a container source.
///
/// # Errors
///
/// `UnsupportedFormat` if the `file` protocol is disabled, `Io` if the file
/// cannot be opened.
pub fn open_file(registry: &FormatRegistry, path: impl AsRef<Path>) -> Result<Box<dyn ByteSource>> {
    registry.require(ComponentKind::Protocol, FILE_PROTOCOL)?;
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to open input file");
        TranscodeError::Io(e)
    })?;
    tracing::debug!(path = %path.display(), "Opened input file");
    Ok(Box::new(file))
}

/// Creates (or truncates) a local file as a container sink.
///
/// # Errors
///
/// `UnsupportedFormat` if the `file` protocol is disabled, `Io` if the file
/// cannot be created.
pub fn create_file(registry: &FormatRegistry, path: impl AsRef<Path>) -> Result<Box<dyn ByteSink>> {
    registry.require(ComponentKind::Protocol, FILE_PROTOCOL)?;
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to create output file");
        TranscodeError::Io(e)
    })?;
    tracing::debug!(path = %path.display(), "Created output file");
    Ok(Box::new(file))
}
