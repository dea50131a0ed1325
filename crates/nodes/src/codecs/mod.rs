// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in codecs.
//!
//! - `pcm_s16le` / `pcm_f32le`: interleaved little-endian PCM
//! - `rawvideo`: packed pictures, one per packet
//! - `rlev`: run-length coded pictures with optional B-frame reordering

use transkit_core::types::{StreamDescriptor, VideoFormat};
use transkit_core::{FormatRegistry, PixelFormat, Result, TranscodeError};

#[cfg(feature = "pcm")]
pub mod pcm;
#[cfg(feature = "rawvideo")]
pub mod rawvideo;
#[cfg(feature = "rlev")]
pub mod rlev;

/// Registers all available decoders and encoders with the registry.
pub fn register_codecs(registry: &mut FormatRegistry) {
    #[cfg(feature = "pcm")]
    pcm::register_pcm_codecs(registry);
    #[cfg(feature = "rawvideo")]
    rawvideo::register_rawvideo_codecs(registry);
    #[cfg(feature = "rlev")]
    rlev::register_rlev_codecs(registry);

    let _ = registry;
}

/// Reads a positive integer stream parameter. Missing or zero values mean the
/// stream header is unusable.
pub(crate) fn header_param(stream: &StreamDescriptor, key: &str) -> Result<u32> {
    stream
        .param_u64(key)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            TranscodeError::CorruptHeader(format!(
                "Stream {} ({}) has no valid '{key}' parameter",
                stream.index, stream.codec
            ))
        })
}

/// Picture format of a video stream from its `width`, `height` and `pix_fmt` parameters.
pub(crate) fn video_format(stream: &StreamDescriptor) -> Result<VideoFormat> {
    let pixel_format: PixelFormat = stream
        .param_str("pix_fmt")
        .ok_or_else(|| {
            TranscodeError::CorruptHeader(format!("Stream {} has no 'pix_fmt' parameter", stream.index))
        })?
        .parse()
        .map_err(|e: TranscodeError| TranscodeError::CorruptHeader(e.to_string()))?;
    Ok(VideoFormat {
        pixel_format,
        width: header_param(stream, "width")?,
        height: header_param(stream, "height")?,
    })
}

/// Writes the picture parameters of a video stream.
pub(crate) fn with_video_params(stream: StreamDescriptor, format: &VideoFormat) -> StreamDescriptor {
    stream
        .with_param("width", format.width)
        .with_param("height", format.height)
        .with_param("pix_fmt", format.pixel_format.as_str())
}
