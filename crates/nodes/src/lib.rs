// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in TransKit components.
//!
//! Each family exposes a `register_*` function; [`register_components`] calls
//! them all. Families are trimmed with cargo features, individual components at
//! runtime with a [`transkit_core::BuildProfile`].

use transkit_core::FormatRegistry;

pub mod codecs;
pub mod containers;
pub mod filters;
pub mod protocols;

/// Registers every built-in component compiled into this crate.
pub fn register_components(registry: &mut FormatRegistry) {
    protocols::register_protocols(registry);
    containers::register_containers(registry);
    codecs::register_codecs(registry);
    filters::register_filters(registry);

    tracing::info!("Finished registering built-in components.");
}

#[cfg(all(test, feature = "tkc", feature = "rlev"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use transkit_core::io::{memory_source, MemorySink};
    use transkit_core::{
        BuildProfile, ComponentKind, Frame, FrameFormat, PixelFormat, Rational, VideoFormat,
    };

    fn registry(flags: &[&str]) -> std::sync::Arc<FormatRegistry> {
        let mut registry = FormatRegistry::new();
        register_components(&mut registry);
        registry.finalize(&BuildProfile::from_flags(flags.iter().copied())).unwrap()
    }

    #[test]
    fn test_encode_mux_demux_decode() {
        let registry = registry(&[]);
        let format = VideoFormat { pixel_format: PixelFormat::Gray8, width: 4, height: 2 };
        let tb = Rational::new(1, 25);
        let params = json!({ "b_frames": 0 });

        let factory = registry.encoder("rlev").unwrap();
        let stream = factory
            .output_stream(&FrameFormat::Video(format), tb, Some(&params))
            .unwrap();
        let mut encoder = factory.create(&stream, &FrameFormat::Video(format), Some(&params)).unwrap();

        let sink = MemorySink::new();
        let mut writer = registry.create_writer("tkc", Box::new(sink.clone())).unwrap();
        writer.write_header(std::slice::from_ref(&stream)).unwrap();
        for pts in 0..3u8 {
            let frame = Frame::video(0, format, vec![pts; 8], i64::from(pts), tb).with_duration(1);
            for mut packet in encoder.encode(frame).unwrap() {
                packet.dts = packet.pts;
                writer.write_packet(&packet).unwrap();
            }
        }
        writer.write_trailer().unwrap();

        let bytes = sink.contents();
        assert_eq!(registry.probe(&bytes), Some("tkc"));
        let mut demuxer = registry.open_demuxer("tkc", Box::new(memory_source(bytes))).unwrap();
        let streams = demuxer.streams().to_vec();
        assert_eq!(streams[0].codec, "rlev");

        let mut decoder = registry.decoder("rlev").unwrap().create(&streams[0]).unwrap();
        let mut decoded = Vec::new();
        while let Some(packet) = demuxer.next_packet().unwrap() {
            decoded.extend(decoder.decode(packet).unwrap());
        }
        decoded.extend(decoder.flush().unwrap());
        let values: Vec<u8> = decoded.iter().map(|f| f.pixels().unwrap()[0]).collect();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn test_profile_hides_disabled_codecs() {
        let registry = registry(&["--disable-everything", "--enable-decoder=pcm_s16le"]);
        assert!(registry.decoder("pcm_s16le").is_ok());
        assert!(registry.decoder("rlev").is_err());
        assert!(registry.require(ComponentKind::Protocol, "file").is_err());
        // Graph plumbing is internal and ignores the profile.
        assert!(registry.contains(ComponentKind::Filter, "buffersink"));
        assert!(registry.create_filter("buffersink", None).is_ok());
    }
}
