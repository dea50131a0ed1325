// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in filters.
//!
//! `buffer`, `buffersink` and `convert` are graph plumbing and are always
//! registered as internal components. The remaining filters are grouped in the
//! `video_filters` and `audio_filters` features.

use schemars::schema_for;
use transkit_core::{CodecCapability, ComponentKind, FilterNode, FormatRegistry, MediaKind};

pub mod convert;
pub mod endpoints;

#[cfg(any(feature = "video_filters", feature = "audio_filters"))]
pub mod format;
#[cfg(any(feature = "video_filters", feature = "audio_filters"))]
pub mod scale;
#[cfg(any(feature = "video_filters", feature = "audio_filters"))]
pub mod setpts;
#[cfg(any(feature = "video_filters", feature = "audio_filters"))]
pub mod settb;
#[cfg(any(feature = "video_filters", feature = "audio_filters"))]
pub mod split;

#[cfg(feature = "video_filters")]
pub mod fps;
#[cfg(feature = "video_filters")]
pub mod overlay;

#[cfg(feature = "audio_filters")]
pub mod amix;
#[cfg(feature = "audio_filters")]
pub mod asetnsamples;

pub const BUFFER: &str = "buffer";
pub const BUFFERSINK: &str = "buffersink";
pub const CONVERT: &str = "convert";

fn filter(id: &str, media: MediaKind, description: &str) -> CodecCapability {
    CodecCapability::new(id, ComponentKind::Filter).with_media(media).with_description(description)
}

fn boxed<N: FilterNode + 'static>(node: N) -> Box<dyn FilterNode> {
    Box::new(node)
}

/// Registers all available filters with the registry.
///
/// # Panics
///
/// Panics if a config schema cannot be serialized to JSON (should never happen).
#[allow(clippy::expect_used, clippy::too_many_lines)]
pub fn register_filters(registry: &mut FormatRegistry) {
    use convert::{ConvertConfig, ConvertNode};
    use endpoints::{BufferConfig, BufferSink, BufferSinkConfig, BufferSource};

    registry.register_filter(
        CodecCapability::new(BUFFER, ComponentKind::Filter)
            .internal()
            .with_param_schema(
                serde_json::to_value(schema_for!(BufferConfig))
                    .expect("BufferConfig schema should serialize to JSON"),
            )
            .with_description("Graph source fed with decoded frames."),
        |params| BufferSource::from_params(params).map(boxed),
    );
    registry.register_filter(
        CodecCapability::new(BUFFERSINK, ComponentKind::Filter)
            .internal()
            .with_param_schema(
                serde_json::to_value(schema_for!(BufferSinkConfig))
                    .expect("BufferSinkConfig schema should serialize to JSON"),
            )
            .with_description("Graph sink handing frames to the encoder."),
        |params| BufferSink::from_params(params).map(boxed),
    );
    registry.register_filter(
        CodecCapability::new(CONVERT, ComponentKind::Filter)
            .internal()
            .with_param_schema(
                serde_json::to_value(schema_for!(ConvertConfig))
                    .expect("ConvertConfig schema should serialize to JSON"),
            )
            .with_description(
                "Pixel format, size, sample format, channel layout and rate conversion. \
                 Inserted by format negotiation.",
            ),
        |params| ConvertNode::from_params(params).map(boxed),
    );

    #[cfg(feature = "video_filters")]
    register_video_filters(registry);
    #[cfg(feature = "audio_filters")]
    register_audio_filters(registry);
}

#[cfg(feature = "video_filters")]
#[allow(clippy::expect_used)]
fn register_video_filters(registry: &mut FormatRegistry) {
    use endpoints::Passthrough;

    registry.register_filter(filter("null", MediaKind::Video, "Passes video through."), |_| {
        Ok(boxed(Passthrough::new(MediaKind::Video)))
    });

    registry.register_filter(
        filter("format", MediaKind::Video, "Restricts the pixel formats of its input.")
            .with_param_schema(
                serde_json::to_value(schema_for!(format::FormatConfig))
                    .expect("FormatConfig schema should serialize to JSON"),
            ),
        |params| format::FormatNode::video(params).map(boxed),
    );

    registry.register_filter(
        filter("scale", MediaKind::Video, "Nearest-neighbour resize.").with_param_schema(
            serde_json::to_value(schema_for!(scale::ScaleConfig))
                .expect("ScaleConfig schema should serialize to JSON"),
        ),
        |params| scale::ScaleNode::from_params(params).map(boxed),
    );

    registry.register_filter(
        filter("fps", MediaKind::Video, "Constant frame rate by duplicating or dropping frames.")
            .with_param_schema(
                serde_json::to_value(schema_for!(fps::FpsConfig))
                    .expect("FpsConfig schema should serialize to JSON"),
            ),
        |params| fps::FpsNode::from_params(params).map(boxed),
    );

    registry.register_filter(
        filter("setpts", MediaKind::Video, "Rewrites video timestamps.").with_param_schema(
            serde_json::to_value(schema_for!(setpts::SetPtsConfig))
                .expect("SetPtsConfig schema should serialize to JSON"),
        ),
        |params| setpts::SetPtsNode::from_params(MediaKind::Video, params).map(boxed),
    );

    registry.register_filter(
        filter("settb", MediaKind::Video, "Changes the video time base.").with_param_schema(
            serde_json::to_value(schema_for!(settb::SetTbConfig))
                .expect("SetTbConfig schema should serialize to JSON"),
        ),
        |params| settb::SetTbNode::from_params(MediaKind::Video, params).map(boxed),
    );

    registry.register_filter(
        filter("split", MediaKind::Video, "Copies video to several outputs.").with_param_schema(
            serde_json::to_value(schema_for!(split::SplitConfig))
                .expect("SplitConfig schema should serialize to JSON"),
        ),
        |params| split::SplitNode::from_params(MediaKind::Video, params).map(boxed),
    );

    registry.register_filter(
        filter(
            "overlay",
            MediaKind::Video,
            "Draws the second input on top of the first at matching timestamps.",
        )
        .with_param_schema(
            serde_json::to_value(schema_for!(overlay::OverlayConfig))
                .expect("OverlayConfig schema should serialize to JSON"),
        ),
        |params| overlay::OverlayNode::from_params(params).map(boxed),
    );
}

#[cfg(feature = "audio_filters")]
#[allow(clippy::expect_used)]
fn register_audio_filters(registry: &mut FormatRegistry) {
    use endpoints::Passthrough;

    registry.register_filter(filter("anull", MediaKind::Audio, "Passes audio through."), |_| {
        Ok(boxed(Passthrough::new(MediaKind::Audio)))
    });

    registry.register_filter(
        filter("aformat", MediaKind::Audio, "Restricts sample formats, rates and channel counts.")
            .with_param_schema(
                serde_json::to_value(schema_for!(format::AudioFormatConfig))
                    .expect("AudioFormatConfig schema should serialize to JSON"),
            ),
        |params| format::FormatNode::audio(params).map(boxed),
    );

    registry.register_filter(
        filter("aresample", MediaKind::Audio, "Linear-interpolation sample rate conversion.")
            .with_param_schema(
                serde_json::to_value(schema_for!(scale::AresampleConfig))
                    .expect("AresampleConfig schema should serialize to JSON"),
            ),
        |params| scale::AresampleNode::from_params(params).map(boxed),
    );

    registry.register_filter(
        filter("asetpts", MediaKind::Audio, "Rewrites audio timestamps.").with_param_schema(
            serde_json::to_value(schema_for!(setpts::SetPtsConfig))
                .expect("SetPtsConfig schema should serialize to JSON"),
        ),
        |params| setpts::SetPtsNode::from_params(MediaKind::Audio, params).map(boxed),
    );

    registry.register_filter(
        filter("asettb", MediaKind::Audio, "Changes the audio time base.").with_param_schema(
            serde_json::to_value(schema_for!(settb::SetTbConfig))
                .expect("SetTbConfig schema should serialize to JSON"),
        ),
        |params| settb::SetTbNode::from_params(MediaKind::Audio, params).map(boxed),
    );

    registry.register_filter(
        filter("asetnsamples", MediaKind::Audio, "Re-chunks audio into fixed-size frames.")
            .with_param_schema(
                serde_json::to_value(schema_for!(asetnsamples::AsetnsamplesConfig))
                    .expect("AsetnsamplesConfig schema should serialize to JSON"),
            ),
        |params| asetnsamples::AsetnsamplesNode::from_params(params).map(boxed),
    );

    registry.register_filter(
        filter("asplit", MediaKind::Audio, "Copies audio to several outputs.").with_param_schema(
            serde_json::to_value(schema_for!(split::SplitConfig))
                .expect("SplitConfig schema should serialize to JSON"),
        ),
        |params| split::SplitNode::from_params(MediaKind::Audio, params).map(boxed),
    );

    registry.register_filter(
        filter("amix", MediaKind::Audio, "Sums float audio inputs at matching timestamps.")
            .with_param_schema(
                serde_json::to_value(schema_for!(amix::AmixConfig))
                    .expect("AmixConfig schema should serialize to JSON"),
            ),
        |params| amix::AmixNode::from_params(params).map(boxed),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use transkit_core::BuildProfile;

    #[test]
    fn test_registers_builtin_filters() {
        let mut registry = FormatRegistry::new();
        register_filters(&mut registry);
        for id in ["buffer", "buffersink", "convert", "scale", "fps", "amix", "asetnsamples"] {
            assert!(registry.contains(ComponentKind::Filter, id), "{id} missing");
        }
        assert!(registry.create_filter("fps", Some(&json!({ "fps": 25 }))).is_ok());
    }

    #[test]
    #[cfg(all(feature = "video_filters", feature = "audio_filters"))]
    fn test_param_less_filters_use_defaults() {
        let mut registry = FormatRegistry::new();
        register_filters(&mut registry);
        let split = registry.create_filter("split", None).unwrap();
        assert_eq!(split.output_ports().len(), 2);
        let asplit = registry.create_filter("asplit", None).unwrap();
        assert_eq!(asplit.output_ports().len(), 2);
        let amix = registry.create_filter("amix", None).unwrap();
        assert_eq!(amix.input_ports().len(), 2);
        let asetnsamples = registry.create_filter("asetnsamples", None).unwrap();
        assert_eq!(asetnsamples.input_ports().len(), 1);

        assert_eq!(split::SplitConfig::default().outputs, 2);
        assert!(amix::AmixConfig::default().normalize);
        let chunking = asetnsamples::AsetnsamplesConfig::default();
        assert_eq!((chunking.nb_out_samples, chunking.pad), (1024, true));
    }

    #[test]
    fn test_internal_filters_survive_disable_filters() {
        let mut registry = FormatRegistry::new();
        register_filters(&mut registry);
        let registry = registry.finalize(&BuildProfile::from_flags(["--disable-filters"])).unwrap();
        assert!(registry.create_filter("convert", Some(&json!({
            "format": { "video": { "pixel_format": "rgb24", "width": 2, "height": 2 } }
        })))
        .is_ok());
        assert!(registry.create_filter("scale", None).is_err());
    }
}
