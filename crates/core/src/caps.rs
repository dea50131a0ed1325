// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Format capabilities and edge negotiation.
//!
//! A [`FormatCaps`] is a format pattern: every field is either fixed or a wildcard
//! (`None` for enums, `0` for numeric fields). Ports declare the patterns they accept
//! and the registry records the patterns each codec supports.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{
    AudioFormat, FrameFormat, MediaKind, PixelFormat, SampleFormat, VideoFormat,
};

/// A format pattern. Wildcard fields match any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FormatCaps {
    /// Matches anything, audio or video.
    Any,
    Video {
        #[serde(default)]
        pixel_format: Option<PixelFormat>,
        /// 0 = any width
        #[serde(default)]
        width: u32,
        /// 0 = any height
        #[serde(default)]
        height: u32,
    },
    Audio {
        #[serde(default)]
        sample_format: Option<SampleFormat>,
        /// 0 = any rate
        #[serde(default)]
        sample_rate: u32,
        /// 0 = any channel count
        #[serde(default)]
        channels: u16,
    },
}

/// Outcome of checking one concrete format against a port's accepted patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The format is accepted as is.
    Direct,
    /// The format must be converted into this one first.
    Convert(FrameFormat),
    /// No pattern shares the media kind; no conversion can help.
    Incompatible,
}

impl FormatCaps {
    pub const fn any_video() -> Self {
        Self::Video { pixel_format: None, width: 0, height: 0 }
    }

    pub const fn any_audio() -> Self {
        Self::Audio { sample_format: None, sample_rate: 0, channels: 0 }
    }

    pub const fn pixel(pixel_format: PixelFormat) -> Self {
        Self::Video { pixel_format: Some(pixel_format), width: 0, height: 0 }
    }

    pub const fn samples(sample_format: SampleFormat) -> Self {
        Self::Audio { sample_format: Some(sample_format), sample_rate: 0, channels: 0 }
    }

    /// Exact pattern for a concrete format.
    pub const fn exact(format: &FrameFormat) -> Self {
        match format {
            FrameFormat::Video(v) => Self::Video {
                pixel_format: Some(v.pixel_format),
                width: v.width,
                height: v.height,
            },
            FrameFormat::Audio(a) => Self::Audio {
                sample_format: Some(a.sample_format),
                sample_rate: a.sample_rate,
                channels: a.channels,
            },
        }
    }

    pub const fn media(&self) -> Option<MediaKind> {
        match self {
            Self::Any => None,
            Self::Video { .. } => Some(MediaKind::Video),
            Self::Audio { .. } => Some(MediaKind::Audio),
        }
    }

    /// Whether the concrete format satisfies this pattern.
    pub fn matches(&self, format: &FrameFormat) -> bool {
        match (self, format) {
            (Self::Any, _) => true,
            (Self::Video { pixel_format, width, height }, FrameFormat::Video(v)) => {
                pixel_format.is_none_or(|p| p == v.pixel_format)
                    && field_matches(*width, v.width)
                    && field_matches(*height, v.height)
            },
            (Self::Audio { sample_format, sample_rate, channels }, FrameFormat::Audio(a)) => {
                sample_format.is_none_or(|s| s == a.sample_format)
                    && field_matches(*sample_rate, a.sample_rate)
                    && field_matches(u32::from(*channels), u32::from(a.channels))
            },
            _ => false,
        }
    }

    /// Whether some concrete format satisfies both patterns.
    pub fn intersects(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (
                Self::Video { pixel_format: pa, width: wa, height: ha },
                Self::Video { pixel_format: pb, width: wb, height: hb },
            ) => {
                option_overlaps(*pa, *pb) && wildcard_overlaps(*wa, *wb) && wildcard_overlaps(*ha, *hb)
            },
            (
                Self::Audio { sample_format: sa, sample_rate: ra, channels: ca },
                Self::Audio { sample_format: sb, sample_rate: rb, channels: cb },
            ) => {
                option_overlaps(*sa, *sb)
                    && wildcard_overlaps(*ra, *rb)
                    && wildcard_overlaps(u32::from(*ca), u32::from(*cb))
            },
            _ => false,
        }
    }

    /// Instantiates this pattern, filling every wildcard from `source`.
    ///
    /// Returns `None` when the media kinds differ.
    pub fn fill_from(&self, source: &FrameFormat) -> Option<FrameFormat> {
        match (self, source) {
            (Self::Any, _) => Some(*source),
            (Self::Video { pixel_format, width, height }, FrameFormat::Video(v)) => {
                Some(FrameFormat::Video(VideoFormat {
                    pixel_format: pixel_format.unwrap_or(v.pixel_format),
                    width: pick(*width, v.width),
                    height: pick(*height, v.height),
                }))
            },
            (Self::Audio { sample_format, sample_rate, channels }, FrameFormat::Audio(a)) => {
                Some(FrameFormat::Audio(AudioFormat {
                    sample_format: sample_format.unwrap_or(a.sample_format),
                    sample_rate: pick(*sample_rate, a.sample_rate),
                    channels: if *channels == 0 { a.channels } else { *channels },
                }))
            },
            _ => None,
        }
    }
}

const fn field_matches(pattern: u32, value: u32) -> bool {
    pattern == 0 || pattern == value
}

const fn wildcard_overlaps(a: u32, b: u32) -> bool {
    a == 0 || b == 0 || a == b
}

fn option_overlaps<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

const fn pick(pattern: u32, value: u32) -> u32 {
    if pattern == 0 {
        value
    } else {
        pattern
    }
}

/// Checks a produced format against the patterns a consumer accepts.
///
/// Rules:
/// - any matching pattern makes the edge direct
/// - otherwise the first pattern of the same media kind is instantiated from the
///   produced format and becomes the conversion target
/// - an empty accept list accepts everything
pub fn negotiate(produced: &FrameFormat, accepted: &[FormatCaps]) -> Negotiation {
    if accepted.is_empty() || accepted.iter().any(|caps| caps.matches(produced)) {
        return Negotiation::Direct;
    }
    accepted
        .iter()
        .filter(|caps| caps.media() == Some(produced.media()))
        .find_map(|caps| caps.fill_from(produced))
        .map_or(Negotiation::Incompatible, Negotiation::Convert)
}

/// Convenience helper to test one pattern against several.
pub fn intersects_any(caps: &FormatCaps, others: &[FormatCaps]) -> bool {
    others.is_empty() || others.iter().any(|other| caps.intersects(other))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb(width: u32, height: u32) -> FrameFormat {
        FrameFormat::Video(VideoFormat { pixel_format: PixelFormat::Rgb24, width, height })
    }

    fn s16(rate: u32, channels: u16) -> FrameFormat {
        FrameFormat::Audio(AudioFormat {
            sample_format: SampleFormat::S16,
            sample_rate: rate,
            channels,
        })
    }

    #[test]
    fn test_wildcards_match() {
        assert!(FormatCaps::any_video().matches(&rgb(640, 480)));
        assert!(FormatCaps::pixel(PixelFormat::Rgb24).matches(&rgb(2, 2)));
        assert!(!FormatCaps::pixel(PixelFormat::Gray8).matches(&rgb(2, 2)));
        assert!(!FormatCaps::any_audio().matches(&rgb(2, 2)));
        assert!(FormatCaps::Any.matches(&s16(8000, 1)));
    }

    #[test]
    fn test_negotiate_direct_and_convert() {
        let accepted = [FormatCaps::samples(SampleFormat::F32)];
        assert_eq!(
            negotiate(&s16(48000, 2), &accepted),
            Negotiation::Convert(FrameFormat::Audio(AudioFormat {
                sample_format: SampleFormat::F32,
                sample_rate: 48000,
                channels: 2,
            }))
        );
        assert_eq!(negotiate(&s16(48000, 2), &[FormatCaps::any_audio()]), Negotiation::Direct);
        assert_eq!(negotiate(&s16(48000, 2), &[]), Negotiation::Direct);
    }

    #[test]
    fn test_negotiate_incompatible_media() {
        assert_eq!(
            negotiate(&s16(48000, 2), &[FormatCaps::pixel(PixelFormat::Rgba)]),
            Negotiation::Incompatible
        );
    }

    #[test]
    fn test_intersects() {
        let a = FormatCaps::Audio { sample_format: None, sample_rate: 48000, channels: 0 };
        let b = FormatCaps::Audio {
            sample_format: Some(SampleFormat::S16),
            sample_rate: 0,
            channels: 2,
        };
        assert!(a.intersects(&b));
        let c = FormatCaps::Audio { sample_format: None, sample_rate: 44100, channels: 0 };
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&FormatCaps::any_video()));
        assert!(intersects_any(&a, &[c, b]));
    }
}
