// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Build profiles: the enable/disable list that decides which registered
//! components are reachable at runtime.
//!
//! Profiles are written in configure-flag syntax so existing build recipes can be
//! reused as data:
//!
//! ```text
//! --disable-everything            disable every component kind
//! --disable-decoders              disable one kind (decoders, encoders, demuxers, ...)
//! --enable-decoders               re-enable one kind
//! --enable-decoder=h264,aac       enable identifiers of one kind
//! --disable-filter=scale          disable identifiers of one kind
//! ```
//!
//! Flags apply in order. Flags unrelated to components (`--enable-pic`,
//! `--disable-static`, ...) are packaging concerns and are ignored.

use crate::error::{Result, TranscodeError};
use crate::registry::ComponentKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One parsed profile rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRule {
    DisableEverything,
    SetKind { kind: ComponentKind, enabled: bool },
    SetIds { kind: ComponentKind, ids: Vec<String>, enabled: bool },
}

/// An ordered enable/disable list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildProfile {
    #[serde(default)]
    pub flags: Vec<String>,
}

impl BuildProfile {
    /// Profile that leaves every registered component enabled.
    pub const fn all() -> Self {
        Self { flags: Vec::new() }
    }

    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { flags: flags.into_iter().map(Into::into).collect() }
    }

    /// The component list of the reference FFmpeg 4.4 recipe: everything disabled,
    /// then a fixed set of decoders, encoders, containers, parsers and filters.
    pub fn reference() -> Self {
        Self::from_flags(REFERENCE_FLAGS.iter().copied())
    }

    /// Parses every flag into rules, skipping flags that do not address components.
    ///
    /// # Errors
    ///
    /// `Configuration` for a component flag with an unknown kind or an empty list.
    pub fn rules(&self) -> Result<Vec<ProfileRule>> {
        let mut rules = Vec::with_capacity(self.flags.len());
        for flag in &self.flags {
            match parse_flag(flag)? {
                Some(rule) => rules.push(rule),
                None => tracing::debug!(flag = %flag, "Ignoring non-component build flag"),
            }
        }
        Ok(rules)
    }
}

fn parse_flag(flag: &str) -> Result<Option<ProfileRule>> {
    let flag = flag.trim();
    if flag == "--disable-everything" {
        return Ok(Some(ProfileRule::DisableEverything));
    }

    let (enabled, rest) = if let Some(rest) = flag.strip_prefix("--enable-") {
        (true, rest)
    } else if let Some(rest) = flag.strip_prefix("--disable-") {
        (false, rest)
    } else {
        return Ok(None);
    };

    if let Some((kind_name, ids)) = rest.split_once('=') {
        let Some(kind) = ComponentKind::from_flag_name(kind_name) else {
            return Err(TranscodeError::Configuration(format!(
                "Unknown component kind '{kind_name}' in build flag '{flag}'"
            )));
        };
        let ids: Vec<String> = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(TranscodeError::Configuration(format!(
                "Build flag '{flag}' names no component"
            )));
        }
        return Ok(Some(ProfileRule::SetIds { kind, ids, enabled }));
    }

    Ok(rest
        .strip_suffix('s')
        .and_then(ComponentKind::from_flag_name)
        .map(|kind| ProfileRule::SetKind { kind, enabled }))
}

const REFERENCE_FLAGS: &[&str] = &[
    "--disable-demuxers",
    "--disable-muxers",
    "--disable-bsfs",
    "--disable-parsers",
    "--disable-decoders",
    "--disable-encoders",
    "--disable-filters",
    "--disable-protocols",
    "--enable-decoder=mpegvideo",
    "--enable-decoder=mpeg2video",
    "--enable-decoder=mpeg4",
    "--enable-encoder=mpeg4",
    "--enable-decoder=h264",
    "--enable-encoder=ac3",
    "--enable-decoder=h263",
    "--enable-decoder=wmv1",
    "--enable-decoder=wmv2",
    "--enable-decoder=wmv3",
    "--enable-decoder=libvpx_vp8",
    "--enable-encoder=libvpx_vp8",
    "--enable-decoder=libvpx_vp9",
    "--enable-encoder=aac",
    "--enable-decoder=aac",
    "--enable-decoder=vp8",
    "--enable-decoder=hevc",
    "--enable-decoder=wmav1",
    "--enable-decoder=wmav2",
    "--enable-decoder=wmavoice",
    "--enable-demuxer=matroska",
    "--enable-demuxer=webm_dash_manifest",
    "--enable-demuxer=mpegps",
    "--enable-demuxer=mpegts",
    "--enable-demuxer=mpegtsraw",
    "--enable-demuxer=mpegvideo",
    "--enable-demuxer=h264",
    "--enable-muxer=h264",
    "--enable-muxer=mp4",
    "--enable-demuxer=asf",
    "--enable-demuxer=h263",
    "--enable-demuxer=mov",
    "--enable-demuxer=avi",
    "--enable-parser=mpeg4video",
    "--enable-parser=mpegvideo",
    "--enable-parser=h263",
    "--enable-parser=h264",
    "--enable-parser=hevc",
    "--enable-parser=vp8",
    "--enable-parser=vp9",
    "--enable-filter=scale",
    "--enable-filter=fps",
    "--enable-filter=format",
    "--enable-filter=setsar",
    "--enable-filter=setdar",
    "--enable-filter=settb",
    "--enable-filter=setpts",
    "--enable-filter=asettb",
    "--enable-filter=aformat",
    "--enable-filter=aresample",
    "--enable-filter=anull",
    "--enable-filter=asetnsamples",
    "--enable-protocol=file",
    "--disable-devices",
    "--enable-pic",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_component_flags() {
        let profile = BuildProfile::from_flags([
            "--disable-everything",
            "--disable-decoders",
            "--enable-decoder=pcm_s16le, rlev",
            "--disable-filter=fps",
            "--enable-pic",
        ]);
        let rules = profile.rules().unwrap_or_default();
        assert_eq!(
            rules,
            vec![
                ProfileRule::DisableEverything,
                ProfileRule::SetKind { kind: ComponentKind::Decoder, enabled: false },
                ProfileRule::SetIds {
                    kind: ComponentKind::Decoder,
                    ids: vec!["pcm_s16le".to_string(), "rlev".to_string()],
                    enabled: true,
                },
                ProfileRule::SetIds {
                    kind: ComponentKind::Filter,
                    ids: vec!["fps".to_string()],
                    enabled: false,
                },
            ]
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let profile = BuildProfile::from_flags(["--enable-gizmo=x"]);
        assert!(profile.rules().is_err());
        let profile = BuildProfile::from_flags(["--enable-decoder="]);
        assert!(profile.rules().is_err());
    }

    #[test]
    fn test_reference_profile_parses() {
        let rules = BuildProfile::reference().rules().unwrap_or_default();
        assert!(rules.contains(&ProfileRule::SetKind {
            kind: ComponentKind::Protocol,
            enabled: false
        }));
        assert!(rules.contains(&ProfileRule::SetIds {
            kind: ComponentKind::Filter,
            ids: vec!["asetnsamples".to_string()],
            enabled: true,
        }));
        // --disable-devices addresses no registry kind
        assert_eq!(rules.len(), REFERENCE_FLAGS.len() - 2);
    }
}
