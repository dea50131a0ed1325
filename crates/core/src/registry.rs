// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Format registry: container, codec and filter discovery.
//!
//! - [`FormatRegistry`]: every component the process knows about, keyed by kind and
//!   identifier, each entry a [`CodecCapability`] plus its factory
//! - [`ComponentFactory`]: tagged variant holding the concrete factory
//! - [`BuildProfile`](crate::profile::BuildProfile) decides which entries are enabled
//!
//! The registry is populated once at start-up, a profile is applied, and the
//! result is shared read-only (`Arc<FormatRegistry>`) by every pipeline.

use crate::caps::FormatCaps;
use crate::codec::{DecoderFactory, EncoderFactory};
use crate::container::{ContainerWriter, Demuxer, DemuxerFactory, MuxerFactory, ProbeFn};
use crate::error::{Result, TranscodeError};
use crate::io::{ByteSink, ByteSource};
use crate::node::{FilterFactory, FilterNode};
use crate::profile::{BuildProfile, ProfileRule};
use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Kinds of components addressed by build profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Demuxer,
    Muxer,
    Decoder,
    Encoder,
    Filter,
    Parser,
    Bsf,
    Protocol,
}

impl ComponentKind {
    pub const ALL: [Self; 8] = [
        Self::Demuxer,
        Self::Muxer,
        Self::Decoder,
        Self::Encoder,
        Self::Filter,
        Self::Parser,
        Self::Bsf,
        Self::Protocol,
    ];

    pub const fn flag_name(self) -> &'static str {
        match self {
            Self::Demuxer => "demuxer",
            Self::Muxer => "muxer",
            Self::Decoder => "decoder",
            Self::Encoder => "encoder",
            Self::Filter => "filter",
            Self::Parser => "parser",
            Self::Bsf => "bsf",
            Self::Protocol => "protocol",
        }
    }

    pub fn from_flag_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.flag_name() == name)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag_name())
    }
}

/// Serializable description of a registered component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecCapability {
    pub identifier: String,
    pub kind: ComponentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaKind>,
    /// Formats the component produces (decoders) or accepts (encoders, filters).
    /// Empty for containers and protocols.
    #[serde(default)]
    pub formats: Vec<FormatCaps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub param_schema: serde_json::Value,
    /// Internal components (graph endpoints, implicit conversion) ignore profiles.
    #[serde(default)]
    pub internal: bool,
    pub enabled: bool,
}

impl CodecCapability {
    pub fn new(identifier: &str, kind: ComponentKind) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            media: None,
            formats: Vec::new(),
            description: None,
            param_schema: serde_json::Value::Null,
            internal: false,
            enabled: true,
        }
    }

    #[must_use]
    pub const fn with_media(mut self, media: MediaKind) -> Self {
        self.media = Some(media);
        self
    }

    #[must_use]
    pub fn with_formats(mut self, formats: Vec<FormatCaps>) -> Self {
        self.formats = formats;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    #[must_use]
    pub fn with_param_schema(mut self, schema: serde_json::Value) -> Self {
        self.param_schema = schema;
        self
    }

    #[must_use]
    pub const fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

/// The factory behind a capability.
#[derive(Clone)]
pub enum ComponentFactory {
    Demuxer { open: DemuxerFactory, probe: Option<ProbeFn> },
    Muxer(MuxerFactory),
    Decoder(Arc<dyn DecoderFactory>),
    Encoder(Arc<dyn EncoderFactory>),
    Filter(FilterFactory),
    /// Capability without an in-process implementation (protocols, parsers).
    Descriptor,
}

#[derive(Clone)]
struct Entry {
    capability: CodecCapability,
    factory: ComponentFactory,
}

/// Holds every component the engine can construct.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    entries: HashMap<(ComponentKind, String), Entry>,
    /// Identifiers a profile enabled that have no registered implementation.
    unavailable: BTreeSet<(ComponentKind, String)>,
}

impl FormatRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component. A later registration with the same kind and
    /// identifier replaces the earlier one.
    pub fn register(&mut self, capability: CodecCapability, factory: ComponentFactory) {
        tracing::trace!(kind = %capability.kind, id = %capability.identifier, "Registering component");
        self.entries
            .insert((capability.kind, capability.identifier.clone()), Entry { capability, factory });
    }

    pub fn register_demuxer<F>(&mut self, id: &str, open: F, probe: Option<ProbeFn>, description: &str)
    where
        F: Fn(Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> + Send + Sync + 'static,
    {
        self.register(
            CodecCapability::new(id, ComponentKind::Demuxer).with_description(description),
            ComponentFactory::Demuxer { open: Arc::new(open), probe },
        );
    }

    pub fn register_muxer<F>(&mut self, id: &str, create: F, description: &str)
    where
        F: Fn(Box<dyn ByteSink>) -> Result<Box<dyn ContainerWriter>> + Send + Sync + 'static,
    {
        self.register(
            CodecCapability::new(id, ComponentKind::Muxer).with_description(description),
            ComponentFactory::Muxer(Arc::new(create)),
        );
    }

    pub fn register_decoder(
        &mut self,
        capability: CodecCapability,
        factory: Arc<dyn DecoderFactory>,
    ) {
        self.register(capability, ComponentFactory::Decoder(factory));
    }

    pub fn register_encoder(
        &mut self,
        capability: CodecCapability,
        factory: Arc<dyn EncoderFactory>,
    ) {
        self.register(capability, ComponentFactory::Encoder(factory));
    }

    pub fn register_filter<F>(&mut self, capability: CodecCapability, factory: F)
    where
        F: Fn(Option<&serde_json::Value>) -> Result<Box<dyn FilterNode>> + Send + Sync + 'static,
    {
        self.register(capability, ComponentFactory::Filter(Arc::new(factory)));
    }

    pub fn register_descriptor(&mut self, capability: CodecCapability) {
        self.register(capability, ComponentFactory::Descriptor);
    }

    /// Applies a build profile to every entry. Internal components stay enabled.
    ///
    /// # Errors
    ///
    /// `Configuration` if a flag cannot be parsed; the registry is left unchanged.
    pub fn apply_profile(&mut self, profile: &BuildProfile) -> Result<()> {
        let rules = profile.rules()?;
        let mut unavailable = BTreeSet::new();

        for entry in self.entries.values_mut() {
            entry.capability.enabled = true;
        }
        for rule in &rules {
            match rule {
                ProfileRule::DisableEverything => {
                    for entry in self.entries.values_mut() {
                        entry.capability.enabled = false;
                    }
                    unavailable.clear();
                },
                ProfileRule::SetKind { kind, enabled } => {
                    for entry in self.entries.values_mut().filter(|e| e.capability.kind == *kind) {
                        entry.capability.enabled = *enabled;
                    }
                    if !*enabled {
                        unavailable.retain(|(k, _)| k != kind);
                    }
                },
                ProfileRule::SetIds { kind, ids, enabled } => {
                    for id in ids {
                        match self.entries.get_mut(&(*kind, id.clone())) {
                            Some(entry) => entry.capability.enabled = *enabled,
                            None if *enabled => {
                                unavailable.insert((*kind, id.clone()));
                            },
                            None => {
                                unavailable.remove(&(*kind, id.clone()));
                            },
                        }
                    }
                },
            }
        }
        for entry in self.entries.values_mut().filter(|e| e.capability.internal) {
            entry.capability.enabled = true;
        }

        for (kind, id) in &unavailable {
            tracing::warn!(kind = %kind, id = %id, "Build profile enables a component that is not available");
        }
        self.unavailable = unavailable;
        tracing::info!(
            enabled = self.entries.values().filter(|e| e.capability.enabled).count(),
            registered = self.entries.len(),
            "Applied build profile"
        );
        Ok(())
    }

    /// Applies `profile` and freezes the registry for lock-free sharing.
    ///
    /// # Errors
    ///
    /// `Configuration` if a flag cannot be parsed.
    pub fn finalize(mut self, profile: &BuildProfile) -> Result<Arc<Self>> {
        self.apply_profile(profile)?;
        Ok(Arc::new(self))
    }

    /// Finds a capability regardless of its enabled flag.
    pub fn lookup(&self, kind: ComponentKind, id: &str) -> Option<&CodecCapability> {
        self.entries.get(&(kind, id.to_string())).map(|e| &e.capability)
    }

    /// Finds an enabled capability.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` if the component is unknown or disabled.
    pub fn require(&self, kind: ComponentKind, id: &str) -> Result<&CodecCapability> {
        self.entry(kind, id).map(|e| &e.capability)
    }

    pub fn contains(&self, kind: ComponentKind, id: &str) -> bool {
        self.entries.contains_key(&(kind, id.to_string()))
    }

    /// Identifiers of every enabled decoder and encoder.
    pub fn enabled_codecs(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .filter(|e| {
                e.capability.enabled
                    && matches!(e.capability.kind, ComponentKind::Decoder | ComponentKind::Encoder)
            })
            .map(|e| e.capability.identifier.clone())
            .collect()
    }

    /// Enabled capabilities of one kind, sorted by identifier.
    pub fn enabled(&self, kind: ComponentKind) -> Vec<&CodecCapability> {
        let mut caps: Vec<&CodecCapability> = self
            .entries
            .values()
            .map(|e| &e.capability)
            .filter(|c| c.enabled && c.kind == kind)
            .collect();
        caps.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        caps
    }

    /// Every registered capability, sorted by kind then identifier.
    pub fn definitions(&self) -> Vec<CodecCapability> {
        let mut caps: Vec<CodecCapability> =
            self.entries.values().map(|e| e.capability.clone()).collect();
        caps.sort_by(|a, b| (a.kind, &a.identifier).cmp(&(b.kind, &b.identifier)));
        caps
    }

    pub const fn unavailable(&self) -> &BTreeSet<(ComponentKind, String)> {
        &self.unavailable
    }

    /// Opens an enabled demuxer over `source`.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` if the demuxer is unknown or disabled, otherwise whatever
    /// the demuxer reports while reading the header.
    pub fn open_demuxer(&self, id: &str, source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> {
        match &self.entry(ComponentKind::Demuxer, id)?.factory {
            ComponentFactory::Demuxer { open, .. } => open(source),
            _ => Err(mismatch(ComponentKind::Demuxer, id)),
        }
    }

    /// Creates an enabled container writer over `sink`.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` if the muxer is unknown or disabled.
    pub fn create_writer(&self, id: &str, sink: Box<dyn ByteSink>) -> Result<Box<dyn ContainerWriter>> {
        match &self.entry(ComponentKind::Muxer, id)?.factory {
            ComponentFactory::Muxer(create) => create(sink),
            _ => Err(mismatch(ComponentKind::Muxer, id)),
        }
    }

    /// # Errors
    ///
    /// `UnsupportedFormat` if the decoder is unknown or disabled.
    pub fn decoder(&self, id: &str) -> Result<Arc<dyn DecoderFactory>> {
        match &self.entry(ComponentKind::Decoder, id)?.factory {
            ComponentFactory::Decoder(factory) => Ok(Arc::clone(factory)),
            _ => Err(mismatch(ComponentKind::Decoder, id)),
        }
    }

    /// # Errors
    ///
    /// `UnsupportedFormat` if the encoder is unknown or disabled.
    pub fn encoder(&self, id: &str) -> Result<Arc<dyn EncoderFactory>> {
        match &self.entry(ComponentKind::Encoder, id)?.factory {
            ComponentFactory::Encoder(factory) => Ok(Arc::clone(factory)),
            _ => Err(mismatch(ComponentKind::Encoder, id)),
        }
    }

    /// Creates an enabled filter node from its parameters.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` if the filter is unknown or disabled, `Configuration`
    /// for invalid parameters.
    pub fn create_filter(
        &self,
        id: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<Box<dyn FilterNode>> {
        match &self.entry(ComponentKind::Filter, id)?.factory {
            ComponentFactory::Filter(factory) => factory(params),
            _ => Err(mismatch(ComponentKind::Filter, id)),
        }
    }

    /// Picks the enabled demuxer whose probe scores highest on `head`.
    pub fn probe(&self, head: &[u8]) -> Option<&str> {
        self.entries
            .values()
            .filter(|e| e.capability.enabled)
            .filter_map(|e| match &e.factory {
                ComponentFactory::Demuxer { probe: Some(probe), .. } => {
                    Some((probe(head), e.capability.identifier.as_str()))
                },
                _ => None,
            })
            .filter(|(score, _)| *score > 0)
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, id)| id)
    }

    fn entry(&self, kind: ComponentKind, id: &str) -> Result<&Entry> {
        match self.entries.get(&(kind, id.to_string())) {
            Some(entry) if entry.capability.enabled => Ok(entry),
            Some(_) => Err(TranscodeError::UnsupportedFormat(format!(
                "{kind} '{id}' is disabled in the active build profile"
            ))),
            None => Err(TranscodeError::UnsupportedFormat(format!("{kind} '{id}' is not registered"))),
        }
    }
}

fn mismatch(kind: ComponentKind, id: &str) -> TranscodeError {
    TranscodeError::UnsupportedFormat(format!("{kind} '{id}' has no {kind} implementation"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::node::FilterOutput;
    use crate::pins::{InputPort, OutputPort};
    use crate::types::{Frame, FrameFormat};

    struct Nop;

    impl FilterNode for Nop {
        fn input_ports(&self) -> Vec<InputPort> {
            vec![InputPort::any("in")]
        }
        fn output_ports(&self) -> Vec<OutputPort> {
            vec![OutputPort::new("out", None)]
        }
        fn configure(&mut self, inputs: &[FrameFormat]) -> Result<Vec<FrameFormat>> {
            Ok(inputs.to_vec())
        }
        fn process(&mut self, inputs: Vec<Frame>, out: &mut FilterOutput) -> Result<()> {
            for frame in inputs {
                out.push(0, frame);
            }
            Ok(())
        }
    }

    fn registry() -> FormatRegistry {
        let mut registry = FormatRegistry::new();
        for id in ["scale", "fps", "null"] {
            registry.register_filter(CodecCapability::new(id, ComponentKind::Filter), |_| {
                Ok(Box::new(Nop) as Box<dyn FilterNode>)
            });
        }
        registry.register_filter(
            CodecCapability::new("buffer", ComponentKind::Filter).internal(),
            |_| Ok(Box::new(Nop) as Box<dyn FilterNode>),
        );
        registry.register_descriptor(CodecCapability::new("file", ComponentKind::Protocol));
        registry
    }

    #[test]
    fn test_everything_enabled_by_default() {
        let registry = registry();
        assert!(registry.require(ComponentKind::Filter, "fps").is_ok());
        assert!(registry.create_filter("scale", None).is_ok());
    }

    #[test]
    fn test_profile_disables_and_reenables() {
        let mut registry = registry();
        registry
            .apply_profile(&BuildProfile::from_flags([
                "--disable-filters",
                "--enable-filter=scale,x264",
            ]))
            .unwrap_or_default();

        assert!(registry.require(ComponentKind::Filter, "scale").is_ok());
        let err = registry.require(ComponentKind::Filter, "fps").err().map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::UnsupportedFormat));
        // lookup still finds disabled entries
        assert_eq!(registry.lookup(ComponentKind::Filter, "fps").map(|c| c.enabled), Some(false));
        // internal entries ignore the profile
        assert!(registry.require(ComponentKind::Filter, "buffer").is_ok());
        assert!(registry.unavailable().contains(&(ComponentKind::Filter, "x264".to_string())));
    }

    #[test]
    fn test_later_disable_clears_unavailable() {
        let mut registry = registry();
        registry
            .apply_profile(&BuildProfile::from_flags([
                "--enable-decoder=h264,hevc",
                "--enable-filter=x264",
                "--disable-decoder=h264",
                "--disable-filters",
            ]))
            .unwrap_or_default();
        let unavailable: Vec<_> = registry.unavailable().iter().cloned().collect();
        assert_eq!(unavailable, vec![(ComponentKind::Decoder, "hevc".to_string())]);

        registry
            .apply_profile(&BuildProfile::from_flags(["--enable-decoder=h264", "--disable-everything"]))
            .unwrap_or_default();
        assert!(registry.unavailable().is_empty());
    }

    #[test]
    fn test_not_found_vs_disabled_messages() {
        let mut registry = registry();
        registry.apply_profile(&BuildProfile::from_flags(["--disable-everything"])).unwrap_or_default();
        let disabled = registry.create_filter("fps", None).err().map(|e| e.to_string());
        assert!(disabled.is_some_and(|m| m.contains("disabled")));
        let missing = registry.decoder("h264").err().map(|e| e.to_string());
        assert!(missing.is_some_and(|m| m.contains("not registered")));
        assert!(registry.lookup(ComponentKind::Decoder, "h264").is_none());
    }

    #[test]
    fn test_bad_profile_leaves_registry_untouched() {
        let mut registry = registry();
        assert!(registry.apply_profile(&BuildProfile::from_flags(["--enable-widget=a"])).is_err());
        assert!(registry.require(ComponentKind::Filter, "fps").is_ok());
    }
}
