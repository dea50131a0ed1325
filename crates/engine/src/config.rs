// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Engine configuration.
//!
//! Values are layered with figment: built-in defaults, then an optional TOML file,
//! then `TK_` environment variables (`__` separates nesting levels, e.g.
//! `TK_ENGINE__MAX_INTERLEAVE_PACKETS=4096`).

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_INTERLEAVE_PACKETS, DEFAULT_MAX_REORDER_DEPTH,
    DEFAULT_MUX_QUEUE_CAPACITY, DEFAULT_STATS_INTERVAL_PACKETS, DEFAULT_STREAM_QUEUE_CAPACITY,
};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;
use transkit_core::BuildProfile;

/// Preset queue sizes for common workloads.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EnginePerfProfile {
    /// Small queues, early backpressure on the demuxer
    LowLatency,
    /// Defaults suited to most file transcodes
    Balanced,
    /// Large queues for batch jobs on fast storage
    HighThroughput,
}

impl EnginePerfProfile {
    const fn stream_queue_capacity(self) -> usize {
        match self {
            Self::LowLatency => 8,
            Self::Balanced => 64,
            Self::HighThroughput => 256,
        }
    }

    const fn mux_queue_capacity(self) -> usize {
        match self {
            Self::LowLatency => 16,
            Self::Balanced => 128,
            Self::HighThroughput => 512,
        }
    }
}

const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

const fn default_max_interleave_packets() -> usize {
    DEFAULT_MAX_INTERLEAVE_PACKETS
}

const fn default_max_reorder_depth() -> usize {
    DEFAULT_MAX_REORDER_DEPTH
}

const fn default_stats_interval_packets() -> u64 {
    DEFAULT_STATS_INTERVAL_PACKETS
}

/// Pipeline tuning, the `[engine]` section.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct PipelineConfig {
    /// Optional tuning profile that provides queue defaults.
    ///
    /// Explicit values for `stream_queue_capacity` and/or `mux_queue_capacity` take precedence.
    #[serde(default)]
    pub profile: Option<EnginePerfProfile>,
    /// Packets per demux → worker queue (default: 64)
    pub stream_queue_capacity: Option<usize>,
    /// Muxer high-watermark in packets (default: 128)
    pub mux_queue_capacity: Option<usize>,
    /// Packets the muxer may hold for interleaving before forcing a write (default: 1024)
    #[serde(default = "default_max_interleave_packets")]
    pub max_interleave_packets: usize,
    /// Reorder buffer depth for decoders and encoders (default: 16)
    #[serde(default = "default_max_reorder_depth")]
    pub max_reorder_depth: usize,
    /// Packets between stream statistics updates (default: 500)
    #[serde(default = "default_stats_interval_packets")]
    pub stats_interval_packets: u64,
    /// Packets a worker drains per wakeup (default: 32)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            profile: None,
            stream_queue_capacity: None,
            mux_queue_capacity: None,
            max_interleave_packets: DEFAULT_MAX_INTERLEAVE_PACKETS,
            max_reorder_depth: DEFAULT_MAX_REORDER_DEPTH,
            stats_interval_packets: DEFAULT_STATS_INTERVAL_PACKETS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PipelineConfig {
    pub fn resolved_stream_queue_capacity(&self) -> usize {
        self.stream_queue_capacity
            .or_else(|| self.profile.map(EnginePerfProfile::stream_queue_capacity))
            .unwrap_or(DEFAULT_STREAM_QUEUE_CAPACITY)
            .max(1)
    }

    pub fn resolved_mux_queue_capacity(&self) -> usize {
        self.mux_queue_capacity
            .or_else(|| self.profile.map(EnginePerfProfile::mux_queue_capacity))
            .unwrap_or(DEFAULT_MUX_QUEUE_CAPACITY)
            .max(1)
    }
}

/// Which components are enabled, the `[registry]` section.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct RegistryConfig {
    /// Enable/disable flags applied in order, e.g.
    /// `["--disable-everything", "--enable-decoder=pcm_s16le"]`.
    #[serde(default)]
    pub flags: Vec<String>,
}

impl RegistryConfig {
    pub fn profile(&self) -> BuildProfile {
        BuildProfile::from_flags(self.flags.iter().cloned())
    }
}

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Output format for log lines.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable (default, faster)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging configuration, the `[log]` section.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct LogConfig {
    /// Overridden by `RUST_LOG` when set.
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

/// Root configuration for an [`crate::Engine`].
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct EngineConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub engine: PipelineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl EngineConfig {
    /// Loads the configuration from defaults, an optional TOML file, and `TK_`
    /// environment variables.
    ///
    /// A path that does not exist is skipped, so callers can pass a conventional
    /// location unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file is malformed or a value (from the file or
    /// the environment) has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            }
        }

        figment.merge(Env::prefixed("TK_").split("__")).extract().map_err(Box::new)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
