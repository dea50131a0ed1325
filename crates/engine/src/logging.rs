// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Logging bootstrap for applications embedding the engine.
//!
//! The engine itself only emits `tracing` events; nothing here runs unless the
//! embedder calls [`init_logging`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{LogConfig, LogFormat};

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn env_filter_or_level(default_level: tracing::Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str()))
}

fn make_console_layer(level: tracing::Level, format: LogFormat) -> DynLayer {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .json()
            .with_filter(env_filter_or_level(level))
            .boxed(),
        LogFormat::Text => {
            tracing_subscriber::fmt::layer().with_filter(env_filter_or_level(level)).boxed()
        },
    }
}

/// Installs a global subscriber that writes to stderr.
///
/// `RUST_LOG` overrides the configured level.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(log_config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let layers: Vec<DynLayer> = vec![make_console_layer(log_config.level.into(), log_config.format)];
    tracing_subscriber::registry().with(layers).try_init()?;
    tracing::debug!(level = log_config.level.as_str(), format = ?log_config.format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_second_init_is_an_error() {
        let config = LogConfig { level: LogLevel::Warn, format: LogFormat::Json };
        // Another test may already have installed a subscriber; either way the
        // second call must fail instead of panicking.
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
