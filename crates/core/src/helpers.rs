// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Utility functions for component parameters and queue draining.
//!
//! - [`config_helpers`]: Parse component parameters from JSON values
//! - [`queue_helpers`]: Greedy batch collection from bounded channels

use crate::error::TranscodeError;

/// Helper functions for parsing component parameters from JSON values.
pub mod config_helpers {
    use super::TranscodeError;
    use serde::Deserialize;

    /// Parses parameters from an optional JSON value, using defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns `TranscodeError::Configuration` if `params` is present but malformed.
    pub fn parse_config_optional<T>(params: Option<&serde_json::Value>) -> Result<T, TranscodeError>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        match params {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| TranscodeError::Configuration(format!("Failed to parse params: {e}"))),
        }
    }

    /// Parses parameters from an optional JSON value, returning an error if not provided.
    ///
    /// # Errors
    ///
    /// Returns `TranscodeError::Configuration` if `params` is `None` or if deserialization fails.
    pub fn parse_config_required<T>(params: Option<&serde_json::Value>) -> Result<T, TranscodeError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = params
            .ok_or_else(|| TranscodeError::Configuration("Parameters required".to_string()))?
            .clone();
        serde_json::from_value(value)
            .map_err(|e| TranscodeError::Configuration(format!("Failed to parse params: {e}")))
    }

    /// Parses parameters with the component name in the error message.
    ///
    /// # Errors
    ///
    /// Returns `TranscodeError::Configuration` if `params` is `None` or if deserialization fails.
    pub fn parse_config_with_context<T>(
        params: Option<&serde_json::Value>,
        context: &str,
    ) -> Result<T, TranscodeError>
    where
        T: for<'de> Deserialize<'de>,
    {
        params.map_or_else(
            || Err(TranscodeError::Configuration(format!("{context} parameters required"))),
            |p| {
                serde_json::from_value(p.clone()).map_err(|e| {
                    TranscodeError::Configuration(format!("Failed to parse {context} parameters: {e}"))
                })
            },
        )
    }
}

/// Helper functions for draining bounded queues.
pub mod queue_helpers {
    use smallvec::SmallVec;
    use tokio::sync::mpsc;

    /// Default batch size for stack-allocated SmallVec.
    pub const DEFAULT_BATCH_CAPACITY: usize = 32;

    pub type Batch<T> = SmallVec<[T; DEFAULT_BATCH_CAPACITY]>;

    /// Greedily collects a batch from a receiver.
    /// Starts with the given first item, then drains up to `batch_size - 1`
    /// additional items without blocking.
    pub fn batch_greedy<T>(first: T, rx: &mut mpsc::Receiver<T>, batch_size: usize) -> Batch<T> {
        let mut batch = Batch::new();
        batch.push(first);

        for _ in 0..batch_size.saturating_sub(1) {
            match rx.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        batch
    }
}
