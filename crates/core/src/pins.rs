// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Port declarations used by filter graph validation.
//!
//! - [`InputPort`]: declares the format patterns a node accepts on one input
//! - [`OutputPort`]: declares the media kind one output produces; the concrete
//!   format is only known once the node has been configured with its inputs
//!
//! Ports are addressed by index. Every input port must be fed by exactly one
//! link and every output port must feed exactly one link; fan-out goes through
//! an explicit `split` / `asplit` node.

use crate::caps::FormatCaps;
use crate::types::MediaKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InputPort {
    pub name: String,
    /// Accepted patterns. Empty means any format.
    pub accepts: Vec<FormatCaps>,
}

impl InputPort {
    pub fn new(name: &str, accepts: Vec<FormatCaps>) -> Self {
        Self { name: name.to_string(), accepts }
    }

    pub fn any(name: &str) -> Self {
        Self::new(name, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputPort {
    pub name: String,
    /// `None` when the output follows the media kind of the input.
    pub media: Option<MediaKind>,
}

impl OutputPort {
    pub fn new(name: &str, media: Option<MediaKind>) -> Self {
        Self { name: name.to_string(), media }
    }
}

/// Names ports of a dynamic family (`prefix_0`, `prefix_1`, ...).
pub fn numbered(prefix: &str, index: usize) -> String {
    format!("{prefix}_{index}")
}
