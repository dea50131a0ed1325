// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline state management and lifecycle tracking.
//!
//! ## State Machine
//!
//! ```text
//!     Idle
//!      ↓
//!    Opened
//!      ↓
//!    Running
//!      ↓
//!    Draining
//!      ↓
//!    Closed
//!
//!   Error ← reachable from every non-terminal state
//! ```

use crate::error::{ErrorKind, Stage};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Lifecycle state of a pipeline.
///
/// ### Valid Transitions:
/// - `Idle` → `Opened` (demuxer and muxer opened, every component enabled)
/// - `Opened` → `Running` (workers spawned)
/// - `Running` → `Draining` (end of input or cancellation)
/// - `Draining` → `Closed` (every stage flushed, output finalized)
/// - `Idle` / `Opened` / `Running` / `Draining` → `Error` (fatal error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Opened,
    Running,
    Draining,
    Closed,
    /// A fatal error ended the pipeline. Records the first fatal error.
    Error { kind: ErrorKind, stage: Stage },
}

impl PipelineState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error { .. })
    }

    pub const fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Opened)
            | (Self::Opened, Self::Running)
            | (Self::Running, Self::Draining)
            | (Self::Draining, Self::Closed) => true,
            (from, Self::Error { .. }) => !from.is_terminal(),
            _ => false,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Opened => "opened",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Error { .. } => "error",
        }
    }
}

/// A state change, as published to observers.
#[derive(Debug, Clone)]
pub struct PipelineStateUpdate {
    pub state: PipelineState,
    pub timestamp: SystemTime,
}

impl PipelineStateUpdate {
    pub fn new(state: PipelineState) -> Self {
        Self { state, timestamp: SystemTime::now() }
    }
}
