// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured event emission for external sinks.
//!
//! Every stage can report what happened (a packet skipped, a stream failing, a
//! state change) as a [`TelemetryEvent`]: stage, optional stream, event type,
//! optional error kind, wall-clock timestamp and a JSON payload. What the sink
//! does with the events is up to the embedder.
//!
//! ## Design Principles
//!
//! - **Best-effort delivery**: emission never blocks a media stage
//! - **Rate-limited**: each event type is capped per one-second window
//! - **Drop accounting**: events lost to a full channel or to rate limiting are
//!   counted and can be reported with [`TelemetryEmitter::maybe_emit_health`]

use crate::error::{ErrorKind, Stage, TranscodeError};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// A structured event emitted by a pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_index: Option<usize>,
    /// Dotted event name (`decode.skipped`, `stream.failed`, `pipeline.state`, ...).
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Microseconds since the UNIX epoch.
    pub timestamp_us: u64,
    pub data: JsonValue,
}

#[allow(clippy::cast_possible_truncation)] // u64 microseconds covers ~500,000 years
fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}

struct RateLimitState {
    per_type: HashMap<String, (Instant, u32)>,
    window: Duration,
    max_per_window: u32,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self { per_type: HashMap::new(), window: Duration::from_secs(1), max_per_window: 100 }
    }
}

/// Best-effort, rate-limited emitter bound to one stage (and optionally one stream).
pub struct TelemetryEmitter {
    stage: Stage,
    stream_index: Option<usize>,
    tx: Option<mpsc::Sender<TelemetryEvent>>,
    dropped_full: AtomicU64,
    dropped_rate_limit: AtomicU64,
    last_health_emit: Instant,
    rate_limit_state: Mutex<RateLimitState>,
}

impl TelemetryEmitter {
    const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(
        stage: Stage,
        stream_index: Option<usize>,
        tx: Option<mpsc::Sender<TelemetryEvent>>,
    ) -> Self {
        Self {
            stage,
            stream_index,
            tx,
            dropped_full: AtomicU64::new(0),
            dropped_rate_limit: AtomicU64::new(0),
            last_health_emit: Instant::now(),
            rate_limit_state: Mutex::new(RateLimitState::default()),
        }
    }

    /// Same sink and stream, different stage.
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self::new(stage, self.stream_index, self.tx.clone())
    }

    fn should_rate_limit(&self, event_type: &str) -> bool {
        // A poisoned lock only means another emitter panicked mid-update; keep emitting.
        let mut state = match self.rate_limit_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let window = state.window;
        let max_per_window = state.max_per_window;

        let entry = state.per_type.entry(event_type.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= window {
            *entry = (now, 1);
            return false;
        }
        if entry.1 >= max_per_window {
            return true;
        }
        entry.1 += 1;
        false
    }

    /// Emits an event. Returns `true` if it was queued.
    pub fn emit(&self, event_type: &str, data: JsonValue) -> bool {
        self.emit_internal(event_type, None, data)
    }

    /// Emits an event describing an error.
    pub fn emit_error(&self, event_type: &str, error: &TranscodeError) -> bool {
        self.emit_internal(
            event_type,
            Some(error.kind()),
            serde_json::json!({ "message": error.to_string() }),
        )
    }

    fn emit_internal(&self, event_type: &str, error_kind: Option<ErrorKind>, data: JsonValue) -> bool {
        let Some(ref tx) = self.tx else {
            return false;
        };

        if self.should_rate_limit(event_type) {
            self.dropped_rate_limit.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let event = TelemetryEvent {
            stage: self.stage,
            stream_index: self.stream_index,
            event_type: event_type.to_string(),
            error_kind,
            timestamp_us: now_us(),
            data,
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_full.fetch_add(1, Ordering::Relaxed);
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// `(dropped because the channel was full, dropped by rate limiting)`
    pub fn dropped_counts(&self) -> (u64, u64) {
        (self.dropped_full.load(Ordering::Relaxed), self.dropped_rate_limit.load(Ordering::Relaxed))
    }

    /// Reports dropped events once the health interval has passed.
    pub fn maybe_emit_health(&mut self) -> bool {
        let (dropped_full, dropped_rate_limit) = self.dropped_counts();
        if dropped_full == 0 && dropped_rate_limit == 0 {
            return false;
        }
        if self.last_health_emit.elapsed() < Self::HEALTH_INTERVAL {
            return false;
        }
        self.last_health_emit = Instant::now();

        let emitted = self.emit(
            "telemetry.health",
            serde_json::json!({
                "dropped_due_to_full": dropped_full,
                "dropped_due_to_rate_limit": dropped_rate_limit,
            }),
        );
        if emitted {
            self.dropped_full.store(0, Ordering::Relaxed);
            self.dropped_rate_limit.store(0, Ordering::Relaxed);
        }
        emitted
    }

    /// Caps events per type per second.
    pub fn set_rate_limit(&self, max_per_second: u32) {
        let mut state = match self.rate_limit_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.max_per_window = max_per_second;
        state.window = Duration::from_secs(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emitter_basic() {
        let (tx, mut rx) = mpsc::channel(10);
        let emitter = TelemetryEmitter::new(Stage::Decode, Some(1), Some(tx));

        assert!(emitter.emit("decode.started", serde_json::json!({ "codec": "rlev" })));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, Stage::Decode);
        assert_eq!(event.stream_index, Some(1));
        assert_eq!(event.event_type, "decode.started");
        assert_eq!(event.data["codec"], "rlev");
        assert!(event.timestamp_us > 0);
    }

    #[tokio::test]
    async fn test_emit_error_carries_kind() {
        let (tx, mut rx) = mpsc::channel(10);
        let emitter = TelemetryEmitter::new(Stage::Decode, Some(0), Some(tx));
        emitter.emit_error("decode.skipped", &TranscodeError::Decode("short payload".into()));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.error_kind, Some(ErrorKind::DecodeError));
        assert!(event.data["message"].as_str().unwrap().contains("short payload"));
    }

    #[tokio::test]
    async fn test_emitter_drop_accounting() {
        let (tx, _rx) = mpsc::channel(1);
        let emitter = TelemetryEmitter::new(Stage::Mux, None, Some(tx));

        assert!(emitter.emit("event1", serde_json::json!({})));
        assert!(!emitter.emit("event2", serde_json::json!({})));

        let (dropped_full, _) = emitter.dropped_counts();
        assert_eq!(dropped_full, 1);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let (tx, _rx) = mpsc::channel(100);
        let emitter = TelemetryEmitter::new(Stage::Filter, None, Some(tx));
        emitter.set_rate_limit(2);
        assert!(emitter.emit("e", JsonValue::Null));
        assert!(emitter.emit("e", JsonValue::Null));
        assert!(!emitter.emit("e", JsonValue::Null));
        assert!(emitter.emit("other", JsonValue::Null));
        assert_eq!(emitter.dropped_counts().1, 1);
    }

    #[test]
    fn test_emitter_no_tx() {
        let emitter = TelemetryEmitter::new(Stage::Demux, None, None);
        assert!(!emitter.emit("test.event", serde_json::json!({})));
    }
}
