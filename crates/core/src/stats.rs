// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-stream statistics tracking and reporting.
//!
//! Workers count what each stage received, sent, discarded and failed on.
//! Snapshots are throttled (every few seconds or every N packets) and always
//! sent once more when the stream ends.

use crate::error::Stage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};

/// Counters for one stage of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Units (packets or frames) handed to the stage
    pub received: u64,
    /// Units the stage produced
    pub sent: u64,
    /// Units dropped without an error (reorder overflow, unmatched sync frames)
    pub discarded: u64,
    /// Units skipped because of a recoverable error
    pub errored: u64,
}

/// Counters for one stream across its stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub decode: StageStats,
    pub filter: StageStats,
    pub encode: StageStats,
    /// Packets accepted by the muxer for this stream
    pub muxed: u64,
    /// Seconds since the stream worker started
    pub duration_secs: f64,
}

impl StreamStats {
    pub fn stage_mut(&mut self, stage: Stage) -> Option<&mut StageStats> {
        match stage {
            Stage::Decode => Some(&mut self.decode),
            Stage::Filter => Some(&mut self.filter),
            Stage::Encode => Some(&mut self.encode),
            _ => None,
        }
    }

    /// Units skipped or dropped anywhere in the stream.
    pub const fn losses(&self) -> u64 {
        self.decode.errored
            + self.decode.discarded
            + self.filter.errored
            + self.filter.discarded
            + self.encode.errored
            + self.encode.discarded
    }
}

/// A statistics snapshot sent by a stream worker.
#[derive(Debug, Clone)]
pub struct StreamStatsUpdate {
    pub stream_index: usize,
    pub stats: StreamStats,
    pub timestamp: SystemTime,
}

/// Tracks one stream's counters and throttles updates.
pub struct StreamStatsTracker {
    stats: StreamStats,
    start_time: Instant,
    last_send: Instant,
    since_send: u64,
    stream_index: usize,
    packet_threshold: u64,
    stats_tx: Option<tokio::sync::mpsc::Sender<StreamStatsUpdate>>,
}

impl StreamStatsTracker {
    const SEND_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(
        stream_index: usize,
        packet_threshold: u64,
        stats_tx: Option<tokio::sync::mpsc::Sender<StreamStatsUpdate>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            stats: StreamStats::default(),
            start_time: now,
            last_send: now,
            since_send: 0,
            stream_index,
            packet_threshold: packet_threshold.max(1),
            stats_tx,
        }
    }

    pub fn received(&mut self, stage: Stage) {
        if stage == Stage::Decode {
            self.since_send += 1;
        }
        if let Some(s) = self.stats.stage_mut(stage) {
            s.received += 1;
        }
    }

    pub fn sent(&mut self, stage: Stage, count: usize) {
        if let Some(s) = self.stats.stage_mut(stage) {
            s.sent += count as u64;
        }
    }

    pub fn discarded(&mut self, stage: Stage, count: u64) {
        if let Some(s) = self.stats.stage_mut(stage) {
            s.discarded += count;
        }
    }

    pub fn errored(&mut self, stage: Stage) {
        if let Some(s) = self.stats.stage_mut(stage) {
            s.errored += 1;
        }
    }

    pub const fn muxed(&mut self, count: u64) {
        self.stats.muxed += count;
    }

    pub const fn snapshot(&self) -> &StreamStats {
        &self.stats
    }

    /// Sends a snapshot if the interval or packet threshold has been reached.
    pub fn maybe_send(&mut self) {
        if self.last_send.elapsed() >= Self::SEND_INTERVAL || self.since_send >= self.packet_threshold {
            self.force_send();
        }
    }

    /// Sends a snapshot now (used for final updates).
    pub fn force_send(&mut self) {
        self.stats.duration_secs = self.start_time.elapsed().as_secs_f64();
        if let Some(ref stats_tx) = self.stats_tx {
            let _ = stats_tx.try_send(StreamStatsUpdate {
                stream_index: self.stream_index,
                stats: self.stats.clone(),
                timestamp: SystemTime::now(),
            });
        }
        self.last_send = Instant::now();
        self.since_send = 0;
    }

    /// Final counters, consuming the tracker.
    pub fn finish(mut self) -> StreamStats {
        self.force_send();
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_triggers_send() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let mut tracker = StreamStatsTracker::new(2, 3, Some(tx));
        for _ in 0..3 {
            tracker.received(Stage::Decode);
            tracker.maybe_send();
        }
        let update = rx.recv().await;
        assert_eq!(update.map(|u| (u.stream_index, u.stats.decode.received)), Some((2, 3)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_losses_sum_all_stages() {
        let mut tracker = StreamStatsTracker::new(0, 100, None);
        tracker.errored(Stage::Decode);
        tracker.discarded(Stage::Filter, 2);
        tracker.errored(Stage::Encode);
        tracker.errored(Stage::Mux);
        let stats = tracker.finish();
        assert_eq!(stats.losses(), 4);
    }
}
