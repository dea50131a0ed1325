// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bounded presentation-order buffer used by the codec pools.
//!
//! Entries are kept sorted by pts rank inside a ring allocated once at
//! construction. The buffer never grows past its capacity: pushing into a full
//! buffer drops the oldest entry (lowest pts) and reports
//! [`TranscodeError::ReorderOverflow`]. An entry whose pts is not greater than the
//! last released pts can no longer be emitted in order and is dropped the same way.

use crate::error::{Result, TranscodeError};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    entries: VecDeque<(i64, T)>,
    capacity: usize,
    last_released: Option<i64>,
}

impl<T> ReorderBuffer<T> {
    /// Creates a buffer holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity, last_released: None }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn last_released(&self) -> Option<i64> {
        self.last_released
    }

    /// Inserts an entry at its pts rank.
    ///
    /// # Errors
    ///
    /// `ReorderOverflow` when the entry arrived too late or the buffer was full.
    /// In both cases exactly one entry (the oldest) has been dropped and the buffer
    /// remains usable.
    pub fn push(&mut self, pts: i64, item: T) -> Result<()> {
        if let Some(last) = self.last_released {
            if pts <= last {
                return Err(TranscodeError::ReorderOverflow(format!(
                    "pts {pts} arrived after pts {last} was already released; dropped"
                )));
            }
        }

        let at = self.entries.partition_point(|(p, _)| *p <= pts);
        if self.entries.len() == self.capacity {
            if at == 0 {
                // The incoming entry is itself the oldest.
                return Err(TranscodeError::ReorderOverflow(format!(
                    "reorder depth {} exceeded; dropped pts {pts}",
                    self.capacity
                )));
            }
            let dropped = self.entries.pop_front().map_or(pts, |(p, _)| p);
            self.entries.insert(at - 1, (pts, item));
            self.last_released = Some(self.last_released.map_or(dropped, |l| l.max(dropped)));
            return Err(TranscodeError::ReorderOverflow(format!(
                "reorder depth {} exceeded; dropped pts {dropped}",
                self.capacity
            )));
        }
        self.entries.insert(at, (pts, item));
        Ok(())
    }

    /// Releases the lowest entry once more than `delay` entries are buffered.
    pub fn pop_ready(&mut self, delay: usize) -> Option<T> {
        if self.entries.len() > delay {
            self.pop_front()
        } else {
            None
        }
    }

    /// Releases every buffered entry in presentation order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(item) = self.pop_front() {
            out.push(item);
        }
        out
    }

    /// Forgets buffered entries and the release history (after a seek).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_released = None;
    }

    fn pop_front(&mut self) -> Option<T> {
        let (pts, item) = self.entries.pop_front()?;
        self.last_released = Some(pts);
        Some(item)
    }
}
