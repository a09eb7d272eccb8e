//! Range windows for grouped aggregation
//!
//! A [`TimeWindow`] retains, in timestamp order, the entries whose
//! timestamps fall in `(t - range, t]` for the current reference time `t`.
//! Entries carry only what aggregation reads again later: the timestamp and
//! the evaluated aggregate arguments.

use rivulet_core::Value;
use smallvec::SmallVec;
use std::collections::vec_deque::{Drain, Iter};
use std::collections::VecDeque;

/// Aggregate argument values of one event, one slot per aggregate.
pub type Contributions = SmallVec<[Value; 4]>;

/// One retained event.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry {
    pub timestamp: i64,
    pub contributions: Contributions,
}

impl WindowEntry {
    pub fn new(timestamp: i64, contributions: Contributions) -> Self {
        Self {
            timestamp,
            contributions,
        }
    }
}

/// `RANGE INTERVAL range PRECEDING` buffer for a single group.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    range_ms: i64,
    entries: VecDeque<WindowEntry>,
}

impl TimeWindow {
    pub fn new(range_ms: i64) -> Self {
        Self {
            range_ms,
            entries: VecDeque::new(),
        }
    }

    pub fn range_ms(&self) -> i64 {
        self.range_ms
    }

    /// Exclusive lower bound of the window at `reference`.
    pub fn lower_bound(&self, reference: i64) -> i64 {
        reference.saturating_sub(self.range_ms)
    }

    /// True if an entry at `timestamp` belongs to the window at `reference`.
    pub fn admits(&self, timestamp: i64, reference: i64) -> bool {
        timestamp > self.lower_bound(reference) && timestamp <= reference
    }

    /// Insert keeping timestamp order; equal timestamps keep arrival order.
    pub fn insert(&mut self, entry: WindowEntry) {
        // In-order arrivals land at the tail without scanning.
        let pos = self
            .entries
            .iter()
            .rposition(|e| e.timestamp <= entry.timestamp)
            .map_or(0, |i| i + 1);
        self.entries.insert(pos, entry);
    }

    /// Remove every entry at or before `reference - range`, oldest first.
    pub fn evict(&mut self, reference: i64) -> Drain<'_, WindowEntry> {
        let bound = self.lower_bound(reference);
        let expired = self
            .entries
            .iter()
            .position(|e| e.timestamp > bound)
            .unwrap_or(self.entries.len());
        self.entries.drain(..expired)
    }

    /// Timestamp of the newest retained entry.
    pub fn newest_timestamp(&self) -> Option<i64> {
        self.entries.back().map(|e| e.timestamp)
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.entries.front().map(|e| e.timestamp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, WindowEntry> {
        self.entries.iter()
    }

    /// The `slot`-th contribution of every retained entry, oldest first.
    pub fn contributions(&self, slot: usize) -> impl Iterator<Item = &Value> + '_ {
        self.entries
            .iter()
            .filter_map(move |e| e.contributions.get(slot))
    }
}
