//! Average queue wait tracking
//!
//! Per (team index, bracket) the queue keeps a fixed ring of the last N
//! invite latencies plus a running sum, giving an O(1) amortized average.
//! Until the ring is fully populated the average reports as unavailable
//! (zero), so early joiners don't see garbage estimates.

use crate::types::{BracketId, Faction};
use chrono::Duration;
use std::collections::HashMap;

/// Number of invite latencies averaged per team/bracket
pub const WAIT_TIME_SAMPLES: usize = 10;

#[derive(Debug, Clone)]
struct WaitTimeRing {
    samples: [i64; WAIT_TIME_SAMPLES],
    sum: i64,
    filled: usize,
    next: usize,
}

impl WaitTimeRing {
    fn new() -> Self {
        Self {
            samples: [0; WAIT_TIME_SAMPLES],
            sum: 0,
            filled: 0,
            next: 0,
        }
    }

    fn record(&mut self, wait_ms: i64) {
        self.sum += wait_ms - self.samples[self.next];
        self.samples[self.next] = wait_ms;
        self.next = (self.next + 1) % WAIT_TIME_SAMPLES;
        if self.filled < WAIT_TIME_SAMPLES {
            self.filled += 1;
        }
    }

    fn average_ms(&self) -> i64 {
        if self.filled < WAIT_TIME_SAMPLES {
            return 0;
        }
        self.sum / WAIT_TIME_SAMPLES as i64
    }
}

/// Rolling invite-latency averages for one queue
#[derive(Debug, Default)]
pub struct WaitTimeTracker {
    rings: HashMap<(usize, BracketId), WaitTimeRing>,
}

impl WaitTimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the time a group waited before its invite went out
    pub fn record(&mut self, team: Faction, bracket: BracketId, waited: Duration) {
        self.rings
            .entry((team.index(), bracket))
            .or_insert_with(WaitTimeRing::new)
            .record(waited.num_milliseconds().max(0));
    }

    /// Average wait, or zero while fewer than N samples exist
    pub fn average(&self, team: Faction, bracket: BracketId) -> Duration {
        Duration::milliseconds(
            self.rings
                .get(&(team.index(), bracket))
                .map(WaitTimeRing::average_ms)
                .unwrap_or(0),
        )
    }
}
