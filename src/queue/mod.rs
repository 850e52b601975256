//! Matchmaking queues
//!
//! One [`BattlegroundQueue`] exists per [`crate::types::QueueKey`]. Within a
//! queue, entries are bucketed by level bracket into four ordered lanes
//! (premade/normal x faction); all matching decisions happen inside one
//! queue-bracket pair.

pub mod battleground_queue;
pub mod entry;
pub mod events;
pub mod selection;
pub mod wait_time;

pub use battleground_queue::{BattlegroundQueue, EnqueueRequest, MatchingPassOutcome, RemovalOutcome};
pub use entry::{GroupId, GroupQueueInfo, Invite, PlayerQueueInfo, QueueLane, LANE_COUNT};
pub use selection::SelectionPool;
pub use wait_time::{WaitTimeTracker, WAIT_TIME_SAMPLES};

use crate::types::{BracketId, QueueKey};
use std::collections::HashSet;
use std::sync::Mutex;

/// One deferred matching-pass request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueUpdateRequest {
    /// Rating hint for rated arena pairing; zero means none
    pub rating_hint: u32,
    pub key: QueueKey,
    pub bracket: BracketId,
}

/// Deduplicating set of matching passes to run on the next tick.
///
/// Scheduling the same (rating, queue, bracket) triple twice between ticks
/// runs the pass once.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    pending: Mutex<HashSet<QueueUpdateRequest>>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, request: QueueUpdateRequest) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(request);
        }
    }

    /// Take every pending request, in a deterministic order.
    pub fn drain(&self) -> Vec<QueueUpdateRequest> {
        let mut requests: Vec<_> = self
            .pending
            .lock()
            .map(|mut pending| pending.drain().collect())
            .unwrap_or_default();
        requests.sort();
        requests
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}
