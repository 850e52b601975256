//! Invite timer events
//!
//! Each queue owns a min-heap of one-shot events keyed by
//! `(player, instance, remove-deadline)`. There is no cancellation: a fired
//! event re-validates its token against live queue state and no-ops when the
//! token went stale (player left, re-queued, or already confirmed).

use crate::types::{InstanceId, PlayerGuid};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InviteEventKind {
    /// Resend the need-confirmation status with the remaining time
    Reminder,
    /// Force-remove a player who never confirmed
    Removal,
}

/// One scheduled invite callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteEvent {
    pub fire_at: DateTime<Utc>,
    pub kind: InviteEventKind,
    pub guid: PlayerGuid,
    pub instance_id: InstanceId,
    /// Staleness token: must still match the group's stored deadline
    pub remove_at: DateTime<Utc>,
}

impl Ord for InviteEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.kind.cmp(&other.kind))
            .then(self.guid.cmp(&other.guid))
            .then(self.instance_id.cmp(&other.instance_id))
            .then(self.remove_at.cmp(&other.remove_at))
    }
}

impl PartialOrd for InviteEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Earliest-first queue of pending invite events
#[derive(Debug, Default)]
pub struct InviteEventQueue {
    heap: BinaryHeap<Reverse<InviteEvent>>,
}

impl InviteEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, event: InviteEvent) {
        self.heap.push(Reverse(event));
    }

    /// Pop the next event due at or before `now`
    pub fn next_due(&mut self, now: DateTime<Utc>) -> Option<InviteEvent> {
        if self.heap.peek().map(|Reverse(e)| e.fire_at <= now)? {
            self.heap.pop().map(|Reverse(e)| e)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
