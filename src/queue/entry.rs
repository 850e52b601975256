//! Queue entry model
//!
//! A [`GroupQueueInfo`] is one matchmaking unit: a solo player or a formed
//! group. Entries live in per-bracket buckets inside their owning
//! [`crate::queue::BattlegroundQueue`]; a guid index maps every queued player
//! back to its group in O(1).

use crate::types::{ArenaTeamId, BracketId, Faction, InstanceId, PlayerGuid};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Queue-local identifier for a [`GroupQueueInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Per-player back-reference data inside its group
#[derive(Debug, Clone)]
pub struct PlayerQueueInfo {
    pub last_online: DateTime<Utc>,
}

/// Pending invitation token; deadline equality is what lets stale timer
/// callbacks no-op safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invite {
    pub instance_id: InstanceId,
    pub remove_at: DateTime<Utc>,
}

/// One matchmaking unit queued in a bucket
#[derive(Debug, Clone)]
pub struct GroupQueueInfo {
    pub id: GroupId,
    /// Mutable: a same-faction skirmish match may reassign it
    pub team: Faction,
    pub bracket: BracketId,
    pub premade: bool,
    pub rated: bool,
    pub arena_team_id: ArenaTeamId,
    pub arena_team_rating: u32,
    pub arena_matchmaker_rating: u32,
    /// Filled once paired against another rated team
    pub opponent_team_rating: u32,
    pub opponent_matchmaker_rating: u32,
    pub join_time: DateTime<Utc>,
    pub invite: Option<Invite>,
    /// Non-empty while the entry is queued; removing the last member deletes
    /// the group from its bucket
    pub members: BTreeMap<PlayerGuid, PlayerQueueInfo>,
}

impl GroupQueueInfo {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_invited(&self) -> bool {
        self.invite.is_some()
    }

    pub fn invited_to(&self, instance_id: InstanceId) -> bool {
        self.invite
            .map(|invite| invite.instance_id == instance_id)
            .unwrap_or(false)
    }
}

/// The four ordered buckets each (queue, bracket) pair owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLane {
    PremadeAlliance,
    PremadeHorde,
    NormalAlliance,
    NormalHorde,
}

pub const LANE_COUNT: usize = 4;

impl QueueLane {
    pub fn of(premade: bool, team: Faction) -> QueueLane {
        match (premade, team) {
            (true, Faction::Alliance) => QueueLane::PremadeAlliance,
            (true, Faction::Horde) => QueueLane::PremadeHorde,
            (false, Faction::Alliance) => QueueLane::NormalAlliance,
            (false, Faction::Horde) => QueueLane::NormalHorde,
        }
    }

    pub fn premade(team: Faction) -> QueueLane {
        QueueLane::of(true, team)
    }

    pub fn normal(team: Faction) -> QueueLane {
        QueueLane::of(false, team)
    }

    pub fn index(self) -> usize {
        match self {
            QueueLane::PremadeAlliance => 0,
            QueueLane::PremadeHorde => 1,
            QueueLane::NormalAlliance => 2,
            QueueLane::NormalHorde => 3,
        }
    }

    pub fn is_premade(self) -> bool {
        matches!(self, QueueLane::PremadeAlliance | QueueLane::PremadeHorde)
    }

    pub fn team(self) -> Faction {
        match self {
            QueueLane::PremadeAlliance | QueueLane::NormalAlliance => Faction::Alliance,
            QueueLane::PremadeHorde | QueueLane::NormalHorde => Faction::Horde,
        }
    }
}
