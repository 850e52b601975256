//! Common types used throughout the matchmaking engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for player characters
pub type PlayerGuid = u64;

/// Unique identifier for a live battleground instance
pub type InstanceId = u32;

/// Unique identifier for an arena team
pub type ArenaTeamId = u32;

/// Level-range bucket partitioning a queue so only comparable players match
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BracketId(pub u8);

/// Faction a queue entry fights for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    Alliance,
    Horde,
}

impl Faction {
    pub fn index(self) -> usize {
        match self {
            Faction::Alliance => 0,
            Faction::Horde => 1,
        }
    }

    pub fn from_index(index: usize) -> Faction {
        match index {
            0 => Faction::Alliance,
            _ => Faction::Horde,
        }
    }

    pub fn opposite(self) -> Faction {
        match self {
            Faction::Alliance => Faction::Horde,
            Faction::Horde => Faction::Alliance,
        }
    }
}

impl std::fmt::Display for Faction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Faction::Alliance => write!(f, "Alliance"),
            Faction::Horde => write!(f, "Horde"),
        }
    }
}

/// Category of queue a key addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueueCategory {
    Battleground,
    Arena,
    Wargame,
    ArenaSkirmish,
}

impl QueueCategory {
    fn to_bits(self) -> u64 {
        match self {
            QueueCategory::Battleground => 0,
            QueueCategory::Arena => 1,
            QueueCategory::Wargame => 2,
            QueueCategory::ArenaSkirmish => 3,
        }
    }

    fn from_bits(bits: u64) -> Option<QueueCategory> {
        match bits {
            0 => Some(QueueCategory::Battleground),
            1 => Some(QueueCategory::Arena),
            2 => Some(QueueCategory::Wargame),
            3 => Some(QueueCategory::ArenaSkirmish),
            _ => None,
        }
    }
}

/// Marker pattern stored in the 5 reserved high bits of a packed key.
const PACKED_RESERVED_PATTERN: u64 = 0x1F;

/// Composite identity of one battleground/arena queue.
///
/// Value type: hashable and totally ordered so queue registries iterate
/// deterministically. The packed form reproduces the 64-bit wire layout the
/// network layer expects: reserved[5] | team_size[6] | rated[1] |
/// category[4] | list_id[16], anchored at the top of the word.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct QueueKey {
    pub list_id: u16,
    pub category: QueueCategory,
    pub rated: bool,
    pub team_size: u8,
}

impl QueueKey {
    pub fn battleground(list_id: u16) -> QueueKey {
        QueueKey {
            list_id,
            category: QueueCategory::Battleground,
            rated: false,
            team_size: 0,
        }
    }

    pub fn rated_arena(list_id: u16, team_size: u8) -> QueueKey {
        QueueKey {
            list_id,
            category: QueueCategory::Arena,
            rated: true,
            team_size,
        }
    }

    pub fn skirmish(list_id: u16, team_size: u8) -> QueueKey {
        QueueKey {
            list_id,
            category: QueueCategory::ArenaSkirmish,
            rated: false,
            team_size,
        }
    }

    pub fn is_arena(&self) -> bool {
        matches!(
            self.category,
            QueueCategory::Arena | QueueCategory::ArenaSkirmish
        )
    }

    /// Pack into the 64-bit wire representation.
    pub fn pack(&self) -> u64 {
        PACKED_RESERVED_PATTERN << 59
            | (u64::from(self.team_size) & 0x3F) << 53
            | u64::from(self.rated) << 52
            | (self.category.to_bits() & 0xF) << 48
            | u64::from(self.list_id) << 32
    }

    /// Unpack from the wire representation; `None` when the reserved marker
    /// or category bits don't parse.
    pub fn from_packed(packed: u64) -> Option<QueueKey> {
        if packed >> 59 != PACKED_RESERVED_PATTERN {
            return None;
        }
        Some(QueueKey {
            list_id: (packed >> 32) as u16,
            category: QueueCategory::from_bits(packed >> 48 & 0xF)?,
            rated: packed >> 52 & 0x1 != 0,
            team_size: (packed >> 53 & 0x3F) as u8,
        })
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}{}{}",
            self.category,
            self.list_id,
            if self.rated { ":rated" } else { "" },
            if self.team_size > 0 {
                format!(":{}v{}", self.team_size, self.team_size)
            } else {
                String::new()
            }
        )
    }
}

/// Reason a join request was rejected, surfaced through the failed status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinFailReason {
    /// A member carries the deserter debuff
    Deserter,
    /// A member is already waiting in the maximum number of queues
    TooManyQueues,
    /// A member is queued somewhere else, which rated arenas do not allow
    CannotQueueForRated,
    /// The group exceeds the team size of the target queue
    GroupTooLarge,
    /// A rated arena join with fewer members than the team size
    NotEnoughPlayers,
}

/// One member of a join request, as seen by the queue core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedPlayer {
    pub guid: PlayerGuid,
    pub last_online: DateTime<Utc>,
}
