//! Per-mode battleground behavior
//!
//! Concrete battleground types differ in setup checks, win conditions and a
//! few player-driven hooks. Instead of subclassing, each instance carries a
//! [`ModeRules`] variant selected from its template at creation time; the
//! matchmaking core itself only depends on the coarse instance state.

use crate::error::{MatchmakingError, Result};
use crate::types::{Faction, PlayerGuid};
use tracing::debug;

/// Capability variant dispatching mode-specific behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRules {
    /// Capture-the-flag style battleground
    FlagCapture,
    /// Resource-race style battleground
    ResourceRace,
    /// Arena: last team standing wins
    Arena,
}

impl ModeRules {
    pub fn is_arena(self) -> bool {
        matches!(self, ModeRules::Arena)
    }

    /// Validate mode prerequisites before players may enter.
    pub fn setup(self, max_players_per_team: u32) -> Result<()> {
        if max_players_per_team == 0 {
            return Err(MatchmakingError::InternalError {
                message: format!("{:?} instance configured with zero-size teams", self),
            }
            .into());
        }
        Ok(())
    }

    /// Decide a winner from the current per-faction alive counts, if the
    /// mode can already call the match.
    ///
    /// Objective-driven battleground wins are reported by the map layer;
    /// only arenas decide purely from headcount here.
    pub fn check_win_conditions(self, players: [u32; 2]) -> Option<Faction> {
        match self {
            ModeRules::Arena => {
                let [alliance, horde] = players;
                if alliance > 0 && horde == 0 {
                    Some(Faction::Alliance)
                } else if horde > 0 && alliance == 0 {
                    Some(Faction::Horde)
                } else {
                    None
                }
            }
            ModeRules::FlagCapture | ModeRules::ResourceRace => None,
        }
    }

    pub fn on_player_removed(self, guid: PlayerGuid) {
        debug!("{:?}: player {} removed from instance", self, guid);
    }

    pub fn on_area_trigger(self, guid: PlayerGuid, trigger: u32) {
        // Objective scripting lives with the map simulation; the engine only
        // acknowledges the hook.
        debug!("{:?}: player {} hit area trigger {}", self, guid, trigger);
    }
}
