//! Arena team rating storage
//!
//! The matchmaking core treats the arena-team/rating store as a
//! lookup-and-update collaborator: fetch a team by id, apply win/loss
//! deltas, persist. Deltas use the Elo model from `skillratings`, driven by
//! the opponent's matchmaker rating.

use crate::error::{MatchmakingError, Result};
use crate::types::{ArenaTeamId, PlayerGuid};
use serde::{Deserialize, Serialize};
use skillratings::elo::{elo, EloConfig, EloRating};
use skillratings::Outcomes;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// Snapshot of one arena team's ladder state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaTeamRecord {
    pub id: ArenaTeamId,
    pub name: String,
    /// Displayed ladder rating, adjusted on win/loss
    pub rating: u32,
    /// Rating used for pairing decisions
    pub matchmaker_rating: u32,
    pub wins: u32,
    pub losses: u32,
}

impl ArenaTeamRecord {
    pub fn new(id: ArenaTeamId, name: impl Into<String>, rating: u32) -> Self {
        Self {
            id,
            name: name.into(),
            rating,
            matchmaker_rating: rating,
            wins: 0,
            losses: 0,
        }
    }
}

/// Trait for the arena-team rating collaborator
pub trait ArenaTeamStore: Send + Sync {
    /// Look up a team by id
    fn get_team(&self, team_id: ArenaTeamId) -> Option<ArenaTeamRecord>;

    /// Apply a loss for an online member who abandoned an invited rated match
    fn member_lost(&self, team_id: ArenaTeamId, guid: PlayerGuid, opponent_mmr: u32)
        -> Result<()>;

    /// Same as [`ArenaTeamStore::member_lost`] but keyed purely by guid,
    /// for players who already logged out
    fn offline_member_lost(
        &self,
        team_id: ArenaTeamId,
        guid: PlayerGuid,
        opponent_mmr: u32,
    ) -> Result<()>;

    /// Apply a finished rated match to both teams
    fn apply_match_result(&self, winner_id: ArenaTeamId, loser_id: ArenaTeamId) -> Result<()>;

    /// Flush a team to durable storage
    fn persist(&self, team_id: ArenaTeamId) -> Result<()>;
}

fn rated_pair(own: u32, other: u32, outcome: Outcomes) -> u32 {
    let (updated, _) = elo(
        &EloRating {
            rating: f64::from(own),
        },
        &EloRating {
            rating: f64::from(other),
        },
        &outcome,
        &EloConfig::new(),
    );
    updated.rating.max(0.0).round() as u32
}

/// In-memory arena team store
#[derive(Debug, Default)]
pub struct InMemoryArenaTeamStore {
    teams: RwLock<HashMap<ArenaTeamId, ArenaTeamRecord>>,
}

impl InMemoryArenaTeamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ArenaTeamRecord) {
        if let Ok(mut teams) = self.teams.write() {
            teams.insert(record.id, record);
        }
    }

    fn lose_against(&self, team_id: ArenaTeamId, opponent_mmr: u32) -> Result<()> {
        let mut teams = self
            .teams
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire arena team lock".to_string(),
            })?;
        let team = teams
            .get_mut(&team_id)
            .ok_or(MatchmakingError::ArenaTeamNotFound { team_id })?;
        team.rating = rated_pair(team.rating, opponent_mmr, Outcomes::LOSS);
        team.matchmaker_rating = rated_pair(team.matchmaker_rating, opponent_mmr, Outcomes::LOSS);
        team.losses += 1;
        Ok(())
    }
}

impl ArenaTeamStore for InMemoryArenaTeamStore {
    fn get_team(&self, team_id: ArenaTeamId) -> Option<ArenaTeamRecord> {
        self.teams
            .read()
            .ok()
            .and_then(|teams| teams.get(&team_id).cloned())
    }

    fn member_lost(
        &self,
        team_id: ArenaTeamId,
        guid: PlayerGuid,
        opponent_mmr: u32,
    ) -> Result<()> {
        debug!(
            "Arena team {} loses rating after member {} left an invited match",
            team_id, guid
        );
        self.lose_against(team_id, opponent_mmr)
    }

    fn offline_member_lost(
        &self,
        team_id: ArenaTeamId,
        guid: PlayerGuid,
        opponent_mmr: u32,
    ) -> Result<()> {
        debug!(
            "Arena team {} loses rating after offline member {} left an invited match",
            team_id, guid
        );
        self.lose_against(team_id, opponent_mmr)
    }

    fn apply_match_result(&self, winner_id: ArenaTeamId, loser_id: ArenaTeamId) -> Result<()> {
        let mut teams = self
            .teams
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire arena team lock".to_string(),
            })?;

        let winner_mmr = teams
            .get(&winner_id)
            .ok_or(MatchmakingError::ArenaTeamNotFound { team_id: winner_id })?
            .matchmaker_rating;
        let loser_mmr = teams
            .get(&loser_id)
            .ok_or(MatchmakingError::ArenaTeamNotFound { team_id: loser_id })?
            .matchmaker_rating;

        if let Some(winner) = teams.get_mut(&winner_id) {
            winner.rating = rated_pair(winner.rating, loser_mmr, Outcomes::WIN);
            winner.matchmaker_rating = rated_pair(winner.matchmaker_rating, loser_mmr, Outcomes::WIN);
            winner.wins += 1;
        }
        if let Some(loser) = teams.get_mut(&loser_id) {
            loser.rating = rated_pair(loser.rating, winner_mmr, Outcomes::LOSS);
            loser.matchmaker_rating = rated_pair(loser.matchmaker_rating, winner_mmr, Outcomes::LOSS);
            loser.losses += 1;
        }

        info!(
            "Applied rated result: team {} defeated team {}",
            winner_id, loser_id
        );
        Ok(())
    }

    fn persist(&self, team_id: ArenaTeamId) -> Result<()> {
        // In-memory store: nothing durable behind it.
        debug!("Persisted arena team {}", team_id);
        Ok(())
    }
}
