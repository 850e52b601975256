//! Live battleground instance lifecycle
//!
//! An instance moves through a strict one-way state machine:
//!
//! ```text
//! WaitQueue -> WaitJoin -> InProgress -> WaitLeave -> (removed)
//! ```
//!
//! The queue core invites players while the instance is in `WaitJoin` or
//! `InProgress`; confirmed players convert an invited slot into a playing
//! slot. Once a result is decided the instance lingers in `WaitLeave` for a
//! tear-down window, force-removing stragglers when it expires.

use crate::battleground::modes::ModeRules;
use crate::battleground::template::BattlegroundTemplate;
use crate::config::{InvitationPolicy, QueueSettings};
use crate::error::Result;
use crate::types::{ArenaTeamId, BracketId, Faction, InstanceId, PlayerGuid, QueueKey};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Join-wait countdown before battleground doors open, milliseconds
const BATTLEGROUND_START_DELAY_MS: i64 = 120_000;
/// Join-wait countdown before arena gates open, milliseconds
const ARENA_START_DELAY_MS: i64 = 60_000;
/// Countdown marks announced to players while doors are closed
const START_ANNOUNCE_STAGES_MS: [i64; 3] = [60_000, 30_000, 15_000];

/// Lifecycle state of a battleground instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BattlegroundStatus {
    /// Template placeholder, never joinable
    None,
    /// Freshly created, not yet opened for invitations
    WaitQueue,
    /// Invitations out, doors closed, start countdown running
    WaitJoin,
    /// Match running
    InProgress,
    /// Result decided, tear-down countdown running
    WaitLeave,
}

/// Final result of a decided match, handed back for rating application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub winner: Option<Faction>,
    pub rated: bool,
    /// True when no rating change may be applied (arena time limit, teardown)
    pub rating_void: bool,
    pub arena_team_ids: [ArenaTeamId; 2],
}

/// Side effects of one instance tick the manager must act on
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub ended: Option<MatchResult>,
    /// Players force-removed by the expired tear-down timer
    pub removed_players: Vec<(PlayerGuid, Faction)>,
    /// Instance is empty and should be dropped from the registry
    pub delete: bool,
}

/// One live battleground or arena match
#[derive(Debug)]
pub struct Battleground {
    instance_id: InstanceId,
    client_instance_id: u32,
    match_id: Uuid,
    key: QueueKey,
    bracket: BracketId,
    name: String,
    rated: bool,
    mode: ModeRules,
    min_players_per_team: u32,
    max_players_per_team: u32,

    status: BattlegroundStatus,
    start_delay_ms: i64,
    announce_stage: usize,
    elapsed_ms: u64,
    teardown_remaining_ms: i64,
    premature_remaining_ms: Option<i64>,

    invited: [u32; 2],
    players: HashMap<PlayerGuid, Faction>,
    arena_team_ids: [ArenaTeamId; 2],
    arena_matchmaker_ratings: [u32; 2],

    premature_finish_ms: u64,
    arena_time_limit_ms: u64,
    teardown_ms: u64,
}

impl Battleground {
    pub fn new(
        instance_id: InstanceId,
        client_instance_id: u32,
        template: &BattlegroundTemplate,
        key: QueueKey,
        bracket: BracketId,
        settings: &QueueSettings,
    ) -> Result<Battleground> {
        let arena = key.is_arena();
        let (min, max) = if arena {
            let size = u32::from(key.team_size);
            (if settings.arena_testing { 1 } else { size }, size)
        } else {
            let min = if settings.battleground_testing {
                1
            } else {
                template.min_players_per_team
            };
            (min, template.max_players_per_team)
        };

        let mode = template.mode();
        mode.setup(max)?;

        Ok(Battleground {
            instance_id,
            client_instance_id,
            match_id: Uuid::new_v4(),
            key,
            bracket,
            name: template.name.clone(),
            rated: key.rated,
            mode,
            min_players_per_team: min,
            max_players_per_team: max,
            status: BattlegroundStatus::WaitQueue,
            start_delay_ms: 0,
            announce_stage: 0,
            elapsed_ms: 0,
            teardown_remaining_ms: 0,
            premature_remaining_ms: None,
            invited: [0, 0],
            players: HashMap::new(),
            arena_team_ids: [0, 0],
            arena_matchmaker_ratings: [0, 0],
            premature_finish_ms: settings.premature_finish_ms,
            arena_time_limit_ms: settings.arena_time_limit_ms,
            teardown_ms: settings.teardown_ms,
        })
    }

    /// Open the instance for invitations and start the join countdown.
    pub fn open_for_join(&mut self) {
        debug_assert_eq!(self.status, BattlegroundStatus::WaitQueue);
        self.status = BattlegroundStatus::WaitJoin;
        self.start_delay_ms = if self.is_arena() {
            ARENA_START_DELAY_MS
        } else {
            BATTLEGROUND_START_DELAY_MS
        };
        info!(
            "{} instance {} ({}) opened for joining, doors in {}s",
            self.name,
            self.instance_id,
            self.match_id,
            self.start_delay_ms / 1000
        );
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn client_instance_id(&self) -> u32 {
        self.client_instance_id
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn key(&self) -> QueueKey {
        self.key
    }

    pub fn bracket(&self) -> BracketId {
        self.bracket
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> BattlegroundStatus {
        self.status
    }

    pub fn is_arena(&self) -> bool {
        self.key.is_arena()
    }

    pub fn is_rated(&self) -> bool {
        self.rated
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn min_players_per_team(&self) -> u32 {
        self.min_players_per_team
    }

    pub fn max_players_per_team(&self) -> u32 {
        self.max_players_per_team
    }

    pub fn invited_count(&self, team: Faction) -> u32 {
        self.invited[team.index()]
    }

    pub fn player_count(&self, team: Faction) -> u32 {
        self.players.values().filter(|t| **t == team).count() as u32
    }

    pub fn total_players(&self) -> usize {
        self.players.len()
    }

    pub fn increase_invited(&mut self, team: Faction) {
        self.invited[team.index()] += 1;
    }

    pub fn decrease_invited(&mut self, team: Faction) {
        self.invited[team.index()] = self.invited[team.index()].saturating_sub(1);
    }

    pub fn set_arena_team(&mut self, side: Faction, team_id: ArenaTeamId, matchmaker_rating: u32) {
        self.arena_team_ids[side.index()] = team_id;
        self.arena_matchmaker_ratings[side.index()] = matchmaker_rating;
    }

    pub fn arena_team_id(&self, side: Faction) -> ArenaTeamId {
        self.arena_team_ids[side.index()]
    }

    pub fn arena_matchmaker_rating(&self, side: Faction) -> u32 {
        self.arena_matchmaker_ratings[side.index()]
    }

    /// Number of players the queue may still invite for `team`.
    ///
    /// While the doors are closed and invitation balancing is off this is
    /// simply cap minus pending invites. Otherwise it is the minimum of three
    /// bounds: the invite parity difference, the remaining team cap, and the
    /// entered-player parity difference (with an allowance to reach the
    /// minimum while the team is below it).
    pub fn get_free_slots_for_team(&self, team: Faction, policy: InvitationPolicy) -> u32 {
        let this_invited = self.invited[team.index()];
        let other_invited = self.invited[team.opposite().index()];

        if self.status == BattlegroundStatus::WaitJoin && policy == InvitationPolicy::NoBalance {
            return self.max_players_per_team.saturating_sub(this_invited);
        }

        if self.status == BattlegroundStatus::WaitJoin
            || self.status == BattlegroundStatus::InProgress
        {
            let diff = if other_invited == this_invited {
                1
            } else {
                other_invited.saturating_sub(this_invited)
            };

            let diff2 = self.max_players_per_team.saturating_sub(this_invited);

            let this_players = self.player_count(team);
            let other_players = self.player_count(team.opposite());
            let diff3 = if other_players == this_players {
                1
            } else if other_players > this_players {
                other_players - this_players
            } else if this_invited <= self.min_players_per_team {
                self.min_players_per_team - this_invited + 1
            } else {
                0
            };

            return diff.min(diff2).min(diff3);
        }

        0
    }

    pub fn has_free_slots(&self, policy: InvitationPolicy) -> bool {
        self.get_free_slots_for_team(Faction::Alliance, policy) > 0
            || self.get_free_slots_for_team(Faction::Horde, policy) > 0
    }

    /// A confirmed invite: the player enters and its invited slot converts
    /// into a playing slot.
    pub fn add_player(&mut self, guid: PlayerGuid, team: Faction) {
        self.decrease_invited(team);
        self.players.insert(guid, team);
        debug!(
            "player {} entered {} instance {} for {}",
            guid, self.name, self.instance_id, team
        );
    }

    pub fn has_player(&self, guid: PlayerGuid) -> bool {
        self.players.contains_key(&guid)
    }

    pub fn player_team(&self, guid: PlayerGuid) -> Option<Faction> {
        self.players.get(&guid).copied()
    }

    /// Remove a playing member. An in-progress arena may be decided by the
    /// departure (win by forfeit).
    pub fn remove_player(&mut self, guid: PlayerGuid) -> Option<MatchResult> {
        let team = self.players.remove(&guid)?;
        self.mode.on_player_removed(guid);
        debug!(
            "player {} left {} instance {} ({})",
            guid, self.name, self.instance_id, team
        );

        if self.status == BattlegroundStatus::InProgress && self.invited == [0, 0] {
            if let Some(winner) = self.mode.check_win_conditions(self.alive_counts()) {
                return Some(self.end_match(Some(winner), false));
            }
        }
        None
    }

    pub fn handle_area_trigger(&self, guid: PlayerGuid, trigger: u32) {
        self.mode.on_area_trigger(guid, trigger);
    }

    fn alive_counts(&self) -> [u32; 2] {
        [
            self.player_count(Faction::Alliance),
            self.player_count(Faction::Horde),
        ]
    }

    /// Decide the match and start the tear-down countdown.
    pub fn end_match(&mut self, winner: Option<Faction>, rating_void: bool) -> MatchResult {
        self.status = BattlegroundStatus::WaitLeave;
        self.teardown_remaining_ms = self.teardown_ms as i64;
        match winner {
            Some(team) => info!(
                "{} instance {} ended, {} wins after {}s",
                self.name,
                self.instance_id,
                team,
                self.elapsed_ms / 1000
            ),
            None => info!(
                "{} instance {} ended with no winner after {}s",
                self.name,
                self.instance_id,
                self.elapsed_ms / 1000
            ),
        }
        MatchResult {
            winner,
            rated: self.rated,
            rating_void,
            arena_team_ids: self.arena_team_ids,
        }
    }

    /// Administrative teardown: decide nothing and evict everyone on the
    /// next tick.
    pub fn end_now(&mut self) -> MatchResult {
        let result = self.end_match(None, true);
        self.teardown_remaining_ms = 0;
        result
    }

    /// Advance the lifecycle by `diff_ms` of wall time.
    pub fn update(&mut self, diff_ms: u64) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        match self.status {
            BattlegroundStatus::None | BattlegroundStatus::WaitQueue => {}
            BattlegroundStatus::WaitJoin => self.tick_start_countdown(diff_ms, &mut outcome),
            BattlegroundStatus::InProgress => self.tick_in_progress(diff_ms, &mut outcome),
            BattlegroundStatus::WaitLeave => self.tick_teardown(diff_ms, &mut outcome),
        }

        if self.status > BattlegroundStatus::WaitQueue
            && self.players.is_empty()
            && self.invited == [0, 0]
        {
            outcome.delete = true;
        }
        outcome
    }

    fn tick_start_countdown(&mut self, diff_ms: u64, outcome: &mut UpdateOutcome) {
        self.start_delay_ms -= diff_ms as i64;

        while self.announce_stage < START_ANNOUNCE_STAGES_MS.len()
            && self.start_delay_ms <= START_ANNOUNCE_STAGES_MS[self.announce_stage]
        {
            info!(
                "{} instance {}: doors open in {}s",
                self.name,
                self.instance_id,
                START_ANNOUNCE_STAGES_MS[self.announce_stage] / 1000
            );
            self.announce_stage += 1;
        }

        if self.start_delay_ms <= 0 {
            self.status = BattlegroundStatus::InProgress;
            info!("{} instance {}: match started", self.name, self.instance_id);

            // An arena side that never showed up forfeits at the gate.
            if self.is_arena() && self.invited == [0, 0] {
                if let Some(winner) = self.mode.check_win_conditions(self.alive_counts()) {
                    outcome.ended = Some(self.end_match(Some(winner), false));
                }
            }
        }
    }

    fn tick_in_progress(&mut self, diff_ms: u64, outcome: &mut UpdateOutcome) {
        self.elapsed_ms += diff_ms;

        if self.is_arena() {
            if self.arena_time_limit_ms > 0 && self.elapsed_ms >= self.arena_time_limit_ms {
                outcome.ended = Some(self.end_match(None, true));
            }
            return;
        }

        let [alliance, horde] = self.alive_counts();
        let underpopulated =
            alliance < self.min_players_per_team || horde < self.min_players_per_team;
        if !underpopulated {
            self.premature_remaining_ms = None;
            return;
        }
        if self.premature_finish_ms == 0 {
            return;
        }

        let remaining = self
            .premature_remaining_ms
            .get_or_insert(self.premature_finish_ms as i64);
        *remaining -= diff_ms as i64;
        if *remaining <= 0 {
            let winner = match (
                alliance >= self.min_players_per_team,
                horde >= self.min_players_per_team,
            ) {
                (true, false) => Some(Faction::Alliance),
                (false, true) => Some(Faction::Horde),
                _ => None,
            };
            outcome.ended = Some(self.end_match(winner, false));
        }
    }

    fn tick_teardown(&mut self, diff_ms: u64, outcome: &mut UpdateOutcome) {
        self.teardown_remaining_ms -= diff_ms as i64;
        if self.teardown_remaining_ms <= 0 && !self.players.is_empty() {
            info!(
                "{} instance {}: tear-down expired, removing {} players",
                self.name,
                self.instance_id,
                self.players.len()
            );
            outcome.removed_players = self.players.drain().collect();
        }
    }
}
