//! Core matching engine for one queue
//!
//! A [`BattlegroundQueue`] owns every queued group for one
//! [`QueueKey`], bucketed per bracket into four ordered lanes. A matching
//! pass runs the policies in a fixed order: fill running instances, pair
//! premades, form normal matches (with the same-faction skirmish fallback),
//! or pair rated arena teams by rating window.
//!
//! Invitations are tracked with `(player, instance, remove-deadline)` tokens;
//! timer events re-validate the token before acting, so stale reminders and
//! removals are harmless no-ops.

use crate::battleground::{
    Battleground, BattlegroundRegistry, BattlegroundStatus, BattlegroundTemplate,
    TemplateProvider,
};
use crate::config::{AppConfig, InvitationPolicy};
use crate::error::{MatchmakingError, Result};
use crate::notify::{NotificationSink, QueueStatus};
use crate::queue::entry::{
    GroupId, GroupQueueInfo, Invite, PlayerQueueInfo, QueueLane, LANE_COUNT,
};
use crate::queue::events::{InviteEvent, InviteEventKind, InviteEventQueue};
use crate::queue::selection::SelectionPool;
use crate::queue::wait_time::WaitTimeTracker;
use crate::queue::{QueueUpdateRequest, UpdateScheduler};
use crate::rating::ArenaTeamStore;
use crate::session::SessionProvider;
use crate::types::{
    ArenaTeamId, BracketId, Faction, InstanceId, JoinFailReason, JoinedPlayer, PlayerGuid,
    QueueKey,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on kick/re-add iterations while evening out a fill pass
const BALANCE_ITERATION_LIMIT: u32 = 64;

/// One join request as the queue core consumes it
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub members: Vec<JoinedPlayer>,
    pub team: Faction,
    pub bracket: BracketId,
    pub premade: bool,
    pub rated: bool,
    pub arena_team_id: ArenaTeamId,
    pub arena_team_rating: u32,
    pub arena_matchmaker_rating: u32,
}

/// What a single matching pass produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatchingPassOutcome {
    pub instances_created: u32,
    pub players_invited: u32,
}

/// Side effects of removing one player from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub bracket: BracketId,
    /// Instance the player held an invitation to, if any
    pub was_invited: Option<InstanceId>,
    /// Rated teammates evicted alongside the leaver
    pub evicted: Vec<PlayerGuid>,
}

/// All queued state for one (queue key) worth of matchmaking
pub struct BattlegroundQueue {
    key: QueueKey,
    config: Arc<AppConfig>,
    notifier: Arc<dyn NotificationSink>,
    sessions: Arc<dyn SessionProvider>,
    arena_teams: Arc<dyn ArenaTeamStore>,
    templates: Arc<dyn TemplateProvider>,

    groups: HashMap<GroupId, GroupQueueInfo>,
    next_group_id: u64,
    /// Four ordered lanes per bracket, oldest entries at the front
    buckets: HashMap<BracketId, [VecDeque<GroupId>; LANE_COUNT]>,
    /// Guid -> owning group, for O(1) player lookups
    players: HashMap<PlayerGuid, GroupId>,
    wait_times: WaitTimeTracker,
    events: InviteEventQueue,
}

impl BattlegroundQueue {
    pub fn new(
        key: QueueKey,
        config: Arc<AppConfig>,
        notifier: Arc<dyn NotificationSink>,
        sessions: Arc<dyn SessionProvider>,
        arena_teams: Arc<dyn ArenaTeamStore>,
        templates: Arc<dyn TemplateProvider>,
    ) -> Self {
        Self {
            key,
            config,
            notifier,
            sessions,
            arena_teams,
            templates,
            groups: HashMap::new(),
            next_group_id: 1,
            buckets: HashMap::new(),
            players: HashMap::new(),
            wait_times: WaitTimeTracker::new(),
            events: InviteEventQueue::new(),
        }
    }

    pub fn key(&self) -> QueueKey {
        self.key
    }

    pub fn is_queued(&self, guid: PlayerGuid) -> bool {
        self.players.contains_key(&guid)
    }

    pub fn group_info(&self, guid: PlayerGuid) -> Option<&GroupQueueInfo> {
        self.players.get(&guid).and_then(|id| self.groups.get(id))
    }

    pub fn queued_player_count(&self) -> usize {
        self.players.len()
    }

    pub fn brackets(&self) -> Vec<BracketId> {
        self.buckets.keys().copied().collect()
    }

    pub fn lane_len(&self, bracket: BracketId, lane: QueueLane) -> usize {
        self.buckets
            .get(&bracket)
            .map(|lanes| lanes[lane.index()].len())
            .unwrap_or(0)
    }

    pub fn average_wait(&self, team: Faction, bracket: BracketId) -> chrono::Duration {
        self.wait_times.average(team, bracket)
    }

    /// Token check used by timer events and the port handler: the player must
    /// still hold exactly this invitation.
    pub fn is_player_invited(
        &self,
        guid: PlayerGuid,
        instance_id: InstanceId,
        remove_at: DateTime<Utc>,
    ) -> bool {
        self.group_info(guid)
            .map(|group| {
                group.invite
                    == Some(Invite {
                        instance_id,
                        remove_at,
                    })
            })
            .unwrap_or(false)
    }

    /// Enqueue one group as a new entry at the back of its lane.
    pub fn add_group(&mut self, request: EnqueueRequest, now: DateTime<Utc>) -> Result<GroupId> {
        if request.members.is_empty() {
            return Err(MatchmakingError::InternalError {
                message: "refusing to queue an empty group".to_string(),
            }
            .into());
        }
        for member in &request.members {
            if self.players.contains_key(&member.guid) {
                return Err(MatchmakingError::InvalidJoinRequest {
                    reason: JoinFailReason::TooManyQueues,
                }
                .into());
            }
        }

        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        let group = GroupQueueInfo {
            id,
            team: request.team,
            bracket: request.bracket,
            premade: request.premade,
            rated: request.rated,
            arena_team_id: request.arena_team_id,
            arena_team_rating: request.arena_team_rating,
            arena_matchmaker_rating: request.arena_matchmaker_rating,
            opponent_team_rating: 0,
            opponent_matchmaker_rating: 0,
            join_time: now,
            invite: None,
            members: request
                .members
                .iter()
                .map(|member| {
                    (
                        member.guid,
                        PlayerQueueInfo {
                            last_online: member.last_online,
                        },
                    )
                })
                .collect(),
        };

        // rated entries always queue as premades
        let lane = QueueLane::of(request.premade || request.rated, request.team);
        self.buckets.entry(request.bracket).or_default()[lane.index()].push_back(id);
        for member in &request.members {
            self.players.insert(member.guid, id);
        }
        debug!(
            "queued group {} in {} ({} players, {}, bracket {:?})",
            id,
            self.key,
            group.size(),
            group.team,
            request.bracket
        );
        self.groups.insert(id, group);
        self.announce(request.bracket);
        Ok(id)
    }

    fn announce(&self, bracket: BracketId) {
        if !self.config.queue.queue_announcer || self.key.is_arena() {
            return;
        }
        let Some(template) = self.templates.template(self.key.list_id) else {
            return;
        };
        let Some(lanes) = self.buckets.get(&bracket) else {
            return;
        };
        let waiting = |team: Faction| -> usize {
            [QueueLane::premade(team), QueueLane::normal(team)]
                .iter()
                .flat_map(|lane| lanes[lane.index()].iter())
                .filter_map(|id| self.groups.get(id))
                .filter(|group| !group.is_invited())
                .map(GroupQueueInfo::size)
                .sum()
        };
        info!(
            "{}: {} Alliance / {} Horde waiting in bracket {:?} ({} needed per side)",
            template.name,
            waiting(Faction::Alliance),
            waiting(Faction::Horde),
            bracket,
            template.min_players_per_team
        );
    }

    /// Remove one player. Leaving an invited rated match costs the arena
    /// team rating; leaving an uninvited rated entry evicts the whole team.
    pub fn remove_player(
        &mut self,
        guid: PlayerGuid,
        decrease_invited: bool,
        registry: &BattlegroundRegistry,
    ) -> Result<RemovalOutcome> {
        let group_id = *self
            .players
            .get(&guid)
            .ok_or(MatchmakingError::PlayerNotQueued { guid })?;
        let (bracket, team, rated, invite, opponent_mmr, arena_team_id) = {
            let group = self.groups.get(&group_id).ok_or_else(|| {
                MatchmakingError::InternalError {
                    message: format!("queue index points at missing group {}", group_id),
                }
            })?;
            (
                group.bracket,
                group.team,
                group.rated,
                group.invite,
                group.opponent_matchmaker_rating,
                group.arena_team_id,
            )
        };

        if decrease_invited {
            if let Some(invite) = invite {
                if let Some(shared) = registry.get(invite.instance_id) {
                    shared
                        .lock()
                        .map_err(|_| lock_poisoned("instance"))?
                        .decrease_invited(team);
                }
            }
        }

        // abandoning an invited rated match is a recorded loss against the
        // paired opponent's matchmaker rating
        if rated && invite.is_some() && decrease_invited {
            if self.sessions.is_online(guid) {
                self.arena_teams
                    .member_lost(arena_team_id, guid, opponent_mmr)?;
            } else {
                self.arena_teams
                    .offline_member_lost(arena_team_id, guid, opponent_mmr)?;
            }
            self.arena_teams.persist(arena_team_id)?;
        }

        self.players.remove(&guid);
        let empty = {
            let group = self.groups.get_mut(&group_id).ok_or_else(|| {
                MatchmakingError::InternalError {
                    message: format!("group {} vanished during removal", group_id),
                }
            })?;
            group.members.remove(&guid);
            group.members.is_empty()
        };

        // a rated team still waiting to be paired is atomic: one leaver
        // evicts the rest
        let evicted: Vec<PlayerGuid> = if !empty && rated && invite.is_none() {
            let remaining = {
                let group = self.groups.get_mut(&group_id).ok_or_else(|| {
                    MatchmakingError::InternalError {
                        message: format!("group {} vanished during eviction", group_id),
                    }
                })?;
                let remaining: Vec<PlayerGuid> = group.members.keys().copied().collect();
                group.members.clear();
                remaining
            };
            for other in &remaining {
                self.players.remove(other);
                self.notifier
                    .notify(*other, QueueStatus::None { key: self.key });
            }
            remaining
        } else {
            Vec::new()
        };

        if empty || !evicted.is_empty() {
            if let Some((lane_idx, pos)) = self.lane_position(bracket, group_id) {
                if let Some(lanes) = self.buckets.get_mut(&bracket) {
                    lanes[lane_idx].remove(pos);
                }
            }
            self.groups.remove(&group_id);
        }

        debug!(
            "removed player {} from {} (invited: {}, evicted {} teammates)",
            guid,
            self.key,
            invite.is_some(),
            evicted.len()
        );
        Ok(RemovalOutcome {
            bracket,
            was_invited: invite.map(|invite| invite.instance_id),
            evicted,
        })
    }

    fn lane_position(&self, bracket: BracketId, group_id: GroupId) -> Option<(usize, usize)> {
        let lanes = self.buckets.get(&bracket)?;
        for (lane_idx, lane) in lanes.iter().enumerate() {
            if let Some(pos) = lane.iter().position(|id| *id == group_id) {
                return Some((lane_idx, pos));
            }
        }
        None
    }

    /// Invite one group to an instance. Returns the number of players
    /// actually invited (offline members are skipped); zero means the group
    /// was already invited elsewhere.
    fn invite_group(
        &mut self,
        group_id: GroupId,
        bg: &mut Battleground,
        side: Option<Faction>,
        now: DateTime<Utc>,
    ) -> u32 {
        let accept_wait = self.config.invite_accept_wait();
        let reminder_lead = self.config.invite_reminder_lead();
        let instance_id = bg.instance_id();
        let remove_at = now + accept_wait;

        let (team, bracket, waited, members) = {
            let Some(group) = self.groups.get_mut(&group_id) else {
                return 0;
            };
            if group.is_invited() {
                return 0;
            }
            if let Some(team) = side {
                group.team = team;
            }
            group.invite = Some(Invite {
                instance_id,
                remove_at,
            });
            (
                group.team,
                group.bracket,
                now - group.join_time,
                group.members.keys().copied().collect::<Vec<_>>(),
            )
        };

        let mut invited = 0;
        for guid in members {
            if !self.sessions.is_online(guid) {
                continue;
            }
            self.wait_times.record(team, bracket, waited);
            bg.increase_invited(team);
            self.events.schedule(InviteEvent {
                fire_at: now + reminder_lead,
                kind: InviteEventKind::Reminder,
                guid,
                instance_id,
                remove_at,
            });
            self.events.schedule(InviteEvent {
                fire_at: remove_at,
                kind: InviteEventKind::Removal,
                guid,
                instance_id,
                remove_at,
            });
            self.notifier.notify(
                guid,
                QueueStatus::NeedConfirmation {
                    key: self.key,
                    instance_id,
                    timeout: accept_wait,
                },
            );
            debug!(
                "invited player {} to instance {} ({})",
                guid, instance_id, team
            );
            invited += 1;
        }
        invited
    }

    fn invite_pool(
        &mut self,
        pool: &SelectionPool,
        bg: &mut Battleground,
        now: DateTime<Utc>,
    ) -> u32 {
        pool.groups()
            .iter()
            .map(|(id, _)| self.invite_group(*id, bg, None, now))
            .sum()
    }

    /// Drain due invite timer events: resend reminders, force-remove players
    /// who never confirmed. Stale tokens are skipped.
    pub fn drive_events(
        &mut self,
        now: DateTime<Utc>,
        registry: &BattlegroundRegistry,
        scheduler: &UpdateScheduler,
    ) -> Result<u32> {
        let mut removed = 0;
        while let Some(event) = self.events.next_due(now) {
            if !self.is_player_invited(event.guid, event.instance_id, event.remove_at) {
                continue;
            }
            match event.kind {
                InviteEventKind::Reminder => {
                    if !self.sessions.is_online(event.guid) {
                        continue;
                    }
                    self.notifier.notify(
                        event.guid,
                        QueueStatus::NeedConfirmation {
                            key: self.key,
                            instance_id: event.instance_id,
                            timeout: event.remove_at - now,
                        },
                    );
                }
                InviteEventKind::Removal => {
                    let outcome = self.remove_player(event.guid, true, registry)?;
                    self.notifier
                        .notify(event.guid, QueueStatus::None { key: self.key });
                    removed += 1;
                    info!(
                        "player {} missed the invite to instance {}",
                        event.guid, event.instance_id
                    );

                    // the abandoned slot may be fillable from the queue
                    let still_forming = registry
                        .get(event.instance_id)
                        .and_then(|shared| {
                            shared
                                .lock()
                                .ok()
                                .map(|bg| bg.status() != BattlegroundStatus::WaitLeave)
                        })
                        .unwrap_or(false);
                    if still_forming {
                        scheduler.schedule(QueueUpdateRequest {
                            rating_hint: 0,
                            key: self.key,
                            bracket: outcome.bracket,
                        });
                    }
                }
            }
        }
        Ok(removed)
    }

    fn team_bounds(&self, template: &BattlegroundTemplate) -> (u32, u32) {
        if self.key.is_arena() {
            let size = u32::from(self.key.team_size).max(1);
            let min = if self.config.queue.arena_testing { 1 } else { size };
            (min, size)
        } else {
            let min = if self.config.queue.battleground_testing {
                1
            } else {
                template.min_players_per_team
            };
            (min, template.max_players_per_team)
        }
    }

    /// Run one matching pass for a bracket.
    pub fn update(
        &mut self,
        now: DateTime<Utc>,
        bracket: BracketId,
        rating_hint: u32,
        registry: &BattlegroundRegistry,
    ) -> Result<MatchingPassOutcome> {
        let mut outcome = MatchingPassOutcome::default();
        let nothing_queued = self
            .buckets
            .get(&bracket)
            .map(|lanes| lanes.iter().all(VecDeque::is_empty))
            .unwrap_or(true);
        if nothing_queued {
            return Ok(outcome);
        }

        let policy = self.config.queue.invitation_policy;

        // fill running battlegrounds before considering new ones; arena
        // teams are fixed once invited
        if !self.key.is_arena() {
            for (instance_id, shared) in registry.free_slot_instances(self.key) {
                let mut bg = shared.lock().map_err(|_| lock_poisoned("instance"))?;
                if bg.bracket() != bracket
                    || !matches!(
                        bg.status(),
                        BattlegroundStatus::WaitJoin | BattlegroundStatus::InProgress
                    )
                {
                    continue;
                }
                let free = [
                    bg.get_free_slots_for_team(Faction::Alliance, policy),
                    bg.get_free_slots_for_team(Faction::Horde, policy),
                ];
                if free == [0, 0] {
                    continue;
                }
                let mut pools = [SelectionPool::new(), SelectionPool::new()];
                self.fill_players_to_bg(&mut pools, bracket, free);
                for pool in &pools {
                    outcome.players_invited += self.invite_pool(pool, &mut bg, now);
                }
                if !bg.has_free_slots(policy) {
                    registry.unregister_free_slots(self.key, instance_id)?;
                }
            }
        }

        let template =
            self.templates
                .template(self.key.list_id)
                .ok_or(MatchmakingError::TemplateNotFound {
                    list_id: self.key.list_id,
                })?;
        let (min_players, max_players) = self.team_bounds(&template);

        // premade pairing only applies to battlegrounds; lane heads that
        // waited too long or fell below the minimum demote first
        if !self.key.is_arena() {
            self.demote_stale_premades(now, bracket, min_players);
            let mut pools = [SelectionPool::new(), SelectionPool::new()];
            if self.check_premade_match(&mut pools, bracket, min_players, max_players) {
                if let Some(invited) =
                    self.start_instance(&template, bracket, &pools, registry, now)?
                {
                    outcome.instances_created += 1;
                    outcome.players_invited += invited;
                }
            }
        }

        if !self.key.rated {
            let mut pools = [SelectionPool::new(), SelectionPool::new()];
            let matched = self.check_normal_match(&mut pools, bracket, min_players, max_players)
                || (self.key.is_arena()
                    && self.check_skirmish_for_same_faction(&mut pools, bracket, min_players));
            if matched {
                if let Some(invited) =
                    self.start_instance(&template, bracket, &pools, registry, now)?
                {
                    outcome.instances_created += 1;
                    outcome.players_invited += invited;
                }
            }
        } else {
            self.update_rated(now, bracket, rating_hint, &template, registry, &mut outcome)?;
        }

        Ok(outcome)
    }

    /// Create an instance, invite both pools and open it for backfilling.
    /// Creation failure is logged and retried on a later pass.
    fn start_instance(
        &mut self,
        template: &BattlegroundTemplate,
        bracket: BracketId,
        pools: &[SelectionPool; 2],
        registry: &BattlegroundRegistry,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let (instance_id, shared) =
            match registry.create_instance(template, self.key, bracket, &self.config.queue) {
                Ok(created) => created,
                Err(error) => {
                    warn!(
                        "could not create {} instance for {}: {:#}",
                        template.name, self.key, error
                    );
                    return Ok(None);
                }
            };

        let mut invited = 0;
        {
            let mut bg = shared.lock().map_err(|_| lock_poisoned("instance"))?;
            for pool in pools {
                invited += self.invite_pool(pool, &mut bg, now);
            }
        }
        if !self.key.is_arena() {
            registry.register_free_slots(self.key, instance_id)?;
        }
        info!(
            "started {} instance {} with {} invited players",
            template.name, instance_id, invited
        );
        Ok(Some(invited))
    }

    /// Stage groups from the normal lanes up to the per-side free slots,
    /// then (under the `Even` policy) kick and re-add groups until residual
    /// capacity differs by at most one.
    fn fill_players_to_bg(
        &self,
        pools: &mut [SelectionPool; 2],
        bracket: BracketId,
        free: [u32; 2],
    ) {
        let Some(lanes) = self.buckets.get(&bracket) else {
            return;
        };
        for side in 0..2 {
            let lane = &lanes[QueueLane::normal(Faction::from_index(side)).index()];
            for id in lane {
                let Some(group) = self.groups.get(id) else {
                    continue;
                };
                if !pools[side].add_group(group, free[side]) {
                    break;
                }
            }
        }

        if self.config.queue.invitation_policy == InvitationPolicy::NoBalance {
            return;
        }

        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations > BALANCE_ITERATION_LIMIT {
                break;
            }
            let residual_a = i64::from(free[0]) - i64::from(pools[0].player_count());
            let residual_h = i64::from(free[1]) - i64::from(pools[1].player_count());
            if (residual_a - residual_h).abs() <= 1 {
                break;
            }

            let (side, imbalance) = if residual_a < residual_h {
                (0usize, (residual_h - residual_a) as usize)
            } else {
                (1usize, (residual_a - residual_h) as usize)
            };
            if pools[side].group_count() == 0 {
                break;
            }

            let before = pools[side].player_count();
            let kicked_small = pools[side].kick_group(imbalance);
            if !kicked_small {
                // overshot: refill from later entries under a tighter cap
                let target = before.saturating_sub(imbalance as u32).min(free[side]);
                let lane = &lanes[QueueLane::normal(Faction::from_index(side)).index()];
                for id in lane {
                    if pools[side].contains(*id) {
                        continue;
                    }
                    let Some(group) = self.groups.get(id) else {
                        continue;
                    };
                    if !pools[side].add_group(group, target) {
                        break;
                    }
                }
            }
        }
    }

    /// Pair the first uninvited premade of each faction, topping the smaller
    /// side off from the normal lanes. Premades below the per-team minimum
    /// never anchor a match; they wait for demotion instead.
    fn check_premade_match(
        &self,
        pools: &mut [SelectionPool; 2],
        bracket: BracketId,
        min_players: u32,
        max_players: u32,
    ) -> bool {
        let Some(lanes) = self.buckets.get(&bracket) else {
            return false;
        };

        let head = |lane: QueueLane| -> Option<&GroupQueueInfo> {
            lanes[lane.index()]
                .iter()
                .filter_map(|id| self.groups.get(id))
                .find(|group| !group.is_invited() && group.size() as u32 >= min_players)
        };
        let (Some(alliance), Some(horde)) = (
            head(QueueLane::PremadeAlliance),
            head(QueueLane::PremadeHorde),
        ) else {
            return false;
        };

        pools[0].add_group(alliance, max_players);
        pools[1].add_group(horde, max_players);

        // top off from the normal lanes up to the smaller premade's size
        let desired = pools[0].player_count().min(pools[1].player_count());
        for side in 0..2 {
            let lane = &lanes[QueueLane::normal(Faction::from_index(side)).index()];
            for id in lane {
                let Some(group) = self.groups.get(id) else {
                    continue;
                };
                if group.is_invited() {
                    continue;
                }
                if !pools[side].add_group(group, desired) {
                    break;
                }
            }
        }
        true
    }

    /// Move a premade lane head into the normal lane when it waited too long
    /// or shrank below the per-team minimum.
    fn demote_stale_premades(&mut self, now: DateTime<Utc>, bracket: BracketId, min_players: u32) {
        let cutoff = now - self.config.premade_wait_timer();
        for team in [Faction::Alliance, Faction::Horde] {
            let premade_idx = QueueLane::premade(team).index();
            let normal_idx = QueueLane::normal(team).index();

            let demote = {
                let Some(lanes) = self.buckets.get(&bracket) else {
                    return;
                };
                lanes[premade_idx]
                    .front()
                    .and_then(|id| self.groups.get(id))
                    .map(|group| {
                        !group.is_invited()
                            && (group.join_time < cutoff || (group.size() as u32) < min_players)
                    })
                    .unwrap_or(false)
            };
            if !demote {
                continue;
            }
            if let Some(lanes) = self.buckets.get_mut(&bracket) {
                if let Some(id) = lanes[premade_idx].pop_front() {
                    lanes[normal_idx].push_front(id);
                    debug!("demoted premade group {} to the normal lane", id);
                }
            }
        }
    }

    /// Form a match purely from the normal lanes. Both sides must reach the
    /// minimum and the final imbalance may not exceed two players.
    fn check_normal_match(
        &self,
        pools: &mut [SelectionPool; 2],
        bracket: BracketId,
        min_players: u32,
        max_players: u32,
    ) -> bool {
        let Some(lanes) = self.buckets.get(&bracket) else {
            return false;
        };

        let mut resume = [0usize; 2];
        for side in 0..2 {
            let lane = &lanes[QueueLane::normal(Faction::from_index(side)).index()];
            for (pos, id) in lane.iter().enumerate() {
                resume[side] = pos + 1;
                let Some(group) = self.groups.get(id) else {
                    continue;
                };
                if group.is_invited() {
                    continue;
                }
                pools[side].add_group(group, max_players);
                if pools[side].player_count() >= min_players {
                    break;
                }
            }
        }

        let testing = if self.key.is_arena() {
            self.config.queue.arena_testing
        } else {
            self.config.queue.battleground_testing
        };
        if testing && (pools[0].player_count() > 0 || pools[1].player_count() > 0) {
            return true;
        }

        if pools[0].player_count() >= min_players && pools[1].player_count() >= min_players {
            // extend the smaller side up to the larger side's count
            let smaller = if pools[1].player_count() < pools[0].player_count() {
                1
            } else {
                0
            };
            let cap = pools[1 - smaller].player_count();
            let lane = &lanes[QueueLane::normal(Faction::from_index(smaller)).index()];
            for id in lane.iter().skip(resume[smaller]) {
                let Some(group) = self.groups.get(id) else {
                    continue;
                };
                if group.is_invited() {
                    continue;
                }
                if !pools[smaller].add_group(group, cap) {
                    break;
                }
            }
            if pools[0].player_count().abs_diff(pools[1].player_count()) > 2 {
                return false;
            }
        }

        pools[0].player_count() >= min_players && pools[1].player_count() >= min_players
    }

    /// Skirmish fallback: when exactly one faction filled its side, relabel
    /// later-queued groups of the same faction to the opposite side.
    fn check_skirmish_for_same_faction(
        &mut self,
        pools: &mut [SelectionPool; 2],
        bracket: BracketId,
        min_players: u32,
    ) -> bool {
        if pools[0].player_count() < min_players && pools[1].player_count() < min_players {
            return false;
        }
        let keep = if pools[1].player_count() >= min_players {
            1usize
        } else {
            0usize
        };
        let other = 1 - keep;
        let keep_team = Faction::from_index(keep);
        let other_team = keep_team.opposite();
        pools[other].clear();

        let Some(last_selected) = pools[keep].last() else {
            return false;
        };
        let keep_lane_idx = QueueLane::normal(keep_team).index();

        // stage same-faction groups queued after the last selected one
        {
            let Some(lanes) = self.buckets.get(&bracket) else {
                return false;
            };
            let lane = &lanes[keep_lane_idx];
            let Some(start) = lane.iter().position(|id| *id == last_selected) else {
                return false;
            };
            for id in lane.iter().skip(start + 1) {
                let Some(group) = self.groups.get(id) else {
                    continue;
                };
                if group.is_invited() {
                    continue;
                }
                if !pools[other].add_group(group, min_players) {
                    break;
                }
            }
        }
        if pools[other].player_count() != min_players {
            return false;
        }

        // relabel the staged groups and move them to the opposite lane
        let moved: Vec<GroupId> = pools[other].groups().iter().map(|(id, _)| *id).collect();
        for id in &moved {
            if let Some(group) = self.groups.get_mut(id) {
                group.team = other_team;
            }
        }
        let other_lane_idx = QueueLane::normal(other_team).index();
        if let Some(lanes) = self.buckets.get_mut(&bracket) {
            for id in &moved {
                if let Some(pos) = lanes[keep_lane_idx].iter().position(|queued| queued == id) {
                    lanes[keep_lane_idx].remove(pos);
                }
                lanes[other_lane_idx].push_front(*id);
            }
        }
        info!(
            "relabeled {} same-faction groups to {} for a skirmish",
            moved.len(),
            other_team
        );
        true
    }

    /// Rated arena pairing: pick a target rating, then find two uninvited
    /// teams with distinct arena team ids inside the rating window. Entries
    /// older than the discard timer bypass the window, and an old reference
    /// team waives the window for its opponent.
    fn update_rated(
        &mut self,
        now: DateTime<Utc>,
        bracket: BracketId,
        rating_hint: u32,
        template: &BattlegroundTemplate,
        registry: &BattlegroundRegistry,
        outcome: &mut MatchingPassOutcome,
    ) -> Result<()> {
        let max_diff = self.config.queue.max_rating_difference;
        let discard_cutoff = now - self.config.rating_discard_timer();
        let premade_lanes = [
            QueueLane::PremadeAlliance.index(),
            QueueLane::PremadeHorde.index(),
        ];

        let (target_rating, reference_old) = if rating_hint > 0 {
            (rating_hint, false)
        } else {
            let Some(lanes) = self.buckets.get(&bracket) else {
                return Ok(());
            };
            let front =
                |idx: usize| lanes[idx].front().and_then(|id| self.groups.get(id));
            let reference = match (front(premade_lanes[0]), front(premade_lanes[1])) {
                (Some(alliance), Some(horde)) => Some(if alliance.join_time <= horde.join_time {
                    alliance
                } else {
                    horde
                }),
                (Some(alliance), None) => Some(alliance),
                (None, Some(horde)) => Some(horde),
                (None, None) => None,
            };
            match reference {
                Some(group) => (
                    group.arena_matchmaker_rating,
                    group.join_time < discard_cutoff,
                ),
                None => return Ok(()),
            }
        };

        let in_window = |mmr: u32| {
            max_diff == 0
                || (mmr.saturating_add(max_diff) >= target_rating
                    && mmr <= target_rating.saturating_add(max_diff))
        };

        let mut found: Vec<GroupId> = Vec::new();
        {
            let Some(lanes) = self.buckets.get(&bracket) else {
                return Ok(());
            };
            let eligible = |group: &GroupQueueInfo| {
                !group.is_invited()
                    && (in_window(group.arena_matchmaker_rating)
                        || group.join_time < discard_cutoff
                        || reference_old)
            };

            let mut first_lane = premade_lanes[0];
            let mut first_pos = 0;
            let mut first_team = 0;
            for lane_idx in premade_lanes {
                let hit = lanes[lane_idx].iter().enumerate().find(|(_, id)| {
                    self.groups
                        .get(*id)
                        .map(|group| {
                            eligible(group)
                                && (found.is_empty() || group.arena_team_id != first_team)
                        })
                        .unwrap_or(false)
                });
                if let Some((pos, id)) = hit {
                    if found.is_empty() {
                        first_lane = lane_idx;
                        first_pos = pos;
                        first_team = self
                            .groups
                            .get(id)
                            .map(|group| group.arena_team_id)
                            .unwrap_or(0);
                    }
                    found.push(*id);
                    if found.len() == 2 {
                        break;
                    }
                }
            }

            // only one team so far: look deeper in its own lane for an
            // opponent from a different arena team
            if found.len() == 1 {
                let second = lanes[first_lane].iter().skip(first_pos + 1).find(|id| {
                    self.groups
                        .get(*id)
                        .map(|group| eligible(group) && group.arena_team_id != first_team)
                        .unwrap_or(false)
                });
                if let Some(id) = second {
                    found.push(*id);
                }
            }
        }
        if found.len() < 2 {
            return Ok(());
        }
        let (first, second) = (found[0], found[1]);

        let (instance_id, shared) =
            match registry.create_instance(template, self.key, bracket, &self.config.queue) {
                Ok(created) => created,
                Err(error) => {
                    warn!(
                        "could not create rated {} instance for {}: {:#}",
                        template.name, self.key, error
                    );
                    return Ok(());
                }
            };

        let snapshot = |groups: &HashMap<GroupId, GroupQueueInfo>, id: GroupId| {
            groups.get(&id).map(|group| {
                (
                    group.arena_team_id,
                    group.arena_team_rating,
                    group.arena_matchmaker_rating,
                )
            })
        };
        let Some((first_tid, first_rating, first_mmr)) = snapshot(&self.groups, first) else {
            return Ok(());
        };
        let Some((second_tid, second_rating, second_mmr)) = snapshot(&self.groups, second) else {
            return Ok(());
        };

        if let Some(group) = self.groups.get_mut(&first) {
            group.opponent_team_rating = second_rating;
            group.opponent_matchmaker_rating = second_mmr;
        }
        if let Some(group) = self.groups.get_mut(&second) {
            group.opponent_team_rating = first_rating;
            group.opponent_matchmaker_rating = first_mmr;
        }

        // the pair ports as opposing factions regardless of where it queued
        self.force_lane(bracket, first, Faction::Alliance);
        self.force_lane(bracket, second, Faction::Horde);

        {
            let mut bg = shared.lock().map_err(|_| lock_poisoned("instance"))?;
            bg.set_arena_team(Faction::Alliance, first_tid, first_mmr);
            bg.set_arena_team(Faction::Horde, second_tid, second_mmr);
            outcome.players_invited += self.invite_group(first, &mut bg, Some(Faction::Alliance), now);
            outcome.players_invited += self.invite_group(second, &mut bg, Some(Faction::Horde), now);
        }
        outcome.instances_created += 1;
        info!(
            "paired rated arena teams {} ({} MMR) and {} ({} MMR) into instance {}",
            first_tid, first_mmr, second_tid, second_mmr, instance_id
        );
        Ok(())
    }

    fn force_lane(&mut self, bracket: BracketId, group_id: GroupId, team: Faction) {
        let already = match self.groups.get_mut(&group_id) {
            Some(group) => {
                let already = group.team == team;
                group.team = team;
                already
            }
            None => return,
        };
        if already {
            return;
        }
        let target = QueueLane::premade(team).index();
        if let Some((lane_idx, pos)) = self.lane_position(bracket, group_id) {
            if lane_idx != target {
                if let Some(lanes) = self.buckets.get_mut(&bracket) {
                    lanes[lane_idx].remove(pos);
                    lanes[target].push_front(group_id);
                }
            }
        }
    }
}

fn lock_poisoned(what: &str) -> anyhow::Error {
    MatchmakingError::InternalError {
        message: format!("{} lock poisoned", what),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battleground::StaticTemplateProvider;
    use crate::notify::MockNotificationSink;
    use crate::rating::{ArenaTeamRecord, InMemoryArenaTeamStore};
    use crate::session::{AlwaysOnline, InMemorySessionRegistry};
    use crate::utils::current_timestamp;
    use chrono::Duration;

    const BRACKET: BracketId = BracketId(8);

    struct Harness {
        queue: BattlegroundQueue,
        registry: BattlegroundRegistry,
        scheduler: UpdateScheduler,
        sink: Arc<MockNotificationSink>,
        teams: Arc<InMemoryArenaTeamStore>,
    }

    fn harness(key: QueueKey) -> Harness {
        harness_with(key, AppConfig::default(), Arc::new(AlwaysOnline))
    }

    fn harness_with(
        key: QueueKey,
        config: AppConfig,
        sessions: Arc<dyn SessionProvider>,
    ) -> Harness {
        let sink = Arc::new(MockNotificationSink::new());
        let teams = Arc::new(InMemoryArenaTeamStore::new());
        let queue = BattlegroundQueue::new(
            key,
            Arc::new(config),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            sessions,
            Arc::clone(&teams) as Arc<dyn ArenaTeamStore>,
            Arc::new(StaticTemplateProvider::with_defaults()),
        );
        Harness {
            queue,
            registry: BattlegroundRegistry::new(),
            scheduler: UpdateScheduler::new(),
            sink,
            teams,
        }
    }

    fn join(
        queue: &mut BattlegroundQueue,
        guids: std::ops::Range<u64>,
        team: Faction,
        premade: bool,
        now: DateTime<Utc>,
    ) -> GroupId {
        queue
            .add_group(
                EnqueueRequest {
                    members: guids
                        .map(|guid| JoinedPlayer {
                            guid,
                            last_online: now,
                        })
                        .collect(),
                    team,
                    bracket: BRACKET,
                    premade,
                    rated: false,
                    arena_team_id: 0,
                    arena_team_rating: 0,
                    arena_matchmaker_rating: 0,
                },
                now,
            )
            .unwrap()
    }

    fn join_rated(
        queue: &mut BattlegroundQueue,
        guids: std::ops::Range<u64>,
        team: Faction,
        arena_team_id: ArenaTeamId,
        mmr: u32,
        now: DateTime<Utc>,
    ) -> GroupId {
        queue
            .add_group(
                EnqueueRequest {
                    members: guids
                        .map(|guid| JoinedPlayer {
                            guid,
                            last_online: now,
                        })
                        .collect(),
                    team,
                    bracket: BRACKET,
                    premade: true,
                    rated: true,
                    arena_team_id,
                    arena_team_rating: mmr,
                    arena_matchmaker_rating: mmr,
                },
                now,
            )
            .unwrap()
    }

    fn need_confirmation_instance(sink: &MockNotificationSink, guid: PlayerGuid) -> Option<InstanceId> {
        sink.for_player(guid).into_iter().rev().find_map(|status| {
            if let QueueStatus::NeedConfirmation { instance_id, .. } = status {
                Some(instance_id)
            } else {
                None
            }
        })
    }

    #[test]
    fn test_solo_queues_form_a_full_match() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        for guid in 0..10 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        for guid in 10..20 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }

        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
        assert_eq!(pass.players_invited, 20);
        assert_eq!(h.registry.instance_count(), 1);
        for guid in 0..20 {
            assert!(need_confirmation_instance(&h.sink, guid).is_some());
        }
    }

    #[test]
    fn test_repeated_passes_never_double_invite() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        for guid in 0..10 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        for guid in 10..20 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }
        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();

        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);
        assert_eq!(pass.players_invited, 0);

        let (_, shared) = &h.registry.all()[0];
        let bg = shared.lock().unwrap();
        assert_eq!(bg.invited_count(Faction::Alliance), 10);
        assert_eq!(bg.invited_count(Faction::Horde), 10);
    }

    #[test]
    fn test_one_sided_queue_never_matches() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        for guid in 0..10 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }
        join(&mut h.queue, 100..101, Faction::Alliance, false, now);

        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);
        assert_eq!(h.registry.instance_count(), 0);

        // enough alliance players arriving completes the match
        for guid in 101..110 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
    }

    #[test]
    fn test_premade_pair_starts_instance_and_skips_offline() {
        let sessions = Arc::new(InMemorySessionRegistry::new());
        for guid in 0..19 {
            sessions.connect(guid);
        }
        // guid 19 is offline
        let mut h = harness_with(
            QueueKey::battleground(2),
            AppConfig::default(),
            sessions,
        );
        let now = current_timestamp();
        join(&mut h.queue, 0..10, Faction::Alliance, true, now);
        join(&mut h.queue, 10..20, Faction::Horde, true, now);

        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
        assert_eq!(pass.players_invited, 19);
        assert!(need_confirmation_instance(&h.sink, 18).is_some());
        assert_eq!(need_confirmation_instance(&h.sink, 19), None);

        let (_, shared) = &h.registry.all()[0];
        let bg = shared.lock().unwrap();
        assert_eq!(bg.invited_count(Faction::Alliance), 10);
        assert_eq!(bg.invited_count(Faction::Horde), 9);
    }

    #[test]
    fn test_undersized_premade_demotes_to_normal_lane() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        join(&mut h.queue, 0..3, Faction::Alliance, true, now);

        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::PremadeAlliance), 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::NormalAlliance), 1);

        // the demoted group now matches together with solo players
        for guid in 3..10 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        for guid in 10..20 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
        assert_eq!(pass.players_invited, 20);
    }

    #[test]
    fn test_undersized_premade_pair_never_starts_an_instance() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        join(&mut h.queue, 0..3, Faction::Alliance, true, now);
        join(&mut h.queue, 10..13, Faction::Horde, true, now);

        // two below-minimum premades must not open a 3v3 battleground;
        // both demote to their normal lanes instead
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);
        assert_eq!(h.registry.instance_count(), 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::PremadeAlliance), 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::PremadeHorde), 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::NormalAlliance), 1);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::NormalHorde), 1);
    }

    #[test]
    fn test_full_premade_waits_out_undersized_opponents() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        join(&mut h.queue, 0..3, Faction::Alliance, true, now);
        join(&mut h.queue, 3..6, Faction::Alliance, true, now);
        join(&mut h.queue, 10..20, Faction::Horde, true, now);

        // only the front undersized premade demotes per pass and the one
        // still queued behind it may not anchor a match either
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::PremadeAlliance), 1);

        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::PremadeAlliance), 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::NormalAlliance), 2);
    }

    #[test]
    fn test_long_waiting_premade_demotes_to_normal_lane() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        let joined = now - Duration::minutes(31);
        join(&mut h.queue, 0..10, Faction::Alliance, true, joined);

        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::PremadeAlliance), 0);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::NormalAlliance), 1);
    }

    #[test]
    fn test_normal_match_rejects_heavy_imbalance() {
        // list 3: 8..15 players per team
        let mut h = harness(QueueKey::battleground(3));
        let now = current_timestamp();
        join(&mut h.queue, 0..15, Faction::Alliance, false, now);
        for guid in 100..108 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }

        // 15 vs 8 exceeds the two-player imbalance bound
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);

        // five more horde players close the gap to 15 vs 13
        for guid in 108..113 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
        assert_eq!(pass.players_invited, 28);
    }

    #[test]
    fn test_skirmish_relabels_same_faction_groups() {
        let mut h = harness(QueueKey::skirmish(6, 2));
        let now = current_timestamp();
        for guid in 0..4 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }

        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
        assert_eq!(pass.players_invited, 4);

        // the two later-queued players now fight for the other side
        assert_eq!(h.queue.group_info(0).unwrap().team, Faction::Alliance);
        assert_eq!(h.queue.group_info(2).unwrap().team, Faction::Horde);
        assert_eq!(h.queue.group_info(3).unwrap().team, Faction::Horde);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::NormalHorde), 2);

        let (_, shared) = &h.registry.all()[0];
        let bg = shared.lock().unwrap();
        assert_eq!(bg.invited_count(Faction::Alliance), 2);
        assert_eq!(bg.invited_count(Faction::Horde), 2);
    }

    #[test]
    fn test_rated_pairing_respects_rating_window() {
        let mut h = harness(QueueKey::rated_arena(6, 2));
        let now = current_timestamp();
        join_rated(&mut h.queue, 0..2, Faction::Alliance, 31, 1500, now);
        join_rated(&mut h.queue, 10..12, Faction::Horde, 32, 2000, now);

        // 500 MMR apart: no pairing
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);

        // a team inside the window pairs immediately
        join_rated(&mut h.queue, 20..22, Faction::Horde, 33, 1600, now);
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);

        // opponent ratings were cross-populated
        let first = h.queue.group_info(0).unwrap();
        assert_eq!(first.opponent_matchmaker_rating, 1600);
        let second = h.queue.group_info(20).unwrap();
        assert_eq!(second.opponent_matchmaker_rating, 1500);

        let (_, shared) = &h.registry.all()[0];
        let bg = shared.lock().unwrap();
        assert!(bg.is_rated());
        assert_eq!(bg.arena_matchmaker_rating(Faction::Alliance), 1500);
        assert_eq!(bg.arena_matchmaker_rating(Faction::Horde), 1600);
    }

    #[test]
    fn test_rated_discard_timer_bypasses_window() {
        let mut h = harness(QueueKey::rated_arena(6, 2));
        let joined = current_timestamp();
        join_rated(&mut h.queue, 0..2, Faction::Alliance, 31, 1500, joined);
        let later = joined + Duration::minutes(11);
        join_rated(&mut h.queue, 10..12, Faction::Horde, 32, 1800, later);

        // the first team outwaited the discard timer, so the window no
        // longer blocks the pairing
        let pass = h.queue.update(later, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
    }

    #[test]
    fn test_rated_pairing_needs_distinct_arena_teams() {
        let mut h = harness(QueueKey::rated_arena(6, 2));
        let now = current_timestamp();
        join_rated(&mut h.queue, 0..2, Faction::Alliance, 31, 1500, now);
        join_rated(&mut h.queue, 10..12, Faction::Alliance, 31, 1500, now);

        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);

        // a different team id in the same lane pairs fine, and the second
        // entry is relocated to the horde lane
        join_rated(&mut h.queue, 20..22, Faction::Alliance, 33, 1500, now);
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
        let paired: Vec<Faction> = [0u64, 20]
            .iter()
            .map(|guid| h.queue.group_info(*guid).unwrap().team)
            .collect();
        assert_eq!(paired, vec![Faction::Alliance, Faction::Horde]);
        assert_eq!(h.queue.lane_len(BRACKET, QueueLane::PremadeHorde), 1);
    }

    #[test]
    fn test_rated_team_never_faces_itself_across_lanes() {
        let mut h = harness(QueueKey::rated_arena(6, 2));
        let now = current_timestamp();
        join_rated(&mut h.queue, 0..2, Faction::Alliance, 31, 1500, now);
        join_rated(&mut h.queue, 10..12, Faction::Horde, 31, 1510, now);

        // same arena team in both faction lanes: no pairing
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);
        assert_eq!(h.registry.instance_count(), 0);

        // a distinct team inside the window pairs immediately
        join_rated(&mut h.queue, 20..22, Faction::Horde, 32, 1520, now);
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 1);
    }

    #[test]
    fn test_invite_timeout_removes_players_and_reschedules() {
        let mut h = harness(QueueKey::skirmish(6, 2));
        let now = current_timestamp();
        for guid in 0..4 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        h.sink.clear();

        let deadline = now + Duration::milliseconds(80_000);
        let removed = h
            .queue
            .drive_events(deadline, &h.registry, &h.scheduler)
            .unwrap();
        assert_eq!(removed, 4);
        for guid in 0..4 {
            assert!(!h.queue.is_queued(guid));
            assert!(h
                .sink
                .for_player(guid)
                .contains(&QueueStatus::None {
                    key: h.queue.key()
                }));
        }
        // the abandoned instance triggers one deduplicated re-match request
        assert_eq!(h.scheduler.pending_count(), 1);

        let (_, shared) = &h.registry.all()[0];
        let mut bg = shared.lock().unwrap();
        assert_eq!(bg.invited_count(Faction::Alliance), 0);
        assert_eq!(bg.invited_count(Faction::Horde), 0);
        assert!(bg.update(0).delete);
    }

    #[test]
    fn test_stale_invite_token_is_ignored() {
        let mut h = harness(QueueKey::skirmish(6, 2));
        let now = current_timestamp();
        for guid in 0..4 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();

        // player 0 confirms the invite (leaves the queue) and queues again
        h.queue.remove_player(0, false, &h.registry).unwrap();
        join(&mut h.queue, 0..1, Faction::Alliance, false, now + Duration::seconds(5));

        // the original removal event fires but its token no longer matches
        let deadline = now + Duration::milliseconds(80_000);
        h.queue
            .drive_events(deadline, &h.registry, &h.scheduler)
            .unwrap();
        assert!(h.queue.is_queued(0));
        assert!(h.queue.group_info(0).unwrap().invite.is_none());
    }

    #[test]
    fn test_reminder_carries_remaining_time() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        for guid in 0..10 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        for guid in 10..20 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }
        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        h.sink.clear();

        let reminder_time = now + Duration::milliseconds(20_000);
        h.queue
            .drive_events(reminder_time, &h.registry, &h.scheduler)
            .unwrap();
        let statuses = h.sink.for_player(0);
        assert_eq!(statuses.len(), 1);
        match &statuses[0] {
            QueueStatus::NeedConfirmation { timeout, .. } => {
                assert_eq!(*timeout, Duration::milliseconds(60_000));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_invited_rated_leaver_costs_team_rating() {
        let mut h = harness(QueueKey::rated_arena(6, 2));
        h.teams.insert(ArenaTeamRecord::new(31, "Blades", 1500));
        h.teams.insert(ArenaTeamRecord::new(32, "Shields", 1500));
        let now = current_timestamp();
        join_rated(&mut h.queue, 0..2, Faction::Alliance, 31, 1500, now);
        join_rated(&mut h.queue, 10..12, Faction::Horde, 32, 1550, now);
        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();

        let outcome = h.queue.remove_player(0, true, &h.registry).unwrap();
        assert!(outcome.was_invited.is_some());
        assert!(outcome.evicted.is_empty());
        assert!(h.teams.get_team(31).unwrap().rating < 1500);
        assert_eq!(h.teams.get_team(32).unwrap().rating, 1500);
    }

    #[test]
    fn test_unpaired_rated_team_is_evicted_atomically() {
        let mut h = harness(QueueKey::rated_arena(6, 3));
        h.teams.insert(ArenaTeamRecord::new(31, "Blades", 1500));
        let now = current_timestamp();
        join_rated(&mut h.queue, 0..3, Faction::Alliance, 31, 1500, now);

        let outcome = h.queue.remove_player(1, true, &h.registry).unwrap();
        assert_eq!(outcome.evicted, vec![0, 2]);
        for guid in 0..3 {
            assert!(!h.queue.is_queued(guid));
        }
        assert!(h
            .sink
            .for_player(0)
            .contains(&QueueStatus::None {
                key: h.queue.key()
            }));
        // no invitation existed, so no rating penalty applies
        assert_eq!(h.teams.get_team(31).unwrap().rating, 1500);
    }

    #[test]
    fn test_abandoned_slot_is_backfilled_from_the_queue() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        for guid in 0..10 {
            join(&mut h.queue, guid..guid + 1, Faction::Alliance, false, now);
        }
        for guid in 10..20 {
            join(&mut h.queue, guid..guid + 1, Faction::Horde, false, now);
        }
        h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        let instance_id = h.registry.all()[0].0;

        // player 5 declines its invite
        h.queue.remove_player(5, true, &h.registry).unwrap();
        h.sink.clear();

        join(&mut h.queue, 20..21, Faction::Alliance, false, now);
        let pass = h.queue.update(now, BRACKET, 0, &h.registry).unwrap();
        assert_eq!(pass.instances_created, 0);
        assert_eq!(pass.players_invited, 1);
        assert_eq!(need_confirmation_instance(&h.sink, 20), Some(instance_id));
        assert_eq!(h.registry.instance_count(), 1);
    }

    #[test]
    fn test_double_queue_in_same_queue_is_rejected() {
        let mut h = harness(QueueKey::battleground(2));
        let now = current_timestamp();
        join(&mut h.queue, 0..1, Faction::Alliance, false, now);
        let duplicate = h.queue.add_group(
            EnqueueRequest {
                members: vec![JoinedPlayer {
                    guid: 0,
                    last_online: now,
                }],
                team: Faction::Alliance,
                bracket: BRACKET,
                premade: false,
                rated: false,
                arena_team_id: 0,
                arena_team_rating: 0,
                arena_matchmaker_rating: 0,
            },
            now,
        );
        assert!(duplicate.is_err());
    }
}
