//! Queue manager
//!
//! The [`QueueManager`] is the engine's facade: it owns one
//! [`BattlegroundQueue`] per queue key, the shared instance registry, the
//! deduplicating update scheduler and the metrics collector. All player
//! facing operations (join, leave, confirm, port out) go through it, and the
//! periodic [`QueueManager::tick`] drives timers, instance lifecycles and
//! deferred matching passes.
//!
//! Lock order is always queue before instance; the tick phases run in a
//! fixed sequence so every pass observes the effects of the previous one.

use crate::battleground::{
    BattlegroundRegistry, BattlegroundStatus, MatchResult, TemplateProvider,
};
use crate::config::AppConfig;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::notify::{NotificationSink, QueueStatus};
use crate::queue::{
    BattlegroundQueue, EnqueueRequest, QueueUpdateRequest, UpdateScheduler,
};
use crate::rating::ArenaTeamStore;
use crate::session::SessionProvider;
use crate::types::{
    ArenaTeamId, Faction, InstanceId, JoinFailReason, JoinedPlayer, PlayerGuid, QueueKey,
};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info};

/// Maximum number of queues one player may wait in at once
pub const MAX_ACTIVE_QUEUES: usize = 2;

/// One unrated join request as the session layer hands it over
#[derive(Debug, Clone)]
pub struct JoinQueueRequest {
    pub key: QueueKey,
    pub members: Vec<JoinedPlayer>,
    /// Leader level, used to resolve the bracket
    pub level: u8,
    pub team: Faction,
    pub premade: bool,
    /// Member carrying the deserter debuff, if any
    pub deserter: Option<PlayerGuid>,
}

/// Top-level matchmaking engine
pub struct QueueManager {
    config: Arc<AppConfig>,
    notifier: Arc<dyn NotificationSink>,
    sessions: Arc<dyn SessionProvider>,
    arena_teams: Arc<dyn ArenaTeamStore>,
    templates: Arc<dyn TemplateProvider>,
    metrics: MetricsCollector,
    queues: RwLock<HashMap<QueueKey, Arc<Mutex<BattlegroundQueue>>>>,
    registry: Arc<BattlegroundRegistry>,
    scheduler: Arc<UpdateScheduler>,
    rated_update_elapsed_ms: AtomicU64,
}

impl QueueManager {
    pub fn new(
        config: Arc<AppConfig>,
        notifier: Arc<dyn NotificationSink>,
        sessions: Arc<dyn SessionProvider>,
        arena_teams: Arc<dyn ArenaTeamStore>,
        templates: Arc<dyn TemplateProvider>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            notifier,
            sessions,
            arena_teams,
            templates,
            metrics: MetricsCollector::new()?,
            queues: RwLock::new(HashMap::new()),
            registry: Arc::new(BattlegroundRegistry::new()),
            scheduler: Arc::new(UpdateScheduler::new()),
            rated_update_elapsed_ms: AtomicU64::new(0),
        })
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn registry(&self) -> &BattlegroundRegistry {
        &self.registry
    }

    fn queue(&self, key: QueueKey) -> Option<Arc<Mutex<BattlegroundQueue>>> {
        self.queues.read().ok()?.get(&key).cloned()
    }

    fn queue_or_create(&self, key: QueueKey) -> Result<Arc<Mutex<BattlegroundQueue>>> {
        if let Some(queue) = self.queue(key) {
            return Ok(queue);
        }
        let mut queues = self
            .queues
            .write()
            .map_err(|_| lock_poisoned("queue registry"))?;
        Ok(Arc::clone(queues.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(BattlegroundQueue::new(
                key,
                Arc::clone(&self.config),
                Arc::clone(&self.notifier),
                Arc::clone(&self.sessions),
                Arc::clone(&self.arena_teams),
                Arc::clone(&self.templates),
            )))
        })))
    }

    fn queue_snapshot(&self) -> Vec<(QueueKey, Arc<Mutex<BattlegroundQueue>>)> {
        self.queues
            .read()
            .map(|queues| {
                queues
                    .iter()
                    .map(|(key, queue)| (*key, Arc::clone(queue)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Join an unrated battleground, wargame or skirmish queue.
    pub fn join_queue(&self, request: JoinQueueRequest, now: DateTime<Utc>) -> Result<()> {
        self.enqueue(
            request.key,
            request.members,
            request.level,
            request.team,
            request.premade,
            false,
            0,
            0,
            0,
            request.deserter,
            now,
        )
    }

    /// Join a rated arena queue as a full arena team.
    #[allow(clippy::too_many_arguments)]
    pub fn join_rated_arena(
        &self,
        key: QueueKey,
        members: Vec<JoinedPlayer>,
        level: u8,
        team: Faction,
        arena_team_id: ArenaTeamId,
        deserter: Option<PlayerGuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !key.rated || !key.is_arena() {
            return Err(MatchmakingError::InternalError {
                message: format!("{} is not a rated arena queue", key),
            }
            .into());
        }
        let record = self
            .arena_teams
            .get_team(arena_team_id)
            .ok_or(MatchmakingError::ArenaTeamNotFound {
                team_id: arena_team_id,
            })?;
        self.enqueue(
            key,
            members,
            level,
            team,
            true,
            true,
            arena_team_id,
            record.rating,
            record.matchmaker_rating,
            deserter,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &self,
        key: QueueKey,
        members: Vec<JoinedPlayer>,
        level: u8,
        team: Faction,
        premade: bool,
        rated: bool,
        arena_team_id: ArenaTeamId,
        arena_team_rating: u32,
        arena_matchmaker_rating: u32,
        deserter: Option<PlayerGuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let template = self.templates.template(key.list_id).ok_or(
            MatchmakingError::TemplateNotFound {
                list_id: key.list_id,
            },
        )?;
        let bracket = self.templates.bracket_for_level(key.list_id, level).ok_or(
            MatchmakingError::BracketNotFound {
                list_id: key.list_id,
                level,
            },
        )?;

        let team_cap = if key.is_arena() {
            usize::from(key.team_size)
        } else {
            template.max_players_per_team as usize
        };
        if members.len() > team_cap {
            return self.reject(key, &members, JoinFailReason::GroupTooLarge, None);
        }
        // a rated arena team ports as a whole: partial teams cannot queue
        if rated && members.len() < team_cap {
            return self.reject(key, &members, JoinFailReason::NotEnoughPlayers, None);
        }
        if let Some(offender) = deserter {
            return self.reject(key, &members, JoinFailReason::Deserter, Some(offender));
        }
        for member in &members {
            let active = self.active_queue_count(member.guid);
            if rated && active > 0 {
                return self.reject(
                    key,
                    &members,
                    JoinFailReason::CannotQueueForRated,
                    Some(member.guid),
                );
            }
            if active >= MAX_ACTIVE_QUEUES {
                return self.reject(
                    key,
                    &members,
                    JoinFailReason::TooManyQueues,
                    Some(member.guid),
                );
            }
        }

        let as_group = members.len() > 1;
        let member_guids: Vec<PlayerGuid> = members.iter().map(|m| m.guid).collect();
        let queue = self.queue_or_create(key)?;
        let avg_wait = {
            let mut queue = queue.lock().map_err(|_| lock_poisoned("queue"))?;
            queue.add_group(
                EnqueueRequest {
                    members,
                    team,
                    bracket: bracket.id,
                    premade,
                    rated,
                    arena_team_id,
                    arena_team_rating,
                    arena_matchmaker_rating,
                },
                now,
            )?;
            queue.average_wait(team, bracket.id)
        };

        for guid in &member_guids {
            self.notifier.notify(
                *guid,
                QueueStatus::Queued {
                    key,
                    avg_wait,
                    as_group,
                },
            );
        }
        self.metrics.groups_queued.inc();
        self.metrics
            .players_waiting
            .add(member_guids.len() as i64);
        self.scheduler.schedule(QueueUpdateRequest {
            rating_hint: arena_matchmaker_rating,
            key,
            bracket: bracket.id,
        });
        Ok(())
    }

    fn reject(
        &self,
        key: QueueKey,
        members: &[JoinedPlayer],
        reason: JoinFailReason,
        offender: Option<PlayerGuid>,
    ) -> Result<()> {
        for member in members {
            self.notifier.notify(
                member.guid,
                QueueStatus::Failed {
                    key,
                    reason,
                    offender,
                },
            );
        }
        Err(MatchmakingError::InvalidJoinRequest { reason }.into())
    }

    fn active_queue_count(&self, guid: PlayerGuid) -> usize {
        self.queue_snapshot()
            .iter()
            .filter(|(_, queue)| {
                queue
                    .lock()
                    .map(|queue| queue.is_queued(guid))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Leave a queue voluntarily.
    pub fn leave_queue(&self, key: QueueKey, guid: PlayerGuid) -> Result<()> {
        let queue = self
            .queue(key)
            .ok_or(MatchmakingError::PlayerNotQueued { guid })?;
        let outcome = {
            let mut queue = queue.lock().map_err(|_| lock_poisoned("queue"))?;
            queue.remove_player(guid, true, &self.registry)?
        };
        self.notifier.notify(guid, QueueStatus::None { key });
        self.metrics
            .players_waiting
            .sub(1 + outcome.evicted.len() as i64);
        if outcome.was_invited.is_some() {
            self.scheduler.schedule(QueueUpdateRequest {
                rating_hint: 0,
                key,
                bracket: outcome.bracket,
            });
        }
        Ok(())
    }

    /// Confirm a pending invitation: the player enters the instance and
    /// leaves the queue without an invited-count rollback.
    pub fn accept_invite(
        &self,
        key: QueueKey,
        guid: PlayerGuid,
        now: DateTime<Utc>,
    ) -> Result<InstanceId> {
        let queue = self
            .queue(key)
            .ok_or(MatchmakingError::PlayerNotQueued { guid })?;
        let mut queue = queue.lock().map_err(|_| lock_poisoned("queue"))?;

        let (invite, team, join_time) = {
            let group = queue
                .group_info(guid)
                .ok_or(MatchmakingError::PlayerNotQueued { guid })?;
            (group.invite, group.team, group.join_time)
        };
        let Some(invite) = invite else {
            return Err(MatchmakingError::InternalError {
                message: format!("player {} has no pending invitation", guid),
            }
            .into());
        };
        let shared =
            self.registry
                .get(invite.instance_id)
                .ok_or(MatchmakingError::InstanceNotFound {
                    instance_id: invite.instance_id,
                })?;

        let elapsed = {
            let mut bg = shared.lock().map_err(|_| lock_poisoned("instance"))?;
            bg.add_player(guid, team);
            chrono::Duration::milliseconds(bg.elapsed_ms() as i64)
        };
        queue.remove_player(guid, false, &self.registry)?;

        self.notifier.notify(
            guid,
            QueueStatus::Active {
                key,
                instance_id: invite.instance_id,
                elapsed,
            },
        );
        self.metrics.players_waiting.dec();
        let waited_seconds = (now - join_time).num_milliseconds().max(0) as f64 / 1000.0;
        self.metrics.queue_wait_seconds.observe(waited_seconds);
        Ok(invite.instance_id)
    }

    /// Remove a player from a running instance (port out, logout).
    pub fn leave_battleground(&self, instance_id: InstanceId, guid: PlayerGuid) -> Result<()> {
        let shared =
            self.registry
                .get(instance_id)
                .ok_or(MatchmakingError::InstanceNotFound { instance_id })?;
        let policy = self.config.queue.invitation_policy;
        let (result, key, bracket, reopen) = {
            let mut bg = shared.lock().map_err(|_| lock_poisoned("instance"))?;
            let result = bg.remove_player(guid);
            let reopen = !bg.is_arena()
                && bg.status() != BattlegroundStatus::WaitLeave
                && bg.has_free_slots(policy);
            (result, bg.key(), bg.bracket(), reopen)
        };

        self.notifier.notify(guid, QueueStatus::None { key });
        if let Some(result) = result {
            self.apply_match_result(&result)?;
        }
        if reopen {
            // the freed slot becomes fillable again
            self.registry.register_free_slots(key, instance_id)?;
            self.scheduler.schedule(QueueUpdateRequest {
                rating_hint: 0,
                key,
                bracket,
            });
        }
        Ok(())
    }

    /// Forward a map trigger to the owning instance.
    pub fn handle_area_trigger(
        &self,
        instance_id: InstanceId,
        guid: PlayerGuid,
        trigger: u32,
    ) -> Result<()> {
        let shared =
            self.registry
                .get(instance_id)
                .ok_or(MatchmakingError::InstanceNotFound { instance_id })?;
        shared
            .lock()
            .map_err(|_| lock_poisoned("instance"))?
            .handle_area_trigger(guid, trigger);
        Ok(())
    }

    /// Administrative teardown of one instance.
    pub fn end_instance(&self, instance_id: InstanceId) -> Result<()> {
        let shared =
            self.registry
                .get(instance_id)
                .ok_or(MatchmakingError::InstanceNotFound { instance_id })?;
        let result = shared
            .lock()
            .map_err(|_| lock_poisoned("instance"))?
            .end_now();
        self.apply_match_result(&result)
    }

    fn apply_match_result(&self, result: &MatchResult) -> Result<()> {
        if !result.rated || result.rating_void {
            return Ok(());
        }
        let Some(winner) = result.winner else {
            return Ok(());
        };
        let winner_id = result.arena_team_ids[winner.index()];
        let loser_id = result.arena_team_ids[winner.opposite().index()];
        if winner_id == 0 || loser_id == 0 {
            return Ok(());
        }
        self.arena_teams.apply_match_result(winner_id, loser_id)?;
        self.arena_teams.persist(winner_id)?;
        self.arena_teams.persist(loser_id)?;
        Ok(())
    }

    /// One engine tick. Phases run in order: instance lifecycles, invite
    /// timers, deferred matching passes, the rated arena force update.
    pub fn tick(&self, now: DateTime<Utc>, diff_ms: u64) -> Result<()> {
        // instance lifecycles
        for (instance_id, shared) in self.registry.all() {
            let (outcome, key) = {
                let mut bg = shared.lock().map_err(|_| lock_poisoned("instance"))?;
                (bg.update(diff_ms), bg.key())
            };
            for (guid, _) in &outcome.removed_players {
                self.notifier.notify(*guid, QueueStatus::None { key });
            }
            if let Some(result) = outcome.ended {
                self.apply_match_result(&result)?;
            }
            if outcome.delete {
                self.registry.remove(instance_id)?;
            }
        }

        // invite timers
        for (_, queue) in self.queue_snapshot() {
            let expired = queue
                .lock()
                .map_err(|_| lock_poisoned("queue"))?
                .drive_events(now, &self.registry, &self.scheduler)?;
            if expired > 0 {
                self.metrics.invites_expired.inc_by(u64::from(expired));
                self.metrics.players_waiting.sub(i64::from(expired));
            }
        }

        // deferred matching passes, deduplicated
        for request in self.scheduler.drain() {
            let Some(queue) = self.queue(request.key) else {
                continue;
            };
            let pass = queue
                .lock()
                .map_err(|_| lock_poisoned("queue"))?
                .update(now, request.bracket, request.rating_hint, &self.registry)?;
            self.record_pass(pass);
        }

        // rated arena force update
        let timer = self.config.queue.rated_update_timer_ms;
        if timer > 0 {
            let elapsed = self
                .rated_update_elapsed_ms
                .fetch_add(diff_ms, Ordering::Relaxed)
                + diff_ms;
            if elapsed >= timer {
                self.rated_update_elapsed_ms.store(0, Ordering::Relaxed);
                for (key, queue) in self.queue_snapshot() {
                    if !key.rated {
                        continue;
                    }
                    let mut queue = queue.lock().map_err(|_| lock_poisoned("queue"))?;
                    for bracket in queue.brackets() {
                        let pass = queue.update(now, bracket, 0, &self.registry)?;
                        self.record_pass(pass);
                    }
                }
            }
        }

        self.metrics
            .active_instances
            .set(self.registry.instance_count() as i64);
        Ok(())
    }

    fn record_pass(&self, pass: crate::queue::MatchingPassOutcome) {
        if pass.instances_created > 0 {
            self.metrics
                .matches_created
                .inc_by(u64::from(pass.instances_created));
        }
        if pass.players_invited > 0 {
            self.metrics
                .invites_sent
                .inc_by(u64::from(pass.players_invited));
        }
    }

    /// Service loop: tick at the configured period until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.tick_period());
        let diff_ms = self.config.service.tick_period_ms;
        info!(
            "matchmaking engine running (tick every {}ms)",
            diff_ms
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick(current_timestamp(), diff_ms) {
                        error!("tick failed: {:#}", err);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn lock_poisoned(what: &str) -> anyhow::Error {
    MatchmakingError::InternalError {
        message: format!("{} lock poisoned", what),
    }
    .into()
}
