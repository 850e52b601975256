//! Integration tests for the battlemaster matchmaking engine
//!
//! These tests drive the whole pipeline through the public [`QueueManager`]
//! surface: enqueueing, matching passes, invitation timers, instance
//! lifecycles and rated arena results.

use battlemaster::battleground::{BattlegroundStatus, StaticTemplateProvider, TemplateProvider};
use battlemaster::config::{AppConfig, InvitationPolicy};
use battlemaster::manager::{JoinQueueRequest, QueueManager};
use battlemaster::notify::{MockNotificationSink, NotificationSink, QueueStatus};
use battlemaster::rating::{ArenaTeamRecord, ArenaTeamStore, InMemoryArenaTeamStore};
use battlemaster::session::AlwaysOnline;
use battlemaster::types::{Faction, JoinedPlayer, PlayerGuid, QueueKey};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::sync::Arc;

struct TestSystem {
    manager: QueueManager,
    sink: Arc<MockNotificationSink>,
    teams: Arc<InMemoryArenaTeamStore>,
}

fn create_test_system() -> TestSystem {
    let sink = Arc::new(MockNotificationSink::new());
    let teams = Arc::new(InMemoryArenaTeamStore::new());
    let manager = QueueManager::new(
        Arc::new(AppConfig::default()),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::new(AlwaysOnline),
        Arc::clone(&teams) as Arc<dyn ArenaTeamStore>,
        Arc::new(StaticTemplateProvider::with_defaults()),
    )
    .unwrap();
    TestSystem {
        manager,
        sink,
        teams,
    }
}

fn members(guids: std::ops::Range<u64>, now: DateTime<Utc>) -> Vec<JoinedPlayer> {
    guids
        .map(|guid| JoinedPlayer {
            guid,
            last_online: now,
        })
        .collect()
}

fn join_solo(
    system: &TestSystem,
    key: QueueKey,
    guid: PlayerGuid,
    team: Faction,
    now: DateTime<Utc>,
) {
    system
        .manager
        .join_queue(
            JoinQueueRequest {
                key,
                members: members(guid..guid + 1, now),
                level: 80,
                team,
                premade: false,
                deserter: None,
            },
            now,
        )
        .unwrap();
}

fn invited_instance(system: &TestSystem, guid: PlayerGuid) -> Option<u32> {
    system.sink.for_player(guid).iter().rev().find_map(|status| {
        if let QueueStatus::NeedConfirmation { instance_id, .. } = status {
            Some(*instance_id)
        } else {
            None
        }
    })
}

#[test]
fn test_complete_battleground_workflow() {
    let system = create_test_system();
    let key = QueueKey::battleground(2);
    let now = Utc::now();

    for guid in 0..10 {
        join_solo(&system, key, guid, Faction::Alliance, now);
    }
    for guid in 10..20 {
        join_solo(&system, key, guid, Faction::Horde, now);
    }

    system.manager.tick(now, 1_000).unwrap();
    assert_eq!(system.manager.registry().instance_count(), 1);

    // everyone got invited and confirms
    for guid in 0..20 {
        let instance_id = invited_instance(&system, guid).unwrap();
        assert_eq!(
            system.manager.accept_invite(key, guid, now).unwrap(),
            instance_id
        );
    }

    let (instance_id, shared) = system.manager.registry().all().pop().unwrap();
    {
        let bg = shared.lock().unwrap();
        assert_eq!(bg.status(), BattlegroundStatus::WaitJoin);
        assert_eq!(bg.total_players(), 20);
    }

    // doors open after the start delay
    let later = now + Duration::seconds(120);
    system.manager.tick(later, 120_000).unwrap();
    assert_eq!(
        shared.lock().unwrap().status(),
        BattlegroundStatus::InProgress
    );

    // administrative finish tears the match down and evicts stragglers
    system.manager.end_instance(instance_id).unwrap();
    let teardown = later + Duration::seconds(1);
    system.manager.tick(teardown, 1_000).unwrap();
    system.manager.tick(teardown, 1_000).unwrap();
    assert_eq!(system.manager.registry().instance_count(), 0);
}

#[test]
fn test_one_sided_queue_never_matches() {
    let system = create_test_system();
    let key = QueueKey::battleground(2);
    let now = Utc::now();

    for guid in 0..10 {
        join_solo(&system, key, guid, Faction::Alliance, now);
    }

    for round in 1..=5 {
        let at = now + Duration::seconds(round);
        system.manager.tick(at, 1_000).unwrap();
    }
    assert_eq!(system.manager.registry().instance_count(), 0);
    assert_eq!(system.manager.metrics().invites_sent.get(), 0);
}

#[test]
fn test_skirmish_matches_same_faction() {
    let system = create_test_system();
    let key = QueueKey::skirmish(6, 2);
    let now = Utc::now();

    for guid in 0..4 {
        join_solo(&system, key, guid, Faction::Alliance, now);
    }
    system.manager.tick(now, 1_000).unwrap();

    assert_eq!(system.manager.registry().instance_count(), 1);
    for guid in 0..4 {
        assert!(invited_instance(&system, guid).is_some());
    }
    let (_, shared) = system.manager.registry().all().pop().unwrap();
    let bg = shared.lock().unwrap();
    assert_eq!(bg.invited_count(Faction::Alliance), 2);
    assert_eq!(bg.invited_count(Faction::Horde), 2);
}

#[test]
fn test_rated_arena_forfeit_moves_ratings() {
    let system = create_test_system();
    system.teams.insert(ArenaTeamRecord::new(31, "Blades", 1500));
    system
        .teams
        .insert(ArenaTeamRecord::new(32, "Shields", 1550));
    let key = QueueKey::rated_arena(6, 2);
    let now = Utc::now();

    system
        .manager
        .join_rated_arena(
            key,
            members(0..2, now),
            80,
            Faction::Alliance,
            31,
            None,
            now,
        )
        .unwrap();
    system
        .manager
        .join_rated_arena(key, members(10..12, now), 80, Faction::Horde, 32, None, now)
        .unwrap();

    system.manager.tick(now, 1_000).unwrap();
    assert_eq!(system.manager.registry().instance_count(), 1);

    let mut instance_ids = Vec::new();
    for guid in [0u64, 1, 10, 11] {
        instance_ids.push(system.manager.accept_invite(key, guid, now).unwrap());
    }
    let instance_id = instance_ids[0];

    // arena gates open after one minute
    system
        .manager
        .tick(now + Duration::seconds(60), 60_000)
        .unwrap();

    // the whole second team walks out: forfeit in favor of the first
    system.manager.leave_battleground(instance_id, 10).unwrap();
    system.manager.leave_battleground(instance_id, 11).unwrap();

    let winner = system.teams.get_team(31).unwrap();
    let loser = system.teams.get_team(32).unwrap();
    assert!(winner.rating > 1500);
    assert_eq!(winner.wins, 1);
    assert!(loser.rating < 1550);
    assert_eq!(loser.losses, 1);
}

#[test]
fn test_rated_teams_outside_window_wait_for_discard() {
    let system = create_test_system();
    system.teams.insert(ArenaTeamRecord::new(31, "Blades", 1500));
    system
        .teams
        .insert(ArenaTeamRecord::new(32, "Shields", 1900));
    let key = QueueKey::rated_arena(6, 3);
    let now = Utc::now();

    system
        .manager
        .join_rated_arena(
            key,
            members(0..3, now),
            80,
            Faction::Alliance,
            31,
            None,
            now,
        )
        .unwrap();
    system
        .manager
        .join_rated_arena(key, members(10..13, now), 80, Faction::Horde, 32, None, now)
        .unwrap();

    // 400 apart, window is 150: nothing pairs
    system.manager.tick(now, 1_000).unwrap();
    assert_eq!(system.manager.registry().instance_count(), 0);

    // once past the discard window the forced pass pairs them anyway
    let aged = now + Duration::minutes(11);
    system.manager.tick(aged, 5_000).unwrap();
    assert_eq!(system.manager.registry().instance_count(), 1);
}

#[test]
fn test_expired_invitation_cannot_be_accepted() {
    let system = create_test_system();
    let key = QueueKey::battleground(2);
    let now = Utc::now();

    for guid in 0..10 {
        join_solo(&system, key, guid, Faction::Alliance, now);
    }
    for guid in 10..20 {
        join_solo(&system, key, guid, Faction::Horde, now);
    }
    system.manager.tick(now, 1_000).unwrap();
    assert!(invited_instance(&system, 0).is_some());

    // the accept window lapses before anyone confirms
    let late = now + Duration::seconds(81);
    system.manager.tick(late, 81_000).unwrap();

    assert!(system.manager.accept_invite(key, 0, late).is_err());
    assert_eq!(system.manager.metrics().invites_expired.get(), 20);
}

#[test]
fn test_rated_group_leaves_as_one() {
    let system = create_test_system();
    system.teams.insert(ArenaTeamRecord::new(31, "Blades", 1500));
    let key = QueueKey::rated_arena(6, 2);
    let now = Utc::now();

    system
        .manager
        .join_rated_arena(
            key,
            members(0..2, now),
            80,
            Faction::Alliance,
            31,
            None,
            now,
        )
        .unwrap();
    system.manager.tick(now, 1_000).unwrap();

    system.manager.leave_queue(key, 0).unwrap();

    // the teammate was evicted along with the leaver, without rating loss
    assert!(system
        .sink
        .for_player(1)
        .iter()
        .any(|status| matches!(status, QueueStatus::None { .. })));
    assert_eq!(system.teams.get_team(31).unwrap().rating, 1500);

    // nothing left to pair against later arrivals
    system
        .teams
        .insert(ArenaTeamRecord::new(32, "Shields", 1500));
    system
        .manager
        .join_rated_arena(key, members(10..12, now), 80, Faction::Horde, 32, None, now)
        .unwrap();
    system.manager.tick(now + Duration::seconds(1), 1_000).unwrap();
    assert_eq!(system.manager.registry().instance_count(), 0);
}

#[test]
fn test_abandoned_slot_is_refilled() {
    let system = create_test_system();
    let key = QueueKey::battleground(2);
    let now = Utc::now();

    for guid in 0..10 {
        join_solo(&system, key, guid, Faction::Alliance, now);
    }
    for guid in 10..20 {
        join_solo(&system, key, guid, Faction::Horde, now);
    }
    system.manager.tick(now, 1_000).unwrap();
    let instance_id = system.manager.accept_invite(key, 0, now).unwrap();

    system.manager.leave_battleground(instance_id, 0).unwrap();

    // a replacement joins and is routed into the existing instance
    join_solo(&system, key, 30, Faction::Alliance, now);
    system.manager.tick(now + Duration::seconds(1), 1_000).unwrap();
    assert_eq!(invited_instance(&system, 30), Some(instance_id));
    assert_eq!(system.manager.registry().instance_count(), 1);
}

// Free-slot bounds hold for arbitrary invite/entry interleavings.
proptest! {
    #[test]
    fn prop_free_slots_never_exceed_remaining_cap(
        invites_a in 0u32..12,
        invites_b in 0u32..12,
        entered_a in 0u32..12,
        entered_b in 0u32..12,
    ) {
        use battlemaster::battleground::Battleground;
        use battlemaster::config::QueueSettings;
        use battlemaster::types::BracketId;

        let provider = StaticTemplateProvider::with_defaults();
        let template = provider.template(2).unwrap();
        let settings = QueueSettings::default();
        let mut bg = Battleground::new(
            1,
            1,
            &template,
            QueueKey::battleground(2),
            BracketId(8),
            &settings,
        )
        .unwrap();
        bg.open_for_join();

        let cap = bg.max_players_per_team();
        let mut guid = 0u64;
        for _ in 0..invites_a.min(cap) {
            bg.increase_invited(Faction::Alliance);
        }
        for _ in 0..invites_b.min(cap) {
            bg.increase_invited(Faction::Horde);
        }
        for _ in 0..entered_a.min(bg.invited_count(Faction::Alliance)) {
            bg.add_player(guid, Faction::Alliance);
            guid += 1;
        }
        for _ in 0..entered_b.min(bg.invited_count(Faction::Horde)) {
            bg.add_player(guid, Faction::Horde);
            guid += 1;
        }

        for policy in [InvitationPolicy::NoBalance, InvitationPolicy::Even] {
            for team in [Faction::Alliance, Faction::Horde] {
                let slots = bg.get_free_slots_for_team(team, policy);
                // never invite past the per-team cap
                prop_assert!(slots <= cap.saturating_sub(bg.invited_count(team)));
                // balanced invitations stay within one of the other side
                if policy == InvitationPolicy::Even {
                    let this = bg.invited_count(team);
                    let other = bg.invited_count(team.opposite());
                    prop_assert!(this + slots <= other.max(this) + 1);
                }
            }
        }
    }
}
