//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! battlemaster matchmaking engine, including environment variable loading
//! and validation.

use anyhow::{anyhow, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// How invitations are balanced between factions while an instance fills up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationPolicy {
    /// Invite anyone into a starting instance, up to the per-team cap
    NoBalance,
    /// Keep faction invite counts even while the instance fills
    Even,
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub queue: QueueSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Scheduler tick period in milliseconds
    pub tick_period_ms: u64,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Matchmaking queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// How long an invited player has to confirm, in milliseconds
    pub invite_accept_wait_ms: u64,
    /// Delay after the invite at which a confirmation reminder is resent
    pub invite_reminder_lead_ms: u64,
    /// Maximum matchmaker-rating difference for arena pairing
    pub max_rating_difference: u32,
    /// Entries queued longer than this bypass the rating window, milliseconds
    pub rating_discard_timer_ms: u64,
    /// Premade groups waiting longer than this are demoted to the normal
    /// lane, milliseconds
    pub premade_wait_timer_ms: u64,
    /// Invitation balance policy while an instance fills
    pub invitation_policy: InvitationPolicy,
    /// Forced re-match interval for rated arena queues, milliseconds
    /// (0 disables the force update)
    pub rated_update_timer_ms: u64,
    /// Countdown before an underpopulated battleground is ended, milliseconds
    pub premature_finish_ms: u64,
    /// Hard time limit for arena matches, milliseconds
    pub arena_time_limit_ms: u64,
    /// Tear-down timer once a match is decided, milliseconds
    pub teardown_ms: u64,
    /// Relax battleground minimum player requirements to 1 (test mode)
    pub battleground_testing: bool,
    /// Relax arena minimum player requirements to 1 (test mode)
    pub arena_testing: bool,
    /// Announce queue population counts on enqueue
    pub queue_announcer: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            queue: QueueSettings::default(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "battlemaster".to_string(),
            log_level: "info".to_string(),
            tick_period_ms: 1000,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            invite_accept_wait_ms: 80_000,
            invite_reminder_lead_ms: 20_000,
            max_rating_difference: 150,
            rating_discard_timer_ms: 600_000,      // 10 minutes
            premade_wait_timer_ms: 1_800_000,      // 30 minutes
            invitation_policy: InvitationPolicy::NoBalance,
            rated_update_timer_ms: 5_000,
            premature_finish_ms: 300_000,          // 5 minutes
            arena_time_limit_ms: 2_700_000,        // 45 minutes
            teardown_ms: 120_000,                  // 2 minutes
            battleground_testing: false,
            arena_testing: false,
            queue_announcer: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(period) = env::var("TICK_PERIOD_MS") {
            config.service.tick_period_ms = period
                .parse()
                .map_err(|_| anyhow!("Invalid TICK_PERIOD_MS value: {}", period))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Queue settings
        if let Ok(wait) = env::var("INVITE_ACCEPT_WAIT_MS") {
            config.queue.invite_accept_wait_ms = wait
                .parse()
                .map_err(|_| anyhow!("Invalid INVITE_ACCEPT_WAIT_MS value: {}", wait))?;
        }
        if let Ok(lead) = env::var("INVITE_REMINDER_LEAD_MS") {
            config.queue.invite_reminder_lead_ms = lead
                .parse()
                .map_err(|_| anyhow!("Invalid INVITE_REMINDER_LEAD_MS value: {}", lead))?;
        }
        if let Ok(diff) = env::var("MAX_RATING_DIFFERENCE") {
            config.queue.max_rating_difference = diff
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_RATING_DIFFERENCE value: {}", diff))?;
        }
        if let Ok(discard) = env::var("RATING_DISCARD_TIMER_MS") {
            config.queue.rating_discard_timer_ms = discard
                .parse()
                .map_err(|_| anyhow!("Invalid RATING_DISCARD_TIMER_MS value: {}", discard))?;
        }
        if let Ok(wait) = env::var("PREMADE_WAIT_TIMER_MS") {
            config.queue.premade_wait_timer_ms = wait
                .parse()
                .map_err(|_| anyhow!("Invalid PREMADE_WAIT_TIMER_MS value: {}", wait))?;
        }
        if let Ok(policy) = env::var("INVITATION_POLICY") {
            config.queue.invitation_policy = match policy.to_lowercase().as_str() {
                "nobalance" | "no_balance" => InvitationPolicy::NoBalance,
                "even" => InvitationPolicy::Even,
                _ => return Err(anyhow!("Invalid INVITATION_POLICY value: {}", policy)),
            };
        }
        if let Ok(timer) = env::var("RATED_UPDATE_TIMER_MS") {
            config.queue.rated_update_timer_ms = timer
                .parse()
                .map_err(|_| anyhow!("Invalid RATED_UPDATE_TIMER_MS value: {}", timer))?;
        }
        if let Ok(premature) = env::var("PREMATURE_FINISH_MS") {
            config.queue.premature_finish_ms = premature
                .parse()
                .map_err(|_| anyhow!("Invalid PREMATURE_FINISH_MS value: {}", premature))?;
        }
        if let Ok(limit) = env::var("ARENA_TIME_LIMIT_MS") {
            config.queue.arena_time_limit_ms = limit
                .parse()
                .map_err(|_| anyhow!("Invalid ARENA_TIME_LIMIT_MS value: {}", limit))?;
        }
        if let Ok(teardown) = env::var("TEARDOWN_MS") {
            config.queue.teardown_ms = teardown
                .parse()
                .map_err(|_| anyhow!("Invalid TEARDOWN_MS value: {}", teardown))?;
        }
        if let Ok(testing) = env::var("BATTLEGROUND_TESTING") {
            config.queue.battleground_testing = testing
                .parse()
                .map_err(|_| anyhow!("Invalid BATTLEGROUND_TESTING value: {}", testing))?;
        }
        if let Ok(testing) = env::var("ARENA_TESTING") {
            config.queue.arena_testing = testing
                .parse()
                .map_err(|_| anyhow!("Invalid ARENA_TESTING value: {}", testing))?;
        }
        if let Ok(announcer) = env::var("QUEUE_ANNOUNCER") {
            config.queue.queue_announcer = announcer
                .parse()
                .map_err(|_| anyhow!("Invalid QUEUE_ANNOUNCER value: {}", announcer))?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Get the scheduler tick period as a Duration
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.service.tick_period_ms)
    }

    /// Get the invite accept window as a chrono Duration
    pub fn invite_accept_wait(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.queue.invite_accept_wait_ms as i64)
    }

    /// Get the reminder lead time as a chrono Duration
    pub fn invite_reminder_lead(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.queue.invite_reminder_lead_ms as i64)
    }

    /// Get the rating discard window as a chrono Duration
    pub fn rating_discard_timer(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.queue.rating_discard_timer_ms as i64)
    }

    /// Get the premade demotion wait as a chrono Duration
    pub fn premade_wait_timer(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.queue.premade_wait_timer_ms as i64)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.tick_period_ms == 0 {
        return Err(anyhow!("Tick period must be greater than 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.queue.invite_accept_wait_ms == 0 {
        return Err(anyhow!("Invite accept wait must be greater than 0"));
    }
    if config.queue.invite_reminder_lead_ms >= config.queue.invite_accept_wait_ms {
        return Err(anyhow!(
            "Invite reminder lead ({}) must be shorter than the accept wait ({})",
            config.queue.invite_reminder_lead_ms,
            config.queue.invite_accept_wait_ms
        ));
    }
    if config.queue.teardown_ms == 0 {
        return Err(anyhow!("Tear-down timer must be greater than 0"));
    }

    Ok(())
}
