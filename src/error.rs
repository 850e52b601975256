//! Error types for the matchmaking engine
//!
//! This module defines all error types using anyhow for consistent error
//! handling throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("No battleground template for list id {list_id}")]
    TemplateNotFound { list_id: u16 },

    #[error("No bracket for level {level} in list id {list_id}")]
    BracketNotFound { list_id: u16, level: u8 },

    #[error("Battleground instance not found: {instance_id}")]
    InstanceNotFound { instance_id: u32 },

    #[error("Player {guid} is not queued here")]
    PlayerNotQueued { guid: u64 },

    #[error("Invalid join request: {reason:?}")]
    InvalidJoinRequest {
        reason: crate::types::JoinFailReason,
    },

    #[error("Arena team not found: {team_id}")]
    ArenaTeamNotFound { team_id: u32 },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal engine error: {message}")]
    InternalError { message: String },
}
