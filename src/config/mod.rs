//! Configuration management for the battlemaster engine
//!
//! This module handles all configuration loading from environment variables,
//! validation, and default values for the matchmaking engine.

pub mod app;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, InvitationPolicy, QueueSettings, ServiceSettings};
