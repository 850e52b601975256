//! Battlemaster: a battleground and arena matchmaking engine
//!
//! The crate models the whole queue-to-instance pipeline: players join a
//! [`queue::BattlegroundQueue`] keyed by [`types::QueueKey`], matching passes
//! pick balanced selections out of four ordered lanes per level bracket,
//! invited players confirm within a timeout, and live
//! [`battleground::Battleground`] instances run their start/finish/tear-down
//! lifecycle until they are deleted.
//!
//! [`manager::QueueManager`] is the embedding surface; everything the host
//! environment supplies (sessions, notifications, templates, arena team
//! ratings) comes in through the traits in [`session`], [`notify`],
//! [`battleground`] and [`rating`].

pub mod battleground;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod rating;
pub mod session;
pub mod types;
pub mod utils;

pub use config::AppConfig;
pub use error::{MatchmakingError, Result};
pub use manager::{JoinQueueRequest, QueueManager};
pub use types::{Faction, QueueKey};

/// Version of the battlemaster engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
