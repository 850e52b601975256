//! Battleground instances, templates and the live-instance registry

pub mod instance;
pub mod modes;
pub mod registry;
pub mod template;

pub use instance::{Battleground, BattlegroundStatus, MatchResult, UpdateOutcome};
pub use modes::ModeRules;
pub use registry::BattlegroundRegistry;
pub use template::{Bracket, BattlegroundTemplate, StaticTemplateProvider, TemplateProvider};
