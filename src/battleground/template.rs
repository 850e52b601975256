//! Battleground templates and level brackets
//!
//! Templates describe the static shape of a battleground or arena list entry:
//! team caps, level range and mode. A [`TemplateProvider`] abstracts where
//! they come from so the engine can run against a static seed in tests and a
//! database-backed source in production.

use crate::battleground::modes::ModeRules;
use crate::types::BracketId;
use std::collections::HashMap;

/// Static definition of one joinable list entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattlegroundTemplate {
    pub list_id: u16,
    pub name: String,
    pub map_id: u32,
    pub arena: bool,
    pub min_players_per_team: u32,
    pub max_players_per_team: u32,
    pub min_level: u8,
    pub max_level: u8,
}

impl BattlegroundTemplate {
    pub fn mode(&self) -> ModeRules {
        if self.arena {
            ModeRules::Arena
        } else if self.max_players_per_team >= 15 {
            ModeRules::ResourceRace
        } else {
            ModeRules::FlagCapture
        }
    }
}

/// One level band of a template's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    pub id: BracketId,
    pub min_level: u8,
    pub max_level: u8,
}

/// Source of templates and their level brackets
pub trait TemplateProvider: Send + Sync {
    fn template(&self, list_id: u16) -> Option<BattlegroundTemplate>;

    fn bracket_for_level(&self, list_id: u16, level: u8) -> Option<Bracket>;
}

/// In-memory provider seeded with a fixed template set.
///
/// Brackets are derived as 10-level bands clipped to the template's own
/// level range, with the top band absorbing max-level players.
#[derive(Debug, Default)]
pub struct StaticTemplateProvider {
    templates: HashMap<u16, BattlegroundTemplate>,
}

impl StaticTemplateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider seeded with the built-in list entries
    pub fn with_defaults() -> Self {
        let mut provider = Self::new();
        provider.insert(BattlegroundTemplate {
            list_id: 2,
            name: "Ravine Clash".to_string(),
            map_id: 489,
            arena: false,
            min_players_per_team: 10,
            max_players_per_team: 10,
            min_level: 10,
            max_level: 80,
        });
        provider.insert(BattlegroundTemplate {
            list_id: 3,
            name: "Highland Front".to_string(),
            map_id: 529,
            arena: false,
            min_players_per_team: 8,
            max_players_per_team: 15,
            min_level: 20,
            max_level: 80,
        });
        provider.insert(BattlegroundTemplate {
            list_id: 6,
            name: "Ring of Trials".to_string(),
            map_id: 559,
            arena: true,
            min_players_per_team: 2,
            max_players_per_team: 5,
            min_level: 70,
            max_level: 80,
        });
        provider
    }

    pub fn insert(&mut self, template: BattlegroundTemplate) {
        self.templates.insert(template.list_id, template);
    }
}

impl TemplateProvider for StaticTemplateProvider {
    fn template(&self, list_id: u16) -> Option<BattlegroundTemplate> {
        self.templates.get(&list_id).cloned()
    }

    fn bracket_for_level(&self, list_id: u16, level: u8) -> Option<Bracket> {
        let template = self.templates.get(&list_id)?;
        if level < template.min_level || level > template.max_level {
            return None;
        }
        let band = level / 10;
        let top_band = template.max_level / 10;
        let (id, min_level, max_level) = if band >= top_band {
            (top_band, top_band * 10, template.max_level)
        } else {
            (band, band * 10, band * 10 + 9)
        };
        Some(Bracket {
            id: BracketId(id),
            min_level: min_level.max(template.min_level),
            max_level,
        })
    }
}
