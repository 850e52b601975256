//! Player session lookups
//!
//! The queue core only needs to know whether a player is still online when
//! an invite goes out; everything else about sessions stays with the
//! embedding layer.

use crate::types::PlayerGuid;
use std::collections::HashSet;
use std::sync::RwLock;

/// Trait answering session questions for the queue core
pub trait SessionProvider: Send + Sync {
    fn is_online(&self, guid: PlayerGuid) -> bool;
}

/// Provider that reports everyone online; the production default when the
/// embedder drops players from queues on logout anyway.
#[derive(Debug, Default)]
pub struct AlwaysOnline;

impl SessionProvider for AlwaysOnline {
    fn is_online(&self, _guid: PlayerGuid) -> bool {
        true
    }
}

/// In-memory session registry, used in tests to simulate logouts
#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    online: RwLock<HashSet<PlayerGuid>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, guid: PlayerGuid) {
        if let Ok(mut online) = self.online.write() {
            online.insert(guid);
        }
    }

    pub fn disconnect(&self, guid: PlayerGuid) {
        if let Ok(mut online) = self.online.write() {
            online.remove(&guid);
        }
    }
}

impl SessionProvider for InMemorySessionRegistry {
    fn is_online(&self, guid: PlayerGuid) -> bool {
        self.online
            .read()
            .map(|online| online.contains(&guid))
            .unwrap_or(false)
    }
}
