//! Instance registry
//!
//! Owns every live [`Battleground`] behind its own lock, the per-queue
//! free-slot lists that the matching pass fills from, and the dense
//! client-facing instance id pools. Engine instance ids are globally unique
//! and monotonically increasing; client instance ids are the lowest unused
//! positive integer per (queue, bracket) so selection screens stay dense.

use crate::battleground::instance::Battleground;
use crate::battleground::template::BattlegroundTemplate;
use crate::config::QueueSettings;
use crate::error::{MatchmakingError, Result};
use crate::types::{BracketId, InstanceId, QueueKey};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Shared registry of live instances and their free-slot lists
#[derive(Debug, Default)]
pub struct BattlegroundRegistry {
    instances: RwLock<HashMap<InstanceId, Arc<Mutex<Battleground>>>>,
    /// Instances still accepting invitations, per queue, oldest first
    free_slots: Mutex<HashMap<QueueKey, Vec<InstanceId>>>,
    /// Client instance ids in use, per (queue, bracket)
    client_ids: Mutex<HashMap<(QueueKey, BracketId), BTreeSet<u32>>>,
    next_instance_id: AtomicU32,
}

impl BattlegroundRegistry {
    pub fn new() -> Self {
        Self {
            next_instance_id: AtomicU32::new(1),
            ..Self::default()
        }
    }

    /// Create a fresh instance from a template and open it for joining.
    ///
    /// The caller registers it in the free-slot list once the initial
    /// invitations are out; rated matches are never registered there.
    pub fn create_instance(
        &self,
        template: &BattlegroundTemplate,
        key: QueueKey,
        bracket: BracketId,
        settings: &QueueSettings,
    ) -> Result<(InstanceId, Arc<Mutex<Battleground>>)> {
        let instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        let client_instance_id = self.claim_client_instance_id(key, bracket)?;

        let mut battleground = Battleground::new(
            instance_id,
            client_instance_id,
            template,
            key,
            bracket,
            settings,
        )?;
        battleground.open_for_join();

        let shared = Arc::new(Mutex::new(battleground));
        self.instances
            .write()
            .map_err(|_| poisoned("instances"))?
            .insert(instance_id, Arc::clone(&shared));

        info!(
            "created {} instance {} (client id {}) for {} bracket {:?}",
            template.name, instance_id, client_instance_id, key, bracket
        );
        Ok((instance_id, shared))
    }

    pub fn get(&self, instance_id: InstanceId) -> Option<Arc<Mutex<Battleground>>> {
        self.instances.read().ok()?.get(&instance_id).cloned()
    }

    pub fn all(&self) -> Vec<(InstanceId, Arc<Mutex<Battleground>>)> {
        self.instances
            .read()
            .map(|map| map.iter().map(|(id, bg)| (*id, Arc::clone(bg))).collect())
            .unwrap_or_default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Drop an instance, releasing its client id slot.
    pub fn remove(&self, instance_id: InstanceId) -> Result<()> {
        let removed = self
            .instances
            .write()
            .map_err(|_| poisoned("instances"))?
            .remove(&instance_id);
        let Some(battleground) = removed else {
            return Err(MatchmakingError::InstanceNotFound { instance_id }.into());
        };

        let (key, bracket, client_id) = {
            let bg = battleground.lock().map_err(|_| poisoned("instance"))?;
            (bg.key(), bg.bracket(), bg.client_instance_id())
        };
        self.unregister_free_slots(key, instance_id)?;
        if let Ok(mut ids) = self.client_ids.lock() {
            if let Some(pool) = ids.get_mut(&(key, bracket)) {
                pool.remove(&client_id);
            }
        }
        debug!("removed instance {} from {}", instance_id, key);
        Ok(())
    }

    /// Make an instance visible to the queue's fill pass.
    pub fn register_free_slots(&self, key: QueueKey, instance_id: InstanceId) -> Result<()> {
        let mut slots = self.free_slots.lock().map_err(|_| poisoned("free slots"))?;
        let list = slots.entry(key).or_default();
        if !list.contains(&instance_id) {
            list.push(instance_id);
        }
        Ok(())
    }

    pub fn unregister_free_slots(&self, key: QueueKey, instance_id: InstanceId) -> Result<()> {
        let mut slots = self.free_slots.lock().map_err(|_| poisoned("free slots"))?;
        if let Some(list) = slots.get_mut(&key) {
            list.retain(|id| *id != instance_id);
        }
        Ok(())
    }

    /// Instances currently accepting invitations for a queue, oldest first.
    pub fn free_slot_instances(
        &self,
        key: QueueKey,
    ) -> Vec<(InstanceId, Arc<Mutex<Battleground>>)> {
        let ids = self
            .free_slots
            .lock()
            .map(|slots| slots.get(&key).cloned().unwrap_or_default())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.get(id).map(|bg| (id, bg)))
            .collect()
    }

    /// Lowest unused positive client instance id for (queue, bracket).
    fn claim_client_instance_id(&self, key: QueueKey, bracket: BracketId) -> Result<u32> {
        let mut ids = self.client_ids.lock().map_err(|_| poisoned("client ids"))?;
        let pool = ids.entry((key, bracket)).or_default();
        let mut candidate = 1;
        for used in pool.iter() {
            if *used != candidate {
                break;
            }
            candidate += 1;
        }
        pool.insert(candidate);
        Ok(candidate)
    }
}

fn poisoned(what: &str) -> anyhow::Error {
    MatchmakingError::InternalError {
        message: format!("{} lock poisoned", what),
    }
    .into()
}
