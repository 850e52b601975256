//! Selection pools
//!
//! A [`SelectionPool`] is a transient, per-matching-pass accumulator that
//! stages candidate groups for one side of an instance. It never outlives a
//! single pass: pools are cleared before every policy runs.

use crate::queue::entry::{GroupId, GroupQueueInfo};

/// Staged groups for one faction of a forming match
#[derive(Debug, Default, Clone)]
pub struct SelectionPool {
    selected: Vec<(GroupId, usize)>,
    player_count: u32,
}

impl SelectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.player_count = 0;
    }

    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    pub fn group_count(&self) -> usize {
        self.selected.len()
    }

    /// Staged groups with their member counts, in staging order
    pub fn groups(&self) -> &[(GroupId, usize)] {
        &self.selected
    }

    pub fn contains(&self, id: GroupId) -> bool {
        self.selected.iter().any(|(g, _)| *g == id)
    }

    pub fn last(&self) -> Option<GroupId> {
        self.selected.last().map(|(g, _)| *g)
    }

    /// Try to stage a group without exceeding `desired_count` players.
    ///
    /// Returns true while the caller should keep scanning its bucket: either
    /// the group was staged, or it didn't fit but the pool is still short of
    /// the cap (a later, smaller group might fit).
    pub fn add_group(&mut self, group: &GroupQueueInfo, desired_count: u32) -> bool {
        let size = group.size() as u32;
        if !group.is_invited() && desired_count >= self.player_count + size {
            self.selected.push((group.id, group.size()));
            self.player_count += size;
            return true;
        }
        self.player_count < desired_count
    }

    /// Remove the staged entry whose member count is closest to `size`,
    /// preferring exact/near matches over larger groups.
    ///
    /// Returns whether the removed entry was not larger than `size + 1`,
    /// signalling the balancing loop to keep iterating.
    pub fn kick_group(&mut self, size: usize) -> bool {
        if self.selected.is_empty() {
            return false;
        }

        let mut kick = 0;
        let mut near_match = false;
        for (index, (_, count)) in self.selected.iter().enumerate() {
            if count.abs_diff(size) <= 1 {
                kick = index;
                near_match = true;
            } else if !near_match && *count >= self.selected[kick].1 {
                kick = index;
            }
        }

        let (_, removed) = self.selected.remove(kick);
        self.player_count -= removed as u32;
        removed <= size + 1
    }
}
