// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entity allocation and the real-id → [`Record`] map.

use crate::entity::{EntityId, Record};
use crate::sparse_set::SparseSet;

#[derive(Debug, Clone, Copy)]
struct EntitySlot {
    /// Full identity including the live generation.
    id: EntityId,
    record: Record,
}

/// Generation-aware entity index.
///
/// Freed real ids are recycled with their generation bumped, so a handle kept
/// past `remove` never resolves to the new occupant.
pub struct EntityIndex {
    slots: SparseSet<EntitySlot>,
    free: Vec<EntityId>,
    max_id: u64,
}

impl EntityIndex {
    /// Ids at or below `reserved` are never handed out by [`EntityIndex::create`].
    pub fn new(reserved: u64) -> Self {
        Self {
            slots: SparseSet::new(),
            free: Vec::new(),
            max_id: reserved,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Allocate a fresh identity pointing at `record`.
    pub fn create(&mut self, record: Record) -> EntityId {
        while let Some(recycled) = self.free.pop() {
            // Slots claimed through `create_with` since the free are skipped.
            if !self.slots.contains(recycled.real_id()) {
                self.slots.insert(recycled.real_id(), EntitySlot { id: recycled, record });
                return recycled;
            }
        }

        self.max_id += 1;
        let id = EntityId::from_raw(self.max_id);
        self.slots.insert(id.real_id(), EntitySlot { id, record });
        id
    }

    /// Register a caller-chosen identity. Returns `false` when its slot is taken.
    pub fn create_with(&mut self, id: EntityId, record: Record) -> bool {
        let key = id.real_id();
        if self.slots.contains(key) {
            return false;
        }
        self.max_id = self.max_id.max(key);
        self.slots.insert(key, EntitySlot { id, record });
        true
    }

    /// True when the slot is occupied by exactly this generation.
    pub fn contains(&self, id: EntityId) -> bool {
        self.slot(id).is_some()
    }

    fn slot(&self, id: EntityId) -> Option<&EntitySlot> {
        self.slots.get(id.real_id()).filter(|slot| slot.id == id)
    }

    /// Live identity occupying the slot of `id`, whatever its generation.
    pub fn alive(&self, id: EntityId) -> Option<EntityId> {
        self.slots.get(id.real_id()).map(|slot| slot.id)
    }

    pub fn record(&self, id: EntityId) -> Option<Record> {
        self.slot(id).map(|slot| slot.record)
    }

    pub fn record_mut(&mut self, id: EntityId) -> Option<&mut Record> {
        self.slots
            .get_mut(id.real_id())
            .filter(|slot| slot.id == id)
            .map(|slot| &mut slot.record)
    }

    /// Free the slot of `id`. Returns the record it pointed to.
    pub fn remove(&mut self, id: EntityId) -> Option<Record> {
        if !self.contains(id) {
            return None;
        }
        let slot = self.slots.remove(id.real_id())?;
        self.free.push(slot.id.increase_generation());
        Some(slot.record)
    }

    /// Live identities in dense order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.iter().map(|(_, slot)| slot.id)
    }

    pub fn clear(&mut self, reserved: u64) {
        self.slots.clear();
        self.free.clear();
        self.max_id = reserved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::ArchetypeId;

    fn root() -> Record {
        Record {
            archetype: ArchetypeId::ROOT,
            row: 0,
        }
    }

    #[test]
    fn test_ids_start_above_reserved_range() {
        let mut index = EntityIndex::new(256);
        let id = index.create(root());
        assert_eq!(id.real_id(), 257);
        assert_eq!(id.generation(), 0);
    }

    #[test]
    fn test_recycle_bumps_generation() {
        let mut index = EntityIndex::new(0);
        let first = index.create(root());
        assert!(index.remove(first).is_some());
        assert!(!index.contains(first));

        let second = index.create(root());
        assert_eq!(second.real_id(), first.real_id());
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(index.contains(second));
        assert!(!index.contains(first));
        assert_eq!(index.alive(first), Some(second));
    }

    #[test]
    fn test_stale_remove_is_ignored() {
        let mut index = EntityIndex::new(0);
        let first = index.create(root());
        index.remove(first);
        let second = index.create(root());

        assert!(index.remove(first).is_none());
        assert!(index.contains(second));
    }

    #[test]
    fn test_generations_over_many_cycles() {
        let mut index = EntityIndex::new(0);
        let mut ids = Vec::new();
        for generation in 0..50u16 {
            ids.clear();
            for _ in 0..100 {
                let id = index.create(root());
                assert_eq!(id.generation(), generation);
                ids.push(id);
            }
            for id in &ids {
                index.remove(*id);
            }
        }
        assert!(index.is_empty());
    }

    #[test]
    fn test_create_with_claims_slot() {
        let mut index = EntityIndex::new(0);
        let chosen = EntityId::from_raw(40);
        assert!(index.create_with(chosen, root()));
        assert!(!index.create_with(chosen, root()));

        let next = index.create(root());
        assert_eq!(next.real_id(), 41);
    }

    #[test]
    fn test_record_mut_updates_location() {
        let mut index = EntityIndex::new(0);
        let id = index.create(root());
        if let Some(record) = index.record_mut(id) {
            record.row = 17;
        }
        assert_eq!(index.record(id).map(|r| r.row), Some(17));
    }
}
