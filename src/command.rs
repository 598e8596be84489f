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

//! Local command buffer
//!
//! Unlike the world's deferred mode, a [`Commands`] buffer is owned by one
//! caller and records every call without coalescing. Nothing touches the
//! world until [`Commands::merge`].

use tracing::{debug, warn};

use crate::component::{Component, ComponentInfo, Payload};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::sparse_set::SparseSet;
use crate::world::World;

/// Recorded component write
pub struct SetCommand {
    pub entity: EntityId,
    pub component: ComponentInfo,
    payload: Option<Payload>,
}

impl std::fmt::Debug for SetCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetCommand")
            .field("entity", &self.entity)
            .field("component", &self.component)
            .finish()
    }
}

/// Recorded component removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsetCommand {
    pub entity: EntityId,
    pub component: ComponentInfo,
}

/// Command buffer for deferred operations
///
/// Merge order is fixed: every set, then every unset, then every despawn.
#[derive(Default)]
pub struct Commands {
    sets: Vec<SetCommand>,
    unsets: Vec<UnsetCommand>,
    despawns: SparseSet<EntityId>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sets: Vec::with_capacity(capacity),
            unsets: Vec::with_capacity(capacity),
            despawns: SparseSet::new(),
        }
    }

    fn check(world: &World, entity: EntityId) -> Result<()> {
        if world.exists(entity) {
            Ok(())
        } else {
            Err(EcsError::EntityNotFound(entity))
        }
    }

    /// Create an entity right away so later commands can target it.
    pub fn entity(&mut self, world: &mut World, id: Option<EntityId>) -> Result<EntityId> {
        world.new_empty(id)
    }

    /// Queue a value write.
    pub fn set<T: Component>(&mut self, world: &World, entity: EntityId, value: T) -> Result<()> {
        Self::check(world, entity)?;
        let info = world.register_component::<T>()?;
        assert!(!info.is_tag(), "{} is a tag; use `add`", info.type_name());
        self.sets.push(SetCommand {
            entity,
            component: info,
            payload: Some(Payload::new(info, value)),
        });
        Ok(())
    }

    /// Queue a tag.
    pub fn add<T: Component>(&mut self, world: &World, entity: EntityId) -> Result<()> {
        Self::check(world, entity)?;
        let info = world.register_component::<T>()?;
        assert!(info.is_tag(), "{} carries data; use `set`", info.type_name());
        self.sets.push(SetCommand {
            entity,
            component: info,
            payload: None,
        });
        Ok(())
    }

    pub fn add_pair(
        &mut self,
        world: &World,
        entity: EntityId,
        relation: EntityId,
        target: EntityId,
    ) -> Result<()> {
        Self::check(world, entity)?;
        self.sets.push(SetCommand {
            entity,
            component: ComponentInfo::tag(EntityId::pair(relation, target)),
            payload: None,
        });
        Ok(())
    }

    pub fn unset<T: Component>(&mut self, world: &World, entity: EntityId) -> Result<()> {
        Self::check(world, entity)?;
        let info = world.register_component::<T>()?;
        self.unsets.push(UnsetCommand {
            entity,
            component: info,
        });
        Ok(())
    }

    /// Queue a despawn. Repeats for the same entity collapse.
    pub fn delete(&mut self, world: &World, entity: EntityId) -> Result<()> {
        Self::check(world, entity)?;
        self.despawns.insert(entity.real_id(), entity);
        Ok(())
    }

    fn latest_set(&self, entity: EntityId, id: EntityId) -> Option<&SetCommand> {
        self.sets
            .iter()
            .rev()
            .find(|cmd| cmd.entity == entity && cmd.component.id == id)
    }

    fn pending_unset(&self, entity: EntityId, id: EntityId) -> bool {
        self.unsets
            .iter()
            .any(|cmd| cmd.entity == entity && cmd.component.id == id)
    }

    /// Whether `entity` will have `T` once this buffer merges.
    pub fn has<T: Component>(&self, world: &World, entity: EntityId) -> bool {
        let Some(info) = world.component::<T>() else {
            return false;
        };
        if self.pending_unset(entity, info.id) {
            return false;
        }
        self.latest_set(entity, info.id).is_some() || world.has::<T>(entity)
    }

    /// Latest queued value, else the stored one. Absent once an unset is queued.
    pub fn get<'a, T: Component>(&'a self, world: &'a World, entity: EntityId) -> Result<&'a T> {
        let info = world
            .component::<T>()
            .ok_or(EcsError::ComponentNotRegistered(std::any::type_name::<T>()))?;
        let missing = EcsError::ComponentNotFound {
            entity,
            component: info.id,
        };
        if self.pending_unset(entity, info.id) {
            return Err(missing);
        }

        if let Some(value) = self
            .latest_set(entity, info.id)
            .and_then(|cmd| cmd.payload.as_ref())
            .and_then(|payload| payload.downcast_ref::<T>())
        {
            return Ok(value);
        }
        let record = world.record(entity)?;
        world.live_ref::<T>(record, info).ok_or(missing)
    }

    /// Mutable view of the latest queued value, else the stored one.
    pub fn get_mut<'a, T: Component>(
        &'a mut self,
        world: &'a mut World,
        entity: EntityId,
    ) -> Result<&'a mut T> {
        let info = world
            .component::<T>()
            .ok_or(EcsError::ComponentNotRegistered(std::any::type_name::<T>()))?;
        let missing = EcsError::ComponentNotFound {
            entity,
            component: info.id,
        };
        if self.pending_unset(entity, info.id) {
            return Err(missing);
        }

        let queued = self
            .sets
            .iter_mut()
            .rev()
            .find(|cmd| cmd.entity == entity && cmd.component.id == info.id)
            .and_then(|cmd| cmd.payload.as_mut());
        if let Some(payload) = queued {
            return payload.downcast_mut::<T>().ok_or(missing);
        }
        let record = world.record(entity)?;
        world.live_mut::<T>(record, info).ok_or(missing)
    }

    pub fn len(&self) -> usize {
        self.sets.len() + self.unsets.len() + self.despawns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued command.
    pub fn clear(&mut self) {
        self.sets.clear();
        self.unsets.clear();
        self.despawns.clear();
    }

    /// Apply all commands to the world and clear the buffer
    ///
    /// Commands for entities that died since they were queued are skipped;
    /// the rest still apply. Returns the first failure, if any.
    pub fn merge(&mut self, world: &mut World) -> Result<()> {
        debug!(
            sets = self.sets.len(),
            unsets = self.unsets.len(),
            despawns = self.despawns.len(),
            "merging commands"
        );

        let sets = std::mem::take(&mut self.sets);
        let unsets = std::mem::take(&mut self.unsets);
        let despawns = std::mem::take(&mut self.despawns);

        let mut first_error = None;
        let mut record = |entity: EntityId, result: Result<()>| {
            if let Err(err) = result {
                warn!(entity = %entity, error = %err, "command dropped");
                first_error.get_or_insert(err);
            }
        };

        for cmd in sets {
            if world.exists(cmd.entity) {
                record(cmd.entity, world.set_component(cmd.entity, cmd.component, cmd.payload));
            }
        }
        for cmd in unsets {
            if world.exists(cmd.entity) {
                record(cmd.entity, world.unset_component(cmd.entity, cmd.component));
            }
        }
        for (_, &entity) in despawns.iter() {
            if world.exists(entity) {
                record(entity, world.delete(entity));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
