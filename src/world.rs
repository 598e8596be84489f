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

//! World: entity lifecycle, archetype transitions and deferred mode
//!
//! While the world is locked every mutation is queued instead of applied.
//! Locks nest; the outermost unlock merges the queue.

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use ahash::AHashMap;
use smallvec::SmallVec;
#[cfg(feature = "profiling")]
use tracing::info_span;
use tracing::{debug, trace, warn};

use crate::archetype::{move_row, pair_mut, Archetype, ArchetypeId, ArchetypeSignature};
use crate::component::{Component, ComponentInfo, ComponentRegistry, Payload};
use crate::config::WorldConfig;
use crate::deferred::{DeferredContext, DeferredWriter, PendingRef};
use crate::entity::{EntityId, Record, WILDCARD};
use crate::entity_index::EntityIndex;
use crate::error::{EcsError, Result};
use crate::term::{compare_terms, match_signature, MatchResult, QueryTerm};

type SignatureKey = SmallVec<[EntityId; 8]>;

/// Borrowed component value, either stored or pending in the deferred queue.
pub enum ComponentRef<'a, T> {
    Live(&'a T),
    Pending(PendingRef<'a, T>),
}

impl<T: Component> Deref for ComponentRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            ComponentRef::Live(value) => *value,
            ComponentRef::Pending(pending) => &**pending,
        }
    }
}

impl<T: Component + std::fmt::Debug> std::fmt::Debug for ComponentRef<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}

/// Where an attach left the entity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Attached {
    pub(crate) archetype: ArchetypeId,
    pub(crate) row: usize,
    /// `None` for tags.
    pub(crate) column: Option<usize>,
    /// False when the component was already present.
    pub(crate) added: bool,
}

/// Lock guard returned by [`World::begin_deferred`].
///
/// Dereferences to the world; dropping it unlocks and, at the outermost
/// level, merges. This also happens while unwinding.
pub struct DeferredScope<'w> {
    world: &'w mut World,
}

impl Deref for DeferredScope<'_> {
    type Target = World;

    fn deref(&self) -> &World {
        &*self.world
    }
}

impl DerefMut for DeferredScope<'_> {
    fn deref_mut(&mut self) -> &mut World {
        &mut *self.world
    }
}

impl Drop for DeferredScope<'_> {
    fn drop(&mut self) {
        self.world.unlock();
    }
}

/// Archetype-based entity store
pub struct World {
    config: WorldConfig,
    entities: EntityIndex,
    archetypes: Vec<Archetype>,
    archetype_index: AHashMap<SignatureKey, ArchetypeId>,
    registry: ComponentRegistry,
    deferred: DeferredContext,
    lock_depth: u32,
    names: AHashMap<String, EntityId>,
    entity_names: AHashMap<EntityId, String>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let mut world = Self {
            entities: EntityIndex::new(config.max_component_id),
            archetypes: Vec::with_capacity(config.initial_archetype_capacity),
            archetype_index: AHashMap::new(),
            registry: ComponentRegistry::new(config.max_component_id),
            deferred: DeferredContext::new(),
            lock_depth: 0,
            names: AHashMap::new(),
            entity_names: AHashMap::new(),
            config,
        };
        world.reset_archetypes();
        world
    }

    fn reset_archetypes(&mut self) {
        self.archetypes.clear();
        self.archetype_index.clear();
        self.archetypes
            .push(Archetype::new(ArchetypeId::ROOT, ArchetypeSignature::new()));
        self.archetype_index
            .insert(SignatureKey::new(), ArchetypeId::ROOT);
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ---- entities ----

    /// Create an entity with no components.
    pub fn spawn(&mut self) -> EntityId {
        let entity = self.entities.create(Record {
            archetype: ArchetypeId::ROOT,
            row: 0,
        });
        self.place_in_root(entity);
        entity
    }

    /// Create an entity, or claim a caller-chosen id.
    ///
    /// An id that is already alive is returned as is.
    pub fn new_empty(&mut self, id: Option<EntityId>) -> Result<EntityId> {
        let Some(id) = id else {
            return Ok(self.spawn());
        };
        if self.entities.contains(id) {
            return Ok(id);
        }
        let placeholder = Record {
            archetype: ArchetypeId::ROOT,
            row: 0,
        };
        if !self.entities.create_with(id, placeholder) {
            return Err(EcsError::EntityIdInUse(id));
        }
        self.place_in_root(id);
        Ok(id)
    }

    fn place_in_root(&mut self, entity: EntityId) {
        let row = self.archetypes[ArchetypeId::ROOT.index()].push_entity(entity);
        if let Some(record) = self.entities.record_mut(entity) {
            record.row = row;
        }
        trace!(entity = %entity, "spawned entity");
    }

    /// Entity registered under `name`, created on first use.
    ///
    /// Returns `None` for an empty name.
    pub fn entity_named(&mut self, name: &str) -> Option<EntityId> {
        if name.is_empty() {
            return None;
        }
        if let Some(&entity) = self.names.get(name) {
            return Some(entity);
        }
        let entity = self.spawn();
        self.names.insert(name.to_owned(), entity);
        self.entity_names.insert(entity, name.to_owned());
        debug!(entity = %entity, entity_name = name, "named entity");
        Some(entity)
    }

    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    pub fn name(&self, entity: EntityId) -> Option<&str> {
        self.entity_names.get(&entity).map(String::as_str)
    }

    /// Delete an entity and drop its components. Queued while locked.
    ///
    /// Every entity holding a pair with `entity` as relation or target is
    /// deleted with it.
    pub fn delete(&mut self, entity: EntityId) -> Result<()> {
        if !self.entities.contains(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        if self.is_deferred() {
            self.deferred.destroy(entity);
            return Ok(());
        }
        self.despawn_now(entity)
    }

    fn despawn_now(&mut self, entity: EntityId) -> Result<()> {
        if !self.entities.contains(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        let mut doomed = vec![entity];
        while let Some(next) = doomed.pop() {
            if !self.entities.contains(next) {
                continue;
            }
            for holder in self.pair_holders(next) {
                if holder != next {
                    trace!(entity = %next, holder = %holder, "cascading delete");
                    doomed.push(holder);
                }
            }
            self.remove_entity(next)?;
        }
        Ok(())
    }

    /// Entities holding `(*, entity)` or `(entity, *)`.
    fn pair_holders(&self, entity: EntityId) -> Vec<EntityId> {
        let mut holders = self.query_entities(&[QueryTerm::with(EntityId::pair(WILDCARD, entity))]);
        holders.extend(self.query_entities(&[QueryTerm::with(EntityId::pair(entity, WILDCARD))]));
        holders
    }

    fn remove_entity(&mut self, entity: EntityId) -> Result<()> {
        let record = self
            .entities
            .remove(entity)
            .ok_or(EcsError::EntityNotFound(entity))?;
        let archetype = &mut self.archetypes[record.archetype.index()];
        // SAFETY: the record points at a live row, dropped before removal.
        let moved = unsafe {
            archetype.drop_row(record.row);
            archetype.swap_remove(record.row)
        };
        if let Some(moved) = moved {
            if let Some(moved_record) = self.entities.record_mut(moved) {
                moved_record.row = record.row;
            }
        }
        if let Some(name) = self.entity_names.remove(&entity) {
            self.names.remove(&name);
        }
        trace!(entity = %entity, "deleted entity");
        Ok(())
    }

    /// Liveness check. A pair is alive when both of its sides are.
    pub fn exists(&self, id: EntityId) -> bool {
        if id.is_pair() {
            return self.side_alive(id.first()) && self.side_alive(id.second());
        }
        self.entities.contains(id)
    }

    fn side_alive(&self, id: EntityId) -> bool {
        id.is_wildcard() || self.registry.contains_id(id) || self.entities.alive(id).is_some()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn record(&self, entity: EntityId) -> Result<Record> {
        self.entities
            .record(entity)
            .ok_or(EcsError::EntityNotFound(entity))
    }

    /// Live entities in index order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter()
    }

    // ---- components ----

    pub fn register_component<T: Component>(&self) -> Result<ComponentInfo> {
        self.registry.register::<T>()
    }

    /// Info of `T` if it has been registered.
    pub fn component<T: Component>(&self) -> Option<ComponentInfo> {
        self.registry.get::<T>()
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    fn info_of<T: Component>(&self) -> Result<ComponentInfo> {
        self.registry
            .get::<T>()
            .ok_or(EcsError::ComponentNotRegistered(std::any::type_name::<T>()))
    }

    /// Store `value` on `entity`, replacing any previous value.
    ///
    /// # Panics
    /// If `T` is zero-sized; use [`World::add`] for tags.
    pub fn set<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        let info = self.registry.register::<T>()?;
        self.set_payload(entity, Payload::new(info, value))
    }

    /// Attach tag `T`.
    ///
    /// # Panics
    /// If `T` carries data.
    pub fn add<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        let info = self.registry.register::<T>()?;
        self.set_component(entity, info, None)
    }

    pub fn unset<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        match self.registry.get::<T>() {
            Some(info) => self.unset_component(entity, info),
            None if self.entities.contains(entity) => Ok(()),
            None => Err(EcsError::EntityNotFound(entity)),
        }
    }

    /// Attach a raw id as a tag.
    pub fn set_id(&mut self, entity: EntityId, id: EntityId) -> Result<()> {
        let info = self
            .registry
            .get_by_id(id)
            .unwrap_or_else(|| ComponentInfo::tag(id));
        self.set_component(entity, info, None)
    }

    pub fn unset_id(&mut self, entity: EntityId, id: EntityId) -> Result<()> {
        let info = self
            .registry
            .get_by_id(id)
            .unwrap_or_else(|| ComponentInfo::tag(id));
        self.unset_component(entity, info)
    }

    /// Store a type-erased value. Commands and merges go through here.
    pub fn set_payload(&mut self, entity: EntityId, payload: Payload) -> Result<()> {
        let info = payload.info();
        self.set_component(entity, info, Some(payload))
    }

    pub(crate) fn set_component(
        &mut self,
        entity: EntityId,
        info: ComponentInfo,
        payload: Option<Payload>,
    ) -> Result<()> {
        assert_eq!(
            info.is_tag(),
            payload.is_none(),
            "component {} ({}) used as {}",
            info.id,
            info.type_name(),
            if info.is_tag() { "data" } else { "tag" }
        );
        if !self.entities.contains(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        if self.is_deferred() {
            self.deferred.set(entity, info, payload);
            return Ok(());
        }
        self.set_now(entity, info, payload)
    }

    fn set_now(&mut self, entity: EntityId, info: ComponentInfo, payload: Option<Payload>) -> Result<()> {
        let attached = self.attach_component(entity, info)?;
        let (Some(column), Some(payload)) = (attached.column, payload) else {
            return Ok(());
        };
        let archetype = &mut self.archetypes[attached.archetype.index()];
        // SAFETY: an existing value is dropped before the new one is written;
        // a fresh slot was reserved by the move.
        unsafe {
            if !attached.added {
                archetype.drop_value(column, attached.row);
            }
            if let Some(column) = archetype.column(column) {
                payload.write_to(column.ptr(attached.row));
            }
        }
        Ok(())
    }

    pub(crate) fn unset_component(&mut self, entity: EntityId, info: ComponentInfo) -> Result<()> {
        if !self.entities.contains(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        if self.is_deferred() {
            self.deferred.unset(entity, info);
            return Ok(());
        }
        self.detach_component(entity, info.id)
    }

    /// Move `entity` to the archetype that adds `info`.
    ///
    /// The caller must fill the new column slot when `added` is set.
    pub(crate) fn attach_component(&mut self, entity: EntityId, info: ComponentInfo) -> Result<Attached> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.attach", component = %info.id).entered();

        let record = self.record(entity)?;
        let current = &self.archetypes[record.archetype.index()];

        if let Some(existing) = current.signature().iter().find(|c| c.id == info.id) {
            assert_eq!(
                existing.size, info.size,
                "component {} attached with size {} but stored with size {}",
                info.id, info.size, existing.size
            );
            return Ok(Attached {
                archetype: record.archetype,
                row: record.row,
                column: current.column_index(info.id),
                added: false,
            });
        }

        let dest = self.add_transition(record.archetype, info);
        let row = self.relocate(entity, record, dest);
        Ok(Attached {
            archetype: dest,
            row,
            column: self.archetypes[dest.index()].column_index(info.id),
            added: true,
        })
    }

    /// Move `entity` to the archetype without `id`, dropping the value.
    /// Absent components are a no-op.
    pub(crate) fn detach_component(&mut self, entity: EntityId, id: EntityId) -> Result<()> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.detach", component = %id).entered();

        let record = self.record(entity)?;
        if !self.archetypes[record.archetype.index()].has(id) {
            return Ok(());
        }
        let dest = self.remove_transition(record.archetype, id);
        self.relocate(entity, record, dest);
        Ok(())
    }

    fn add_transition(&mut self, from: ArchetypeId, info: ComponentInfo) -> ArchetypeId {
        if let Some(to) = self.archetypes[from.index()].add_edge(info.id) {
            return to;
        }
        let mut signature = self.archetypes[from.index()].signature().clone();
        signature.push(info);
        let to = self.find_or_create_archetype(signature);
        self.archetypes[from.index()].set_add_edge(info.id, to);
        self.archetypes[to.index()].set_remove_edge(info.id, from);
        to
    }

    fn remove_transition(&mut self, from: ArchetypeId, id: EntityId) -> ArchetypeId {
        if let Some(to) = self.archetypes[from.index()].remove_edge(id) {
            return to;
        }
        let signature: ArchetypeSignature = self.archetypes[from.index()]
            .signature()
            .iter()
            .filter(|info| info.id != id)
            .copied()
            .collect();
        let to = self.find_or_create_archetype(signature);
        self.archetypes[from.index()].set_remove_edge(id, to);
        self.archetypes[to.index()].set_add_edge(id, from);
        to
    }

    fn find_or_create_archetype(&mut self, mut signature: ArchetypeSignature) -> ArchetypeId {
        signature.sort_by(|a, b| compare_terms(a.id, b.id));
        let key: SignatureKey = signature.iter().map(|info| info.id).collect();
        if let Some(&id) = self.archetype_index.get(&key) {
            return id;
        }

        let id = ArchetypeId::new(self.archetypes.len());
        debug!(archetype = id.index(), components = ?key, "created archetype");
        self.archetypes.push(Archetype::new(id, signature));
        self.archetype_index.insert(key, id);
        id
    }

    fn relocate(&mut self, entity: EntityId, record: Record, dest: ArchetypeId) -> usize {
        let (src, dst) = pair_mut(&mut self.archetypes, record.archetype, dest);
        // SAFETY: the record points at a live row of `src`.
        let (row, swapped) = unsafe { move_row(src, record.row, dst) };

        if let Some(swapped) = swapped {
            if let Some(swapped_record) = self.entities.record_mut(swapped) {
                swapped_record.row = record.row;
            }
        }
        if let Some(moved) = self.entities.record_mut(entity) {
            *moved = Record {
                archetype: dest,
                row,
            };
        }
        row
    }

    // ---- relations ----

    pub fn add_pair(&mut self, entity: EntityId, relation: EntityId, target: EntityId) -> Result<()> {
        self.set_id(entity, EntityId::pair(relation, target))
    }

    pub fn remove_pair(&mut self, entity: EntityId, relation: EntityId, target: EntityId) -> Result<()> {
        self.unset_id(entity, EntityId::pair(relation, target))
    }

    /// Store a `T` value under the `(relation, target)` pair.
    pub fn set_pair<T: Component>(
        &mut self,
        entity: EntityId,
        relation: EntityId,
        target: EntityId,
        value: T,
    ) -> Result<()> {
        let info = self
            .registry
            .register::<T>()?
            .with_id(EntityId::pair(relation, target));
        self.set_component(entity, info, Some(Payload::new(info, value)))
    }

    pub fn get_pair<T: Component>(
        &self,
        entity: EntityId,
        relation: EntityId,
        target: EntityId,
    ) -> Result<ComponentRef<'_, T>> {
        let info = self.info_of::<T>()?.with_id(EntityId::pair(relation, target));
        self.get_component(entity, info)
    }

    pub fn has_pair(&self, entity: EntityId, relation: EntityId, target: EntityId) -> bool {
        self.has_id(entity, EntityId::pair(relation, target))
    }

    /// The `index`-th target of `relation` on `entity`, in signature order.
    pub fn target(&self, entity: EntityId, relation: EntityId, index: usize) -> Option<EntityId> {
        let record = self.entities.record(entity)?;
        self.archetypes[record.archetype.index()]
            .component_ids()
            .filter(|id| id.is_pair() && id.first().real_id() == relation.real_id())
            .nth(index)
            .map(|pair| {
                let target = pair.second();
                self.entities.alive(target).unwrap_or(target)
            })
    }

    /// The `index`-th relation pairing `entity` with `target`, in signature order.
    pub fn action(&self, entity: EntityId, target: EntityId, index: usize) -> Option<EntityId> {
        let record = self.entities.record(entity)?;
        self.archetypes[record.archetype.index()]
            .component_ids()
            .filter(|id| id.is_pair() && id.second().real_id() == target.real_id())
            .nth(index)
            .map(|pair| {
                let relation = pair.first();
                self.entities.alive(relation).unwrap_or(relation)
            })
    }

    // ---- reads ----

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.registry
            .get::<T>()
            .is_some_and(|info| self.has_id(entity, info.id))
    }

    /// Membership including pending changes. Wildcard pairs match stored pairs.
    pub fn has_id(&self, entity: EntityId, id: EntityId) -> bool {
        let Some(record) = self.entities.record(entity) else {
            return false;
        };
        if self.is_deferred() && !id.has_wildcard() {
            if let Some(pending) = self.deferred.pending_state(entity, id) {
                return pending;
            }
        }
        self.archetypes[record.archetype.index()].has_term(id)
    }

    /// Read a component. Pending values win while the world is locked.
    pub fn get<T: Component>(&self, entity: EntityId) -> Result<ComponentRef<'_, T>> {
        let info = self.info_of::<T>()?;
        self.get_component(entity, info)
    }

    pub fn try_get<T: Component>(&self, entity: EntityId) -> Option<ComponentRef<'_, T>> {
        self.get(entity).ok()
    }

    fn get_component<T: Component>(
        &self,
        entity: EntityId,
        info: ComponentInfo,
    ) -> Result<ComponentRef<'_, T>> {
        let record = self.record(entity)?;
        let missing = || EcsError::ComponentNotFound {
            entity,
            component: info.id,
        };

        if self.is_deferred() {
            match self.deferred.pending_state(entity, info.id) {
                Some(true) if info.is_tag() => return Ok(ComponentRef::Live(tag_ref::<T>())),
                Some(true) => {
                    return self
                        .deferred
                        .get::<T>(entity, info.id)
                        .map(ComponentRef::Pending)
                        .ok_or_else(missing)
                }
                Some(false) => return Err(missing()),
                None => {}
            }
        }

        self.live_ref(record, info)
            .map(ComponentRef::Live)
            .ok_or_else(missing)
    }

    pub(crate) fn live_ref<T: Component>(&self, record: Record, info: ComponentInfo) -> Option<&T> {
        let archetype = &self.archetypes[record.archetype.index()];
        if !archetype.has(info.id) {
            return None;
        }
        if info.is_tag() {
            return Some(tag_ref::<T>());
        }
        let column = archetype.column(archetype.column_index(info.id)?)?;
        // SAFETY: the record points at a live, initialized row.
        Some(unsafe { column.get::<T>(record.row) })
    }

    pub(crate) fn live_mut<T: Component>(
        &mut self,
        record: Record,
        info: ComponentInfo,
    ) -> Option<&mut T> {
        let archetype = &mut self.archetypes[record.archetype.index()];
        if !archetype.has(info.id) {
            return None;
        }
        if info.is_tag() {
            return Some(tag_mut::<T>());
        }
        let index = archetype.column_index(info.id)?;
        let column = archetype.column_mut(index)?;
        // SAFETY: the record points at a live, initialized row.
        Some(unsafe { column.get_mut::<T>(record.row) })
    }

    /// Mutable access. Pending values win while the world is locked.
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Result<&mut T> {
        let info = self.info_of::<T>()?;
        let record = self.record(entity)?;
        let missing = || EcsError::ComponentNotFound {
            entity,
            component: info.id,
        };

        if self.is_deferred() {
            match self.deferred.pending_state(entity, info.id) {
                Some(true) if info.is_tag() => return Ok(tag_mut::<T>()),
                Some(true) => return self.deferred.get_mut::<T>(entity, info.id).ok_or_else(missing),
                Some(false) => return Err(missing()),
                None => {}
            }
        }

        self.live_mut(record, info).ok_or_else(missing)
    }

    /// Signature of the archetype holding `entity`.
    pub fn get_type(&self, entity: EntityId) -> Result<&ArchetypeSignature> {
        let record = self.record(entity)?;
        Ok(self.archetypes[record.archetype.index()].signature())
    }

    // ---- archetypes ----

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    /// Archetypes whose signature satisfies every term.
    pub fn matching_archetypes(&self, terms: &[QueryTerm]) -> Vec<ArchetypeId> {
        self.archetypes
            .iter()
            .filter(|archetype| match_signature(archetype.component_ids(), terms) == MatchResult::Found)
            .map(Archetype::id)
            .collect()
    }

    /// Entities of every matching archetype.
    pub fn query_entities(&self, terms: &[QueryTerm]) -> Vec<EntityId> {
        self.matching_archetypes(terms)
            .into_iter()
            .flat_map(|id| self.archetypes[id.index()].entities())
            .collect()
    }

    // ---- deferred mode ----

    /// Enter deferred mode. Nestable.
    pub fn lock(&mut self) {
        self.lock_depth += 1;
    }

    /// Leave one level of deferred mode; the outermost unlock merges.
    ///
    /// # Panics
    /// Without a matching [`World::lock`].
    pub fn unlock(&mut self) {
        assert!(self.lock_depth > 0, "unlock without a matching lock");
        self.lock_depth -= 1;
        if self.lock_depth == 0 {
            self.merge();
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.lock_depth > 0
    }

    pub fn lock_depth(&self) -> u32 {
        self.lock_depth
    }

    /// Operations waiting for the next merge.
    pub fn pending_ops(&self) -> usize {
        self.deferred.len()
    }

    /// Lock until the returned guard drops.
    pub fn begin_deferred(&mut self) -> DeferredScope<'_> {
        self.lock();
        DeferredScope { world: self }
    }

    /// Run `action` in deferred mode. Unlocks even if `action` panics.
    pub fn deferred<R>(&mut self, action: impl FnOnce(&mut World) -> R) -> R {
        let mut scope = self.begin_deferred();
        action(&mut *scope)
    }

    /// Thread-shareable writer; only available while locked.
    pub fn deferred_writer(&self) -> Result<DeferredWriter<'_>> {
        DeferredWriter::new(self)
    }

    pub(crate) fn deferred_context(&self) -> &DeferredContext {
        &self.deferred
    }

    fn merge(&mut self) {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.merge", pending = self.deferred.len()).entered();

        let plan = self.deferred.drain();
        if !plan.sets.is_empty() || !plan.unsets.is_empty() || !plan.destroys.is_empty() {
            debug!(
                sets = plan.sets.len(),
                unsets = plan.unsets.len(),
                destroys = plan.destroys.len(),
                "merging deferred operations"
            );
        }

        for (entity, info, payload) in plan.sets {
            if !self.entities.contains(entity) {
                continue;
            }
            if let Err(err) = self.set_now(entity, info, payload) {
                warn!(entity = %entity, error = %err, "deferred set dropped");
            }
        }
        for (entity, info) in plan.unsets {
            if !self.entities.contains(entity) {
                continue;
            }
            if let Err(err) = self.detach_component(entity, info.id) {
                warn!(entity = %entity, error = %err, "deferred unset dropped");
            }
        }
        for entity in plan.destroys {
            if self.entities.contains(entity) {
                if let Err(err) = self.despawn_now(entity) {
                    warn!(entity = %entity, error = %err, "deferred delete dropped");
                }
            }
        }
    }

    /// Remove every entity and archetype. Registered components stay.
    ///
    /// # Panics
    /// While the world is locked.
    pub fn clear(&mut self) {
        assert!(!self.is_deferred(), "cannot clear a locked world");
        drop(self.deferred.drain());
        self.reset_archetypes();
        self.entities.clear(self.config.max_component_id);
        self.names.clear();
        self.entity_names.clear();
    }
}

fn tag_ref<'a, T>() -> &'a T {
    assert_eq!(std::mem::size_of::<T>(), 0, "tag read through a data type");
    // SAFETY: zero-sized reads through a dangling aligned pointer are valid.
    unsafe { NonNull::<T>::dangling().as_ref() }
}

fn tag_mut<'a, T>() -> &'a mut T {
    assert_eq!(std::mem::size_of::<T>(), 0, "tag read through a data type");
    // SAFETY: as above.
    unsafe { NonNull::<T>::dangling().as_mut() }
}
