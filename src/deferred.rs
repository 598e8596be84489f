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

//! Deferred mutation queue used while a world is locked
//!
//! Writers push operations onto a lock-free queue and record the latest
//! pending state per `(entity, component)` in a shadow map. The shadow lets
//! reads observe pending values and collapses repeated sets into one queued
//! operation. On merge, the queue is resolved against the shadow and applied
//! in three phases: sets, then unsets, then destroys.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use ahash::AHashMap;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::component::{Component, ComponentInfo, Payload};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::world::{ComponentRef, World};

/// A queued structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredOp {
    Set {
        entity: EntityId,
        component: ComponentInfo,
    },
    Unset {
        entity: EntityId,
        component: ComponentInfo,
    },
    Destroy {
        entity: EntityId,
    },
}

enum Pending {
    /// `None` for tags. Shared with outstanding [`PendingRef`]s.
    Set(Option<Arc<Payload>>),
    Unset,
}

type Shadow = AHashMap<EntityId, FxHashMap<EntityId, Pending>>;

/// Read handle to a value waiting in the deferred queue.
///
/// Holds no lock. A later set on the same component swaps in a new value;
/// this handle keeps seeing the one it was created from. Borrows the
/// context, so every handle is gone by the time the queue drains.
pub struct PendingRef<'a, T> {
    payload: Arc<Payload>,
    _marker: PhantomData<(&'a DeferredContext, fn() -> T)>,
}

impl<T: Component> PendingRef<'_, T> {
    fn new(payload: Arc<Payload>) -> Option<Self> {
        payload.downcast_ref::<T>()?;
        Some(Self {
            payload,
            _marker: PhantomData,
        })
    }
}

impl<T: Component> Deref for PendingRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the payload type was checked in `new`.
        unsafe { self.payload.get_unchecked::<T>() }
    }
}

/// Resolved operations, in application order.
#[derive(Default)]
pub(crate) struct MergePlan {
    pub(crate) sets: Vec<(EntityId, ComponentInfo, Option<Payload>)>,
    pub(crate) unsets: Vec<(EntityId, ComponentInfo)>,
    pub(crate) destroys: Vec<EntityId>,
}

/// Queue plus shadow state for one world.
#[derive(Default)]
pub struct DeferredContext {
    ops: SegQueue<DeferredOp>,
    shadow: Mutex<Shadow>,
}

impl DeferredContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Record a pending set. A set over a pending set only swaps the value.
    pub(crate) fn set(&self, entity: EntityId, component: ComponentInfo, payload: Option<Payload>) {
        let payload = payload.map(Arc::new);
        let mut shadow = self.shadow.lock();
        let slot = shadow.entry(entity).or_default();
        match slot.get_mut(&component.id) {
            Some(Pending::Set(value)) => {
                *value = payload;
                trace!(entity = %entity, component = %component.id, "coalesced deferred set");
            }
            Some(state) => {
                *state = Pending::Set(payload);
                self.ops.push(DeferredOp::Set { entity, component });
            }
            None => {
                slot.insert(component.id, Pending::Set(payload));
                self.ops.push(DeferredOp::Set { entity, component });
            }
        }
    }

    pub(crate) fn unset(&self, entity: EntityId, component: ComponentInfo) {
        let mut shadow = self.shadow.lock();
        shadow
            .entry(entity)
            .or_default()
            .insert(component.id, Pending::Unset);
        self.ops.push(DeferredOp::Unset { entity, component });
    }

    /// Queue a destroy and forget the entity's pending state.
    pub(crate) fn destroy(&self, entity: EntityId) {
        self.shadow.lock().remove(&entity);
        self.ops.push(DeferredOp::Destroy { entity });
    }

    /// `Some(true)` for a pending set, `Some(false)` for a pending unset.
    pub(crate) fn pending_state(&self, entity: EntityId, component: EntityId) -> Option<bool> {
        let shadow = self.shadow.lock();
        let pending = shadow.get(&entity)?.get(&component)?;
        Some(matches!(pending, Pending::Set(_)))
    }

    /// Pending value of a set. The shadow lock is released on return.
    pub(crate) fn get<T: Component>(
        &self,
        entity: EntityId,
        component: EntityId,
    ) -> Option<PendingRef<'_, T>> {
        let shadow = self.shadow.lock();
        let payload = match shadow.get(&entity)?.get(&component)? {
            Pending::Set(Some(payload)) => Arc::clone(payload),
            _ => return None,
        };
        drop(shadow);
        PendingRef::new(payload)
    }

    pub(crate) fn get_mut<T: Component>(
        &mut self,
        entity: EntityId,
        component: EntityId,
    ) -> Option<&mut T> {
        match self.shadow.get_mut().get_mut(&entity)?.get_mut(&component)? {
            Pending::Set(Some(payload)) => Arc::get_mut(payload)?.downcast_mut::<T>(),
            _ => None,
        }
    }

    /// Empty the queue and resolve every operation against the final shadow.
    ///
    /// A set survives only while its component is still pending-set; an
    /// unset survives only while it is still pending-unset. Each pending set
    /// yields its payload once.
    pub(crate) fn drain(&mut self) -> MergePlan {
        let mut shadow = std::mem::take(self.shadow.get_mut());
        let ops: Vec<DeferredOp> = std::iter::from_fn(|| self.ops.pop()).collect();
        let mut plan = MergePlan::default();

        for op in &ops {
            if let DeferredOp::Unset { entity, component } = *op {
                let still_unset = shadow
                    .get(&entity)
                    .and_then(|slot| slot.get(&component.id))
                    .is_some_and(|pending| matches!(pending, Pending::Unset));
                if still_unset {
                    plan.unsets.push((entity, component));
                }
            }
        }

        for op in ops {
            match op {
                DeferredOp::Set { entity, component } => {
                    let Some(slot) = shadow.get_mut(&entity) else {
                        continue;
                    };
                    if !matches!(slot.get(&component.id), Some(Pending::Set(_))) {
                        continue;
                    }
                    let Some(Pending::Set(payload)) = slot.remove(&component.id) else {
                        continue;
                    };
                    // Unreachable while `PendingRef`s are alive: they borrow `self`.
                    match payload.map(Arc::try_unwrap).transpose() {
                        Ok(payload) => plan.sets.push((entity, component, payload)),
                        Err(_) => warn!(
                            entity = %entity,
                            component = %component.id,
                            "pending value still shared; set dropped"
                        ),
                    }
                }
                DeferredOp::Destroy { entity } => plan.destroys.push(entity),
                DeferredOp::Unset { .. } => {}
            }
        }

        plan
    }
}

/// Shared handle for queueing changes from many threads while the world is
/// locked.
///
/// Obtained from [`World::deferred_writer`]. All writes land in the deferred
/// queue; reads see pending values.
#[derive(Clone, Copy)]
pub struct DeferredWriter<'w> {
    world: &'w World,
}

impl<'w> DeferredWriter<'w> {
    pub(crate) fn new(world: &'w World) -> Result<Self> {
        if !world.is_deferred() {
            return Err(EcsError::NotDeferred);
        }
        Ok(Self { world })
    }

    fn check(&self, entity: EntityId) -> Result<()> {
        if self.world.exists(entity) {
            Ok(())
        } else {
            Err(EcsError::EntityNotFound(entity))
        }
    }

    pub fn set<T: Component>(&self, entity: EntityId, value: T) -> Result<()> {
        self.check(entity)?;
        let info = self.world.register_component::<T>()?;
        assert!(!info.is_tag(), "{} is a tag; use `add`", info.type_name());
        self.world
            .deferred_context()
            .set(entity, info, Some(Payload::new(info, value)));
        Ok(())
    }

    pub fn add<T: Component>(&self, entity: EntityId) -> Result<()> {
        self.check(entity)?;
        let info = self.world.register_component::<T>()?;
        assert!(info.is_tag(), "{} carries data; use `set`", info.type_name());
        self.world.deferred_context().set(entity, info, None);
        Ok(())
    }

    pub fn unset<T: Component>(&self, entity: EntityId) -> Result<()> {
        self.check(entity)?;
        if let Some(info) = self.world.component::<T>() {
            self.world.deferred_context().unset(entity, info);
        }
        Ok(())
    }

    pub fn add_pair(&self, entity: EntityId, relation: EntityId, target: EntityId) -> Result<()> {
        self.check(entity)?;
        let info = ComponentInfo::tag(EntityId::pair(relation, target));
        self.world.deferred_context().set(entity, info, None);
        Ok(())
    }

    pub fn remove_pair(&self, entity: EntityId, relation: EntityId, target: EntityId) -> Result<()> {
        self.check(entity)?;
        let info = ComponentInfo::tag(EntityId::pair(relation, target));
        self.world.deferred_context().unset(entity, info);
        Ok(())
    }

    pub fn delete(&self, entity: EntityId) -> Result<()> {
        self.check(entity)?;
        self.world.deferred_context().destroy(entity);
        Ok(())
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.world.has::<T>(entity)
    }

    /// Pending or live value.
    pub fn get<T: Component>(&self, entity: EntityId) -> Result<ComponentRef<'w, T>> {
        self.world.get::<T>(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;

    fn setup() -> (ComponentRegistry, ComponentInfo, EntityId) {
        let registry = ComponentRegistry::new(256);
        let info = registry.register::<u32>().unwrap();
        (registry, info, EntityId::from_raw(300))
    }

    #[test]
    fn test_repeated_sets_coalesce() {
        let (_registry, info, entity) = setup();
        let mut ctx = DeferredContext::new();
        ctx.set(entity, info, Some(Payload::new(info, 1u32)));
        ctx.set(entity, info, Some(Payload::new(info, 2u32)));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.get_mut::<u32>(entity, info.id).copied(), Some(2));

        let plan = ctx.drain();
        assert_eq!(plan.sets.len(), 1);
        let value = plan.sets[0].2.as_ref().and_then(|p| p.downcast_ref::<u32>());
        assert_eq!(value, Some(&2));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_unset_after_set_wins() {
        let (_registry, info, entity) = setup();
        let mut ctx = DeferredContext::new();
        ctx.set(entity, info, Some(Payload::new(info, 1u32)));
        ctx.unset(entity, info);
        assert_eq!(ctx.pending_state(entity, info.id), Some(false));

        let plan = ctx.drain();
        assert!(plan.sets.is_empty());
        assert_eq!(plan.unsets, vec![(entity, info)]);
    }

    #[test]
    fn test_set_after_unset_wins() {
        let (_registry, info, entity) = setup();
        let mut ctx = DeferredContext::new();
        ctx.unset(entity, info);
        ctx.set(entity, info, Some(Payload::new(info, 9u32)));
        assert_eq!(ctx.len(), 2);

        let plan = ctx.drain();
        assert!(plan.unsets.is_empty());
        assert_eq!(plan.sets.len(), 1);
    }

    #[test]
    fn test_destroy_is_kept_in_order() {
        let (_registry, _info, entity) = setup();
        let mut ctx = DeferredContext::new();
        ctx.destroy(entity);
        ctx.destroy(EntityId::from_raw(301));
        let plan = ctx.drain();
        assert_eq!(plan.destroys, vec![entity, EntityId::from_raw(301)]);
    }

    #[test]
    fn test_get_reads_pending_value() {
        let (_registry, info, entity) = setup();
        let ctx = DeferredContext::new();
        ctx.set(entity, info, Some(Payload::new(info, 5u32)));

        let first = ctx.get::<u32>(entity, info.id).unwrap();
        let second = ctx.get::<u32>(entity, info.id).unwrap();
        assert_eq!((*first, *second), (5, 5));
        assert!(ctx.get::<u64>(entity, info.id).is_none());

        // A coalesced set swaps the value; held handles keep the old one.
        ctx.set(entity, info, Some(Payload::new(info, 6u32)));
        assert_eq!(*first, 5);
        assert_eq!(ctx.get::<u32>(entity, info.id).map(|v| *v), Some(6));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_destroy_forgets_pending_state() {
        let (_registry, info, entity) = setup();
        let mut ctx = DeferredContext::new();
        ctx.set(entity, info, Some(Payload::new(info, 1u32)));
        ctx.destroy(entity);
        assert_eq!(ctx.pending_state(entity, info.id), None);
        assert!(ctx.get::<u32>(entity, info.id).is_none());

        let plan = ctx.drain();
        assert!(plan.sets.is_empty());
        assert_eq!(plan.destroys, vec![entity]);
    }
}
