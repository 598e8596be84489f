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

//! Component metadata, registration and type-erased values
//!
//! Every component type gets a stable [`EntityId`] from the reserved range
//! `2..=max_component_id`. Zero-sized types are tags: they take part in
//! archetype signatures but never get a storage column.

use std::alloc::{self, Layout};
use std::any::TypeId;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::entity::EntityId;
use crate::error::{EcsError, Result};

/// Marker trait for components
///
/// Components must be 'static (no borrowed data)
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// First id handed to a component type. `0` is null and `1` is the wildcard.
pub const FIRST_COMPONENT_ID: u64 = 2;

/// Drop function for a type-erased value
pub type DropFn = unsafe fn(*mut u8);

unsafe fn drop_value<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

/// Id plus storage layout of a component.
///
/// Two infos are equal when id and size match; layout and drop glue follow
/// from the id.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    pub id: EntityId,
    /// Payload size in bytes. Zero means tag.
    pub size: usize,
    pub(crate) layout: Layout,
    pub(crate) drop_fn: Option<DropFn>,
    pub(crate) type_id: Option<TypeId>,
    pub(crate) name: &'static str,
}

impl ComponentInfo {
    fn of<T: Component>(id: EntityId) -> Self {
        let layout = Layout::new::<T>();
        Self {
            id,
            size: layout.size(),
            layout,
            drop_fn: std::mem::needs_drop::<T>().then_some(drop_value::<T> as DropFn),
            type_id: Some(TypeId::of::<T>()),
            name: std::any::type_name::<T>(),
        }
    }

    /// Untyped tag, used for raw ids and relation pairs.
    pub fn tag(id: EntityId) -> Self {
        Self {
            id,
            size: 0,
            layout: Layout::new::<()>(),
            drop_fn: None,
            type_id: None,
            name: "tag",
        }
    }

    /// Same layout under another id. Used for data-carrying pairs.
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    #[inline]
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }

    pub fn type_name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub(crate) fn is_type<T: 'static>(&self) -> bool {
        self.type_id == Some(TypeId::of::<T>())
    }
}

impl PartialEq for ComponentInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.size == other.size
    }
}

impl Eq for ComponentInfo {}

impl std::fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("name", &self.name)
            .finish()
    }
}

/// Type-id → component id table.
///
/// Registration only needs `&self`, so worker threads holding a shared world
/// can register types on first use.
pub struct ComponentRegistry {
    by_type: RwLock<AHashMap<TypeId, ComponentInfo>>,
    by_id: RwLock<AHashMap<EntityId, ComponentInfo>>,
    next_id: AtomicU64,
    max_id: u64,
}

impl ComponentRegistry {
    pub fn new(max_component_id: u64) -> Self {
        Self {
            by_type: RwLock::new(AHashMap::new()),
            by_id: RwLock::new(AHashMap::new()),
            next_id: AtomicU64::new(FIRST_COMPONENT_ID),
            max_id: max_component_id,
        }
    }

    /// Id of `T`, registering it on first use.
    pub fn register<T: Component>(&self) -> Result<ComponentInfo> {
        let type_id = TypeId::of::<T>();
        if let Some(info) = self.by_type.read().get(&type_id) {
            return Ok(*info);
        }

        let mut by_type = self.by_type.write();
        // Another thread may have won the race for the write lock.
        if let Some(info) = by_type.get(&type_id) {
            return Ok(*info);
        }

        let raw = self.next_id.load(Ordering::Relaxed);
        if raw > self.max_id {
            return Err(EcsError::ComponentLimitExceeded { limit: self.max_id });
        }
        self.next_id.store(raw + 1, Ordering::Relaxed);

        let info = ComponentInfo::of::<T>(EntityId::from_raw(raw));
        by_type.insert(type_id, info);
        self.by_id.write().insert(info.id, info);

        tracing::debug!(
            component = info.name,
            id = raw,
            size = info.size,
            "registered component"
        );
        Ok(info)
    }

    /// Info of `T` without registering it.
    pub fn get<T: Component>(&self) -> Option<ComponentInfo> {
        self.by_type.read().get(&TypeId::of::<T>()).copied()
    }

    pub fn get_by_id(&self, id: EntityId) -> Option<ComponentInfo> {
        self.by_id.read().get(&id).copied()
    }

    pub fn contains_id(&self, id: EntityId) -> bool {
        self.by_id.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_type.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_id(&self) -> u64 {
        self.max_id
    }
}

/// Owned, type-erased component value.
///
/// Stored with the alignment of its type. Dropping a payload drops the value
/// unless it was moved out with [`Payload::write_to`].
pub struct Payload {
    ptr: NonNull<u8>,
    info: ComponentInfo,
}

// SAFETY: payloads are only built from `T: Component`, which is Send + Sync.
unsafe impl Send for Payload {}
unsafe impl Sync for Payload {}

impl Payload {
    pub fn new<T: Component>(info: ComponentInfo, value: T) -> Self {
        assert!(
            info.is_type::<T>(),
            "payload type {} does not match component {}",
            std::any::type_name::<T>(),
            info.name
        );

        let ptr = if info.size == 0 {
            dangling(info.layout)
        } else {
            // SAFETY: layout has non-zero size.
            let raw = unsafe { alloc::alloc(info.layout) };
            match NonNull::new(raw) {
                Some(ptr) => ptr,
                None => alloc::handle_alloc_error(info.layout),
            }
        };
        // SAFETY: `ptr` is valid and aligned for `T`.
        unsafe { std::ptr::write(ptr.as_ptr() as *mut T, value) };
        Self { ptr, info }
    }

    pub fn info(&self) -> ComponentInfo {
        self.info
    }

    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        // SAFETY: type id checked; the value stays initialized while owned.
        self.info
            .is_type::<T>()
            .then(|| unsafe { &*(self.ptr.as_ptr() as *const T) })
    }

    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        // SAFETY: as above, and `&mut self` gives exclusive access.
        self.info
            .is_type::<T>()
            .then(|| unsafe { &mut *(self.ptr.as_ptr() as *mut T) })
    }

    /// # Safety
    /// `T` must be the component type this payload was built with.
    pub(crate) unsafe fn get_unchecked<T>(&self) -> &T {
        &*(self.ptr.as_ptr() as *const T)
    }

    /// Move the value into `dst`, consuming the payload without dropping it.
    ///
    /// # Safety
    /// `dst` must be valid for writes of `info().size` bytes, aligned for the
    /// component type, and must not hold a live value.
    pub(crate) unsafe fn write_to(self, dst: *mut u8) {
        std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), dst, self.info.size);
        let this = std::mem::ManuallyDrop::new(self);
        this.dealloc();
    }

    fn dealloc(&self) {
        if self.info.size != 0 {
            // SAFETY: allocated in `new` with this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), self.info.layout) };
        }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.info.drop_fn {
            // SAFETY: the value is still owned by this payload.
            unsafe { drop_fn(self.ptr.as_ptr()) };
        }
        self.dealloc();
    }
}

/// Well-aligned non-null pointer for zero-sized values.
pub(crate) fn dangling(layout: Layout) -> NonNull<u8> {
    // Alignment is a non-zero power of two.
    NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    struct Marker;

    #[test]
    fn test_register_is_idempotent() {
        let registry = ComponentRegistry::new(256);
        let a = registry.register::<Position>().unwrap();
        let b = registry.register::<Position>().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id.to_raw(), FIRST_COMPONENT_ID);
        assert_eq!(a.size, std::mem::size_of::<Position>());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zero_sized_types_are_tags() {
        let registry = ComponentRegistry::new(256);
        let info = registry.register::<Marker>().unwrap();
        assert!(info.is_tag());
        assert_eq!(registry.get_by_id(info.id), Some(info));
    }

    #[test]
    fn test_limit_exceeded() {
        let registry = ComponentRegistry::new(2);
        registry.register::<u8>().unwrap();
        assert_eq!(
            registry.register::<u16>(),
            Err(EcsError::ComponentLimitExceeded { limit: 2 })
        );
        assert!(registry.get::<u16>().is_none());
    }

    #[test]
    fn test_payload_drops_value() {
        let registry = ComponentRegistry::new(256);
        let info = registry.register::<Arc<i32>>().unwrap();
        let shared = Arc::new(7);
        let payload = Payload::new(info, shared.clone());
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(payload);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn test_payload_downcast() {
        let registry = ComponentRegistry::new(256);
        let info = registry.register::<Position>().unwrap();
        let mut payload = Payload::new(info, Position { x: 1.0, y: 2.0 });
        payload.downcast_mut::<Position>().unwrap().x = 5.0;
        assert_eq!(
            payload.downcast_ref::<Position>(),
            Some(&Position { x: 5.0, y: 2.0 })
        );
        assert!(payload.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn test_concurrent_registration_agrees() {
        let registry = ComponentRegistry::new(256);
        let ids: Vec<_> = crossbeam::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|_| registry.register::<Position>().unwrap().id))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
