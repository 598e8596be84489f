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

//! Archetype storage with chunked columns and transition edges
//!
//! Rows are grouped into chunks of [`CHUNK_SIZE`]. Row `r` lives in chunk
//! `r >> CHUNK_SHIFT` at offset `r & CHUNK_MASK`. Tags are part of the
//! signature but own no column.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::component::{Component, ComponentInfo};
use crate::entity::EntityId;
use crate::term::{compare_terms, terms_equal};

/// Rows per chunk.
pub const CHUNK_SIZE: usize = 4096;
pub const CHUNK_SHIFT: u32 = 12;
pub const CHUNK_MASK: usize = CHUNK_SIZE - 1;

/// Component signature, sorted by id.
pub type ArchetypeSignature = SmallVec<[ComponentInfo; 8]>;

/// Index of an archetype inside its world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The empty-signature archetype every entity starts in.
    pub const ROOT: ArchetypeId = ArchetypeId(0);

    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[inline]
fn split_row(row: usize) -> (usize, usize) {
    (row >> CHUNK_SHIFT, row & CHUNK_MASK)
}

/// Type-erased column for one data component
pub struct Column {
    info: ComponentInfo,
    chunk_layout: Layout,
    chunks: Vec<NonNull<u8>>,
}

// SAFETY: columns only hold values of `Component` types, which are Send + Sync.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    fn new(info: ComponentInfo) -> Self {
        let chunk_layout = match Layout::from_size_align(info.size * CHUNK_SIZE, info.layout.align())
        {
            Ok(layout) => layout,
            Err(_) => panic!("component {} is too large for a chunk", info.name),
        };
        Self {
            info,
            chunk_layout,
            chunks: Vec::new(),
        }
    }

    pub fn info(&self) -> ComponentInfo {
        self.info
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn reserve_chunk(&mut self, chunk: usize) {
        while self.chunks.len() <= chunk {
            // SAFETY: columns only exist for non-zero sizes.
            let raw = unsafe { alloc::alloc(self.chunk_layout) };
            let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(self.chunk_layout));
            self.chunks.push(ptr);
        }
    }

    /// Address of `row`. The chunk must have been reserved.
    #[inline]
    pub(crate) fn ptr(&self, row: usize) -> *mut u8 {
        let (chunk, offset) = split_row(row);
        // SAFETY: offset stays inside the chunk allocation.
        unsafe { self.chunks[chunk].as_ptr().add(offset * self.info.size) }
    }

    /// Typed read of `row`.
    ///
    /// # Safety
    /// `row` must hold an initialized value.
    pub(crate) unsafe fn get<T: Component>(&self, row: usize) -> &T {
        assert!(self.info.is_type::<T>(), "column type mismatch");
        &*(self.ptr(row) as *const T)
    }

    /// # Safety
    /// `row` must hold an initialized value.
    pub(crate) unsafe fn get_mut<T: Component>(&mut self, row: usize) -> &mut T {
        assert!(self.info.is_type::<T>(), "column type mismatch");
        &mut *(self.ptr(row) as *mut T)
    }

    /// # Safety
    /// `row` must hold an initialized value.
    unsafe fn drop_at(&mut self, row: usize) {
        if let Some(drop_fn) = self.info.drop_fn {
            drop_fn(self.ptr(row));
        }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            // SAFETY: allocated in `reserve_chunk` with this layout.
            unsafe { alloc::dealloc(chunk.as_ptr(), self.chunk_layout) };
        }
    }
}

/// Archetype: entities sharing one exact component signature
pub struct Archetype {
    id: ArchetypeId,
    signature: ArchetypeSignature,
    columns: Vec<Column>,
    column_lookup: FxHashMap<EntityId, usize>,
    entity_chunks: Vec<Vec<EntityId>>,
    len: usize,
    add_edges: FxHashMap<EntityId, ArchetypeId>,
    remove_edges: FxHashMap<EntityId, ArchetypeId>,
}

impl Archetype {
    pub(crate) fn new(id: ArchetypeId, mut signature: ArchetypeSignature) -> Self {
        signature.sort_by(|a, b| compare_terms(a.id, b.id));
        signature.dedup_by(|a, b| a.id == b.id);

        let mut columns = Vec::new();
        let mut column_lookup = FxHashMap::default();
        for info in signature.iter().filter(|info| !info.is_tag()) {
            column_lookup.insert(info.id, columns.len());
            columns.push(Column::new(*info));
        }

        Self {
            id,
            signature,
            columns,
            column_lookup,
            entity_chunks: Vec::new(),
            len: 0,
            add_edges: FxHashMap::default(),
            remove_edges: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn signature(&self) -> &ArchetypeSignature {
        &self.signature
    }

    /// Ids of the signature, in order.
    pub fn component_ids(&self) -> impl Iterator<Item = EntityId> + Clone + '_ {
        self.signature.iter().map(|info| info.id)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Exact membership.
    pub fn has(&self, id: EntityId) -> bool {
        self.signature.iter().any(|info| info.id == id)
    }

    /// Membership under wildcard rules.
    pub fn has_term(&self, term: EntityId) -> bool {
        self.signature.iter().any(|info| terms_equal(info.id, term))
    }

    pub fn column_index(&self, id: EntityId) -> Option<usize> {
        self.column_lookup.get(&id).copied()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub(crate) fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn entity(&self, row: usize) -> Option<EntityId> {
        if row >= self.len {
            return None;
        }
        let (chunk, offset) = split_row(row);
        Some(self.entity_chunks[chunk][offset])
    }

    pub fn chunk_count(&self) -> usize {
        self.entity_chunks.len()
    }

    /// Entities of one chunk. Every chunk but the last is full.
    pub fn chunk_entities(&self, chunk: usize) -> &[EntityId] {
        self.entity_chunks.get(chunk).map_or(&[], Vec::as_slice)
    }

    /// Component values of one chunk, aligned with [`Archetype::chunk_entities`].
    pub fn chunk_values<T: Component>(&self, id: EntityId, chunk: usize) -> Option<&[T]> {
        let column = self.columns.get(self.column_index(id)?)?;
        if !column.info.is_type::<T>() {
            return None;
        }
        let rows = self.chunk_entities(chunk).len();
        let ptr = column.chunks.get(chunk)?.as_ptr() as *const T;
        // SAFETY: the first `rows` slots of the chunk are initialized.
        Some(unsafe { std::slice::from_raw_parts(ptr, rows) })
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entity_chunks.iter().flatten().copied()
    }

    /// Append `entity`; its data slots are left for the caller to fill.
    pub(crate) fn push_entity(&mut self, entity: EntityId) -> usize {
        let row = self.len;
        let (chunk, _) = split_row(row);
        if chunk == self.entity_chunks.len() {
            self.entity_chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
        self.entity_chunks[chunk].push(entity);
        for column in &mut self.columns {
            column.reserve_chunk(chunk);
        }
        self.len += 1;
        row
    }

    /// Remove `row` by moving the last row into it.
    ///
    /// Returns the entity that now occupies `row`, if any.
    ///
    /// # Safety
    /// The values at `row` must already be moved out or dropped.
    pub(crate) unsafe fn swap_remove(&mut self, row: usize) -> Option<EntityId> {
        let last = self.len.checked_sub(1)?;
        if row > last {
            return None;
        }

        if row != last {
            for column in &mut self.columns {
                std::ptr::copy_nonoverlapping(column.ptr(last), column.ptr(row), column.info.size);
            }
        }

        let (last_chunk, _) = split_row(last);
        let moved = self.entity_chunks[last_chunk].pop();
        if self.entity_chunks[last_chunk].is_empty() {
            self.entity_chunks.pop();
        }
        self.len = last;

        if row == last {
            return None;
        }
        let moved = moved?;
        let (chunk, offset) = split_row(row);
        self.entity_chunks[chunk][offset] = moved;
        Some(moved)
    }

    /// Drop every value stored at `row`.
    ///
    /// # Safety
    /// `row` must be a live row.
    pub(crate) unsafe fn drop_row(&mut self, row: usize) {
        for column in &mut self.columns {
            column.drop_at(row);
        }
    }

    /// Drop a single value at `row`.
    ///
    /// # Safety
    /// `row` must be a live row.
    pub(crate) unsafe fn drop_value(&mut self, column: usize, row: usize) {
        if let Some(column) = self.columns.get_mut(column) {
            column.drop_at(row);
        }
    }

    pub fn add_edge(&self, id: EntityId) -> Option<ArchetypeId> {
        self.add_edges.get(&id).copied()
    }

    pub fn remove_edge(&self, id: EntityId) -> Option<ArchetypeId> {
        self.remove_edges.get(&id).copied()
    }

    pub(crate) fn set_add_edge(&mut self, id: EntityId, to: ArchetypeId) {
        self.add_edges.insert(id, to);
    }

    pub(crate) fn set_remove_edge(&mut self, id: EntityId, to: ArchetypeId) {
        self.remove_edges.insert(id, to);
    }

    pub(crate) fn add_edges(&self) -> impl Iterator<Item = (EntityId, ArchetypeId)> + '_ {
        self.add_edges.iter().map(|(id, to)| (*id, *to))
    }

    /// Drop all rows but keep the signature and edges.
    pub(crate) fn clear(&mut self) {
        // SAFETY: rows `0..len` are initialized.
        unsafe {
            for row in 0..self.len {
                self.drop_row(row);
            }
        }
        self.entity_chunks.clear();
        self.len = 0;
    }
}

impl Drop for Archetype {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Borrow two distinct archetypes mutably.
pub(crate) fn pair_mut(
    archetypes: &mut [Archetype],
    a: ArchetypeId,
    b: ArchetypeId,
) -> (&mut Archetype, &mut Archetype) {
    let (a, b) = (a.index(), b.index());
    assert_ne!(a, b, "cannot borrow the same archetype twice");
    if a < b {
        let (left, right) = archetypes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = archetypes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

/// Move the entity at `row` of `src` into `dst`.
///
/// Shared values are relocated byte-wise, values `dst` has no column for are
/// dropped, and columns new in `dst` are left for the caller to fill.
/// Returns the new row and the entity swapped into `row` of `src`.
///
/// # Safety
/// `row` must be a live row of `src`.
pub(crate) unsafe fn move_row(
    src: &mut Archetype,
    row: usize,
    dst: &mut Archetype,
) -> (usize, Option<EntityId>) {
    let entity = src.entity(row).unwrap_or(EntityId::NULL);
    let new_row = dst.push_entity(entity);

    for index in 0..src.columns.len() {
        let id = src.columns[index].info.id;
        match dst.column_index(id) {
            Some(target) => {
                let size = src.columns[index].info.size;
                std::ptr::copy_nonoverlapping(
                    src.columns[index].ptr(row),
                    dst.columns[target].ptr(new_row),
                    size,
                );
            }
            None => src.columns[index].drop_at(row),
        }
    }

    (new_row, src.swap_remove(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentRegistry, Payload};
    use smallvec::smallvec;
    use std::sync::Arc;

    struct Tag;

    fn arch(id: usize, sig: ArchetypeSignature) -> Archetype {
        Archetype::new(ArchetypeId::new(id), sig)
    }

    fn write<T: Component>(archetype: &mut Archetype, id: EntityId, row: usize, value: T) {
        let info = archetype.signature.iter().find(|i| i.id == id).copied().unwrap();
        let column = archetype.column_index(id).unwrap();
        let dst = archetype.columns[column].ptr(row);
        unsafe { Payload::new(info, value).write_to(dst) };
    }

    #[test]
    fn test_signature_sorted_and_tags_have_no_column() {
        let registry = ComponentRegistry::new(256);
        let pos = registry.register::<u64>().unwrap();
        let tag = registry.register::<Tag>().unwrap();
        let archetype = arch(1, smallvec![tag, pos]);

        let ids: Vec<_> = archetype.component_ids().collect();
        assert_eq!(ids, vec![pos.id, tag.id]);
        assert_eq!(archetype.columns().len(), 1);
        assert!(archetype.column_index(tag.id).is_none());
        assert!(archetype.has(tag.id));
    }

    #[test]
    fn test_rows_span_chunks() {
        let registry = ComponentRegistry::new(256);
        let value = registry.register::<u32>().unwrap();
        let mut archetype = arch(1, smallvec![value]);

        let total = CHUNK_SIZE + 10;
        for i in 0..total {
            let row = archetype.push_entity(EntityId::from_raw(1000 + i as u64));
            write(&mut archetype, value.id, row, i as u32);
        }
        assert_eq!(archetype.chunk_count(), 2);
        assert_eq!(archetype.chunk_entities(1).len(), 10);

        let second = archetype.chunk_values::<u32>(value.id, 1).unwrap();
        assert_eq!(second[0], CHUNK_SIZE as u32);
        assert_eq!(archetype.entity(CHUNK_SIZE), Some(EntityId::from_raw(1000 + CHUNK_SIZE as u64)));
    }

    #[test]
    fn test_swap_remove_moves_last_row() {
        let registry = ComponentRegistry::new(256);
        let value = registry.register::<u32>().unwrap();
        let mut archetype = arch(1, smallvec![value]);
        for i in 0..3u32 {
            let row = archetype.push_entity(EntityId::from_raw(500 + i as u64));
            write(&mut archetype, value.id, row, i * 10);
        }

        let moved = unsafe { archetype.swap_remove(0) };
        assert_eq!(moved, Some(EntityId::from_raw(502)));
        assert_eq!(archetype.len(), 2);
        assert_eq!(unsafe { *archetype.columns[0].get::<u32>(0) }, 20);

        assert_eq!(unsafe { archetype.swap_remove(1) }, None);
        assert_eq!(archetype.len(), 1);
    }

    #[test]
    fn test_move_row_drops_detached_values() {
        let registry = ComponentRegistry::new(256);
        let shared = registry.register::<u32>().unwrap();
        let dropped = registry.register::<Arc<u8>>().unwrap();
        let mut archetypes = vec![
            arch(0, smallvec![shared, dropped]),
            arch(1, smallvec![shared]),
        ];

        let counter = Arc::new(1u8);
        let entity = EntityId::from_raw(900);
        let row = archetypes[0].push_entity(entity);
        write(&mut archetypes[0], shared.id, row, 77u32);
        write(&mut archetypes[0], dropped.id, row, counter.clone());
        assert_eq!(Arc::strong_count(&counter), 2);

        let (src, dst) = pair_mut(&mut archetypes, ArchetypeId::new(0), ArchetypeId::new(1));
        let (new_row, swapped) = unsafe { move_row(src, row, dst) };
        assert_eq!(swapped, None);
        assert_eq!(Arc::strong_count(&counter), 1);
        assert_eq!(unsafe { *dst.columns[0].get::<u32>(new_row) }, 77);
        assert_eq!(dst.entity(new_row), Some(entity));
        assert!(src.is_empty());
    }

    #[test]
    fn test_drop_releases_values() {
        let registry = ComponentRegistry::new(256);
        let info = registry.register::<Arc<u8>>().unwrap();
        let counter = Arc::new(0u8);
        {
            let mut archetype = arch(1, smallvec![info]);
            for _ in 0..5 {
                let row = archetype.push_entity(EntityId::from_raw(300));
                write(&mut archetype, info.id, row, counter.clone());
            }
            assert_eq!(Arc::strong_count(&counter), 6);
        }
        assert_eq!(Arc::strong_count(&counter), 1);
    }
}
