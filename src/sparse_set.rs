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

//! Paged sparse set keyed by non-negative integers.
//!
//! Keys are split into a page number (`key >> PAGE_SHIFT`) and a local offset.
//! Pages are allocated on first use and never shrink. Every page keeps its own
//! dense value array; a separate outer key list provides one iteration order
//! across all pages.

/// Slots per page.
pub const PAGE_SIZE: usize = 4096;
const PAGE_SHIFT: u32 = 12;
const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

const ABSENT: u32 = u32::MAX;

struct DenseEntry<T> {
    value: T,
    /// Local offset of the owning key inside its page.
    offset: u32,
    /// Position of the key inside the outer key list.
    outer: usize,
}

struct Page<T> {
    sparse: Box<[u32]>,
    dense: Vec<DenseEntry<T>>,
}

impl<T> Page<T> {
    fn new() -> Self {
        Self {
            sparse: vec![ABSENT; PAGE_SIZE].into_boxed_slice(),
            dense: Vec::new(),
        }
    }
}

/// Sparse set with O(1) insert, lookup and swap-remove.
pub struct SparseSet<T> {
    pages: Vec<Option<Page<T>>>,
    keys: Vec<u64>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn split(key: u64) -> (usize, usize) {
    ((key >> PAGE_SHIFT) as usize, (key & PAGE_MASK) as usize)
}

impl<T> SparseSet<T> {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of allocated page-table slots.
    pub fn page_capacity(&self) -> usize {
        self.pages.len()
    }

    fn dense_index(&self, key: u64) -> Option<(usize, usize)> {
        let (page_idx, offset) = split(key);
        let page = self.pages.get(page_idx)?.as_ref()?;
        match page.sparse[offset] {
            ABSENT => None,
            dense => Some((page_idx, dense as usize)),
        }
    }

    pub fn contains(&self, key: u64) -> bool {
        self.dense_index(key).is_some()
    }

    pub fn get(&self, key: u64) -> Option<&T> {
        let (page_idx, dense) = self.dense_index(key)?;
        let page = self.pages[page_idx].as_ref()?;
        Some(&page.dense[dense].value)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut T> {
        let (page_idx, dense) = self.dense_index(key)?;
        let page = self.pages[page_idx].as_mut()?;
        Some(&mut page.dense[dense].value)
    }

    fn page_or_create(&mut self, page_idx: usize) -> &mut Page<T> {
        if page_idx >= self.pages.len() {
            let mut new_len = (self.pages.len() * 2).max(2);
            while page_idx >= new_len {
                new_len *= 2;
            }
            self.pages.resize_with(new_len, || None);
        }
        self.pages[page_idx].get_or_insert_with(Page::new)
    }

    /// Insert or overwrite the value stored under `key`.
    ///
    /// Returns the previous value when the key was already present.
    pub fn insert(&mut self, key: u64, value: T) -> Option<T> {
        let (page_idx, offset) = split(key);
        let outer = self.keys.len();
        let page = self.page_or_create(page_idx);

        let slot = page.sparse[offset];
        if slot != ABSENT {
            let previous = std::mem::replace(&mut page.dense[slot as usize].value, value);
            return Some(previous);
        }

        page.sparse[offset] = page.dense.len() as u32;
        page.dense.push(DenseEntry {
            value,
            offset: offset as u32,
            outer,
        });
        self.keys.push(key);
        None
    }

    /// Swap-remove `key`. Iteration order of the remaining keys is not kept.
    pub fn remove(&mut self, key: u64) -> Option<T> {
        let (page_idx, offset) = split(key);
        let page = self.pages.get_mut(page_idx)?.as_mut()?;

        let slot = page.sparse[offset];
        if slot == ABSENT {
            return None;
        }
        page.sparse[offset] = ABSENT;

        let entry = page.dense.swap_remove(slot as usize);
        if let Some(moved) = page.dense.get(slot as usize) {
            page.sparse[moved.offset as usize] = slot;
        }

        self.keys.swap_remove(entry.outer);
        if let Some(&moved_key) = self.keys.get(entry.outer) {
            let (moved_page, moved_offset) = split(moved_key);
            if let Some(page) = self.pages[moved_page].as_mut() {
                let dense = page.sparse[moved_offset] as usize;
                page.dense[dense].outer = entry.outer;
            }
        }

        Some(entry.value)
    }

    /// Keys in dense (insertion, modulo swap-removes) order.
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        self.keys.iter().filter_map(move |&key| Some((key, self.get(key)?)))
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_insert_get_remove() {
        let mut set = SparseSet::new();
        assert!(set.insert(10, "a").is_none());
        assert!(set.insert(5000, "b").is_none());
        assert_eq!(set.len(), 2);

        assert_eq!(set.get(10), Some(&"a"));
        assert_eq!(set.get(5000), Some(&"b"));
        assert!(!set.contains(11));

        assert_eq!(set.remove(10), Some("a"));
        assert!(!set.contains(10));
        assert_eq!(set.get(5000), Some(&"b"));
        assert_eq!(set.remove(10), None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_page_table_doubles() {
        let mut set = SparseSet::new();
        set.insert(0, ());
        assert_eq!(set.page_capacity(), 2);

        set.insert((PAGE_SIZE * 9) as u64, ());
        assert_eq!(set.page_capacity(), 16);
    }

    #[test]
    fn test_overwrite_returns_previous() {
        let mut set = SparseSet::new();
        set.insert(3, 1);
        assert_eq!(set.insert(3, 2), Some(1));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(3), Some(&2));
    }

    #[test]
    fn test_remove_fixes_moved_entries() {
        let mut set = SparseSet::new();
        for key in 0..10u64 {
            set.insert(key, key * 100);
        }
        set.remove(2);
        set.remove(0);
        for key in [1u64, 3, 4, 5, 6, 7, 8, 9] {
            assert_eq!(set.get(key), Some(&(key * 100)));
        }
        let mut keys = set.keys().to_vec();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u64, u32),
        Remove(u64),
        Contains(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..100_000, any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
            (0u64..100_000).prop_map(Op::Remove),
            (0u64..100_000).prop_map(Op::Contains),
        ]
    }

    proptest! {
        #[test]
        fn matches_reference_map(ops in prop::collection::vec(op_strategy(), 1..400)) {
            let mut set = SparseSet::new();
            let mut model: HashMap<u64, u32> = HashMap::new();

            for op in ops {
                match op {
                    Op::Insert(k, v) => {
                        prop_assert_eq!(set.insert(k, v), model.insert(k, v));
                    }
                    Op::Remove(k) => {
                        prop_assert_eq!(set.remove(k), model.remove(&k));
                    }
                    Op::Contains(k) => {
                        prop_assert_eq!(set.contains(k), model.contains_key(&k));
                        prop_assert_eq!(set.get(k), model.get(&k));
                    }
                }
                prop_assert_eq!(set.len(), model.len());
            }

            for (k, v) in set.iter() {
                prop_assert_eq!(model.get(&k), Some(v));
            }
        }
    }
}
