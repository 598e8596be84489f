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

//! Entity identifiers and location metadata.
//!
//! An [`EntityId`] packs several logical fields into one `u64`:
//!
//! ```text
//!  63  62  61  60 59            48 47          32 31                    0
//! +---+---+---+---+---------------+--------------+-----------------------+
//! | P | C | flags |   (unused)    |  generation  |        real id        |
//! +---+---+---+---+---------------+--------------+-----------------------+
//! ```
//!
//! When the pair flag `P` is set, bits `32..60` hold the relation and bits
//! `0..32` the target instead.

use std::fmt;

use crate::archetype::ArchetypeId;

/// Low 32 bits: the slot number of the entity.
pub const ENTITY_MASK: u64 = 0xFFFF_FFFF;

/// Generation counter, 16 bits wide.
pub const GENERATION_MASK: u64 = 0xFFFF << 32;

/// All flag bits.
pub const ID_FLAGS_MASK: u64 = 0xF << 60;

/// Everything except the flag bits.
pub const COMPONENT_MASK: u64 = !ID_FLAGS_MASK;

/// Marks an id as a relation pair.
pub const PAIR_FLAG: u64 = 1 << 63;

/// Marks an id as a registered component type.
pub const COMPONENT_FLAG: u64 = 1 << 62;

/// Packed 64-bit entity, component or pair identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EntityId(u64);

/// Reserved sentinel meaning "any" on either side of a pair.
pub const WILDCARD: EntityId = EntityId(1);

/// The `(*, *)` pair: matches every relation.
pub const ANY_PAIR: EntityId = EntityId::pair(WILDCARD, WILDCARD);

impl EntityId {
    /// The null identity.
    pub const NULL: EntityId = EntityId(0);

    #[inline]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Non-zero ids are valid.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Slot number with generation and flags masked off.
    #[inline]
    pub const fn real_id(self) -> u64 {
        self.0 & ENTITY_MASK
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        ((self.0 & GENERATION_MASK) >> 32) as u16
    }

    /// Bumps the generation by one, wrapping inside its 16-bit field.
    #[inline]
    pub const fn increase_generation(self) -> Self {
        let next = (self.generation().wrapping_add(1) as u64) << 32;
        Self((self.0 & !GENERATION_MASK) | next)
    }

    /// Combine a relation and a target into a pair id.
    ///
    /// The target is truncated to 32 bits and the relation to the 28 bits that
    /// sit below the flag nibble.
    #[inline]
    pub const fn pair(relation: EntityId, target: EntityId) -> Self {
        let packed = ((relation.0 << 32) & COMPONENT_MASK) | (target.0 & ENTITY_MASK);
        Self(PAIR_FLAG | packed)
    }

    #[inline]
    pub const fn is_pair(self) -> bool {
        (self.0 & ID_FLAGS_MASK) == PAIR_FLAG
    }

    /// Relation side of a pair, null otherwise.
    #[inline]
    pub const fn first(self) -> EntityId {
        if self.is_pair() {
            Self((self.0 & COMPONENT_MASK) >> 32)
        } else {
            Self::NULL
        }
    }

    /// Target side of a pair, null otherwise.
    #[inline]
    pub const fn second(self) -> EntityId {
        if self.is_pair() {
            Self(self.0 & ENTITY_MASK)
        } else {
            Self::NULL
        }
    }

    #[inline]
    pub const fn set_as_component(self) -> Self {
        Self(self.0 | COMPONENT_FLAG)
    }

    #[inline]
    pub const fn is_component(self) -> bool {
        !self.is_pair() && (self.0 & COMPONENT_FLAG) != 0
    }

    #[inline]
    pub const fn is_wildcard(self) -> bool {
        self.0 == WILDCARD.0
    }

    /// True for pairs with a wildcard on at least one side.
    #[inline]
    pub const fn has_wildcard(self) -> bool {
        self.is_pair() && (self.first().is_wildcard() || self.second().is_wildcard())
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pair() {
            write!(f, "Pair({:?}, {:?})", self.first(), self.second())
        } else if self.is_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "{}v{}", self.real_id(), self.generation())
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Location of an entity inside the archetype store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub archetype: ArchetypeId,
    /// Global row; see [`crate::archetype::CHUNK_SHIFT`].
    pub row: usize,
}
