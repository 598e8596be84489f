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

//! Error types

use std::fmt;

use crate::entity::EntityId;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity is unknown or its generation is stale
    EntityNotFound(EntityId),

    /// Slot of a caller-chosen id is held by another generation
    EntityIdInUse(EntityId),

    /// Component is neither attached nor pending
    ComponentNotFound {
        entity: EntityId,
        component: EntityId,
    },

    /// Typed lookup of a type that was never registered
    ComponentNotRegistered(&'static str),

    /// Reserved component id range is exhausted
    ComponentLimitExceeded { limit: u64 },

    /// Deferred-only API used while the world is not locked
    NotDeferred,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound(id) => write!(f, "Entity {id} is dead or doesn't exist"),
            EcsError::EntityIdInUse(id) => {
                write!(f, "Entity slot {} is held by another generation", id.real_id())
            }
            EcsError::ComponentNotFound { entity, component } => {
                write!(f, "Component {component} not found on entity {entity}")
            }
            EcsError::ComponentNotRegistered(name) => {
                write!(f, "Component type {name} is not registered")
            }
            EcsError::ComponentLimitExceeded { limit } => {
                write!(f, "Component id limit exceeded (max {limit})")
            }
            EcsError::NotDeferred => write!(f, "World is not in deferred mode"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_entity() {
        let err = EcsError::EntityNotFound(EntityId::from_raw(300));
        assert_eq!(err.to_string(), "Entity 300v0 is dead or doesn't exist");
    }
}
