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

//! World construction options

/// Tuning knobs for [`crate::World::with_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    /// Ids `2..=max_component_id` are reserved for component types.
    /// Entity ids are issued above this value.
    pub max_component_id: u64,

    /// Archetype table pre-allocation.
    pub initial_archetype_capacity: usize,
}

impl WorldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_component_id(mut self, max: u64) -> Self {
        self.max_component_id = max;
        self
    }

    pub fn initial_archetype_capacity(mut self, capacity: usize) -> Self {
        self.initial_archetype_capacity = capacity;
        self
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_component_id: 256,
            initial_archetype_capacity: 64,
        }
    }
}
