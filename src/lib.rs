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

//! Archetype Store - archetype-based entity storage core
//!
//! Entities live in archetypes keyed by their exact component set, with
//! cached transition edges, relation pairs with wildcard matching, a
//! thread-safe deferred mode and local command buffers.

pub mod archetype;
pub mod command;
pub mod component;
pub mod config;
pub mod debug;
pub mod deferred;
pub mod entity;
pub mod entity_index;
pub mod error;
pub mod prelude;
pub mod sparse_set;
pub mod term;
pub mod world;

pub use archetype::*;
pub use command::*;
pub use component::*;
pub use config::*;
pub use deferred::*;
pub use entity::*;
pub use entity_index::*;
pub use error::*;
pub use sparse_set::*;
pub use term::*;
pub use world::*;
