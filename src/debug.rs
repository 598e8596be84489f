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

//! Inspection helpers and tracing setup

use std::fmt::Write as _;

use ahash::AHashSet;

use crate::archetype::ArchetypeId;
use crate::entity::EntityId;
use crate::world::World;

/// World inspector for debugging
pub struct WorldInspector;

impl WorldInspector {
    pub fn entity_count(world: &World) -> usize {
        world.entity_count()
    }

    /// One entry per archetype, in creation order.
    pub fn archetype_summary(world: &World) -> Vec<ArchetypeInfo> {
        world
            .archetypes()
            .iter()
            .map(|archetype| ArchetypeInfo {
                id: archetype.id(),
                signature: archetype.component_ids().collect(),
                entity_count: archetype.len(),
                column_count: archetype.columns().len(),
            })
            .collect()
    }

    /// Archetype graph following add edges from the root, one node per line.
    pub fn archetype_graph(world: &World) -> String {
        let mut out = String::new();
        let mut visited = AHashSet::new();
        Self::write_node(world, ArchetypeId::ROOT, 0, &mut visited, &mut out);
        out
    }

    fn write_node(
        world: &World,
        id: ArchetypeId,
        depth: usize,
        visited: &mut AHashSet<ArchetypeId>,
        out: &mut String,
    ) {
        let Some(archetype) = world.archetype(id) else {
            return;
        };
        let ids: Vec<String> = archetype.component_ids().map(|c| c.to_string()).collect();
        let _ = writeln!(
            out,
            "{:indent$}[{}] entities: {}",
            "",
            ids.join(", "),
            archetype.len(),
            indent = depth * 2
        );
        if !visited.insert(id) {
            return;
        }

        let mut children: Vec<ArchetypeId> = archetype.add_edges().map(|(_, to)| to).collect();
        children.sort();
        for child in children {
            if !visited.contains(&child) {
                Self::write_node(world, child, depth + 1, visited, out);
            }
        }
    }

    /// Print world summary to console
    pub fn print_summary(world: &World) {
        println!("=== World Summary ===");
        println!("Entities: {}", Self::entity_count(world));
        println!("Archetypes: {}", world.archetype_count());
        println!("Pending ops: {}", world.pending_ops());

        println!("\n=== Archetypes ===");
        for info in Self::archetype_summary(world) {
            println!(
                "Archetype {}: {} entities, {} ids, {} columns",
                info.id.index(),
                info.entity_count,
                info.signature.len(),
                info.column_count
            );
        }
    }

    /// Print entity details
    pub fn print_entity(world: &World, entity: EntityId) {
        match world.record(entity) {
            Ok(record) => {
                println!("=== Entity {entity} ===");
                println!("Archetype: {}", record.archetype.index());
                println!("Row: {}", record.row);
                if let Ok(signature) = world.get_type(entity) {
                    for info in signature {
                        println!("  {} ({}, {} bytes)", info.id, info.type_name(), info.size);
                    }
                }
            }
            Err(err) => println!("{err}"),
        }
    }
}

/// Archetype information for debugging
#[derive(Clone, Debug)]
pub struct ArchetypeInfo {
    pub id: ArchetypeId,
    pub signature: Vec<EntityId>,
    pub entity_count: usize,
    pub column_count: usize,
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Returns `false` when a global subscriber is already set.
#[cfg(feature = "profiling")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag;

    #[test]
    fn test_summary_counts() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, 1u32).unwrap();
        world.spawn();

        let summary = WorldInspector::archetype_summary(&world);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].entity_count, 1);
        assert_eq!(summary[1].entity_count, 1);
        assert_eq!(summary[1].column_count, 1);
    }

    #[test]
    fn test_graph_lists_each_archetype() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, 1u32).unwrap();
        world.add::<Tag>(e).unwrap();

        let graph = WorldInspector::archetype_graph(&world);
        assert_eq!(graph.lines().count(), 3);
        assert!(graph.starts_with("[] entities: 0"));
    }
}
