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

use std::sync::Arc;

use archetype_store::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Label(&'static str);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Score(u32);

struct Hidden;

#[test]
fn test_commands_invisible_until_merge() {
    let mut world = World::new();
    let mut commands = Commands::new();
    let e = commands.entity(&mut world, None).unwrap();

    commands.set(&world, e, Label("pending")).unwrap();
    commands.add::<Hidden>(&world, e).unwrap();
    assert!(!world.has::<Label>(e));
    assert!(!world.has::<Hidden>(e));
    assert!(commands.has::<Hidden>(&world, e));

    commands.merge(&mut world).unwrap();
    assert_eq!(world.get::<Label>(e).unwrap().0, "pending");
    assert!(world.has::<Hidden>(e));
}

#[test]
fn test_unset_beats_set_in_same_buffer() {
    let mut world = World::new();
    let e = world.spawn();
    let mut commands = Commands::new();

    commands.unset::<Score>(&world, e).unwrap();
    commands.set(&world, e, Score(1)).unwrap();
    assert!(!commands.has::<Score>(&world, e));

    commands.merge(&mut world).unwrap();
    assert!(!world.has::<Score>(e));
}

#[test]
fn test_despawn_runs_last() {
    let mut world = World::new();
    let e = world.spawn();
    let mut commands = Commands::new();

    commands.delete(&world, e).unwrap();
    commands.set(&world, e, Score(3)).unwrap();
    commands.merge(&mut world).unwrap();

    assert!(!world.exists(e));
}

#[test]
fn test_reads_fall_back_to_world() {
    let mut world = World::new();
    let e = world.spawn();
    world.set(e, Score(9)).unwrap();

    let mut commands = Commands::new();
    assert_eq!(commands.get::<Score>(&world, e).unwrap(), &Score(9));

    commands.get_mut::<Score>(&mut world, e).unwrap().0 = 10;
    assert!(commands.is_empty());
    assert_eq!(*world.get::<Score>(e).unwrap(), Score(10));
}

#[test]
fn test_missing_component_errors() {
    let mut world = World::new();
    let e = world.spawn();
    world.register_component::<Score>().unwrap();
    let commands = Commands::new();
    assert!(matches!(
        commands.get::<Score>(&world, e),
        Err(EcsError::ComponentNotFound { .. })
    ));
}

#[test]
fn test_merge_into_locked_world_defers() {
    let mut world = World::new();
    let e = world.spawn();
    let mut commands = Commands::new();
    commands.set(&world, e, Score(4)).unwrap();

    world.lock();
    commands.merge(&mut world).unwrap();
    assert_eq!(world.pending_ops(), 1);
    world.unlock();

    assert_eq!(*world.get::<Score>(e).unwrap(), Score(4));
}

#[test]
fn test_unknown_entity_rejected() {
    let mut world = World::new();
    let e = world.spawn();
    world.delete(e).unwrap();
    let mut commands = Commands::new();
    assert_eq!(
        commands.set(&world, e, Score(1)),
        Err(EcsError::EntityNotFound(e))
    );
}

#[test]
fn test_pairs_through_commands() {
    let mut world = World::new();
    let member_of = world.spawn();
    let guild = world.spawn();
    let e = world.spawn();

    let mut commands = Commands::new();
    commands.add_pair(&world, e, member_of, guild).unwrap();
    commands.merge(&mut world).unwrap();
    assert_eq!(world.target(e, member_of, 0), Some(guild));
}

#[test]
fn test_merge_skips_entities_deleted_since_queueing() {
    let mut world = World::new();
    let a = world.spawn();
    let b = world.spawn();
    let tracker = Arc::new(());

    let mut commands = Commands::new();
    commands.set(&world, a, Score(1)).unwrap();
    commands.set(&world, b, tracker.clone()).unwrap();
    commands.delete(&world, b).unwrap();
    world.delete(a).unwrap();

    commands.merge(&mut world).unwrap();
    assert!(commands.is_empty());
    assert!(!world.exists(a));
    assert!(!world.exists(b));
    assert_eq!(world.entity_count(), 0);
    assert_eq!(Arc::strong_count(&tracker), 1);
}
