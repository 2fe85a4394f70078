//! Level definitions and the code that builds them into the world.
//!
//! Levels are embedded JSON (`assets/levels.json`). Building a level first
//! destroys every [`LevelMember`], then creates the new level's blocks, goals,
//! and pendulums, and moves the players to the level's spawn points.

use duet_ecs::entity::EntityId;
use duet_ecs::query::Query;
use duet_ecs::world::World;
use duet_sync::room::RoomState;
use serde::Deserialize;

use crate::components::{
    collider, color, joint, rigidbody, sprite, Renderable, Rigidbody, Sprite, Transform,
};
use crate::game::components::{Goal, LevelMember, Player, Teleported};
use crate::EngineError;

const LEVELS_JSON: &str = include_str!("../../assets/levels.json");

/// Collider label for goal pads.
pub const GOAL_LISTENER: &str = "goal";

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelSet {
    pub levels: Vec<LevelDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelDef {
    pub name: String,
    /// Spawn point per player slot.
    pub spawns: Vec<(f32, f32)>,
    #[serde(default)]
    pub blocks: Vec<BlockDef>,
    #[serde(default)]
    pub goals: Vec<GoalDef>,
    #[serde(default)]
    pub pendulums: Vec<PendulumDef>,
}

/// Static box, centered at `(x, y)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockDef {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GoalDef {
    pub player: u8,
    pub x: f32,
    pub y: f32,
}

/// A plank hanging from a fixed pivot at `(x, y)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PendulumDef {
    pub x: f32,
    pub y: f32,
    pub length: f32,
}

impl LevelSet {
    /// The levels shipped with the engine.
    pub fn embedded() -> Result<Self, EngineError> {
        Self::from_json_str(LEVELS_JSON)
    }

    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let set: LevelSet = serde_json::from_str(json)
            .map_err(|err| EngineError::Level(format!("cannot parse level set: {err}")))?;
        if set.levels.is_empty() {
            return Err(EngineError::Level("level set is empty".into()));
        }
        for level in &set.levels {
            if level.spawns.len() < 2 {
                return Err(EngineError::Level(format!(
                    "level {:?} needs a spawn for each player",
                    level.name
                )));
            }
        }
        Ok(set)
    }

    /// The level at `index`, wrapping past the last one.
    pub fn get(&self, index: u32) -> (u32, &LevelDef) {
        let wrapped = index as usize % self.levels.len();
        (wrapped as u32, &self.levels[wrapped])
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl LevelDef {
    pub fn spawn(&self, player_index: u8) -> (f32, f32) {
        self.spawns
            .get(usize::from(player_index))
            .copied()
            .unwrap_or((0.0, 1.0))
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Tear down the current level and build level `index` from the embedded set.
pub fn build_level(world: &mut World, room: &mut RoomState, index: u32) -> Result<(), EngineError> {
    let set = LevelSet::embedded()?;
    build_from(&set, world, room, index)
}

/// Tear down the current level and build level `index` of `set`.
pub fn build_from(
    set: &LevelSet,
    world: &mut World,
    room: &mut RoomState,
    index: u32,
) -> Result<(), EngineError> {
    let (index, def) = set.get(index);
    let removed = teardown(world)?;

    for block in &def.blocks {
        let id = world.create();
        world.add(&id, Transform { x: block.x, y: block.y, ..Default::default() })?;
        world.add(&id, rigidbody::fixed())?;
        world.add(&id, collider::rect(block.w, block.h))?;
        world.add(&id, Sprite { kind: sprite::BLOCK, opacity: 1.0 })?;
        world.add(&id, color::rgba(120, 120, 130, 255))?;
        world.add(&id, Renderable::default())?;
        world.add(&id, LevelMember { level: index })?;
    }

    for goal in &def.goals {
        let id = world.create();
        let mut pad = collider::rect(1.0, 1.0);
        collider::set_sensor(&mut pad, true);
        collider::set_listener(&mut pad, GOAL_LISTENER);
        world.add(&id, Transform { x: goal.x, y: goal.y, ..Default::default() })?;
        world.add(&id, rigidbody::fixed())?;
        world.add(&id, pad)?;
        world.add(&id, Goal { player_index: goal.player, reached: false })?;
        world.add(&id, Sprite { kind: sprite::GOAL, opacity: 0.6 })?;
        world.add(&id, player_color(goal.player))?;
        world.add(&id, Renderable::default())?;
        world.add(&id, LevelMember { level: index })?;
    }

    for pendulum in &def.pendulums {
        build_pendulum(world, pendulum, index)?;
    }

    reset_players(world, def)?;
    room.meta.level = index;
    tracing::info!(level = index, name = %def.name, removed, entities = world.entity_count(), "level built");
    Ok(())
}

/// Destroy every level member. Returns how many were destroyed.
pub fn teardown(world: &mut World) -> Result<usize, EngineError> {
    let members = world.scan(&Query::all().with::<LevelMember>());
    for id in &members {
        world.destroy(id)?;
    }
    Ok(members.len())
}

fn build_pendulum(world: &mut World, def: &PendulumDef, level: u32) -> Result<(), EngineError> {
    let pivot = world.create();
    world.add(&pivot, Transform { x: def.x, y: def.y, ..Default::default() })?;
    world.add(&pivot, rigidbody::fixed())?;
    world.add(&pivot, collider::rect(0.2, 0.2))?;
    world.add(&pivot, LevelMember { level })?;

    let plank = world.create();
    let half = def.length * 0.5;
    world.add(&plank, Transform { x: def.x, y: def.y - half, ..Default::default() })?;
    world.add(&plank, Rigidbody::default())?;
    world.add(&plank, collider::rect(0.3, def.length))?;
    world.add(&plank, Sprite { kind: sprite::PLANK, opacity: 1.0 })?;
    world.add(&plank, color::rgba(160, 110, 60, 255))?;
    world.add(&plank, Renderable::default())?;
    world.add(&plank, LevelMember { level })?;

    let pin = world.create();
    world.add(&pin, joint::pin(&pivot, &plank, (0.0, 0.0), (0.0, half)))?;
    world.add(&pin, LevelMember { level })?;
    Ok(())
}

/// Move every player to its spawn point, at rest.
fn reset_players(world: &mut World, def: &LevelDef) -> Result<(), EngineError> {
    let players = world.scan(&Query::all().with::<Player>().with::<Transform>());
    for id in &players {
        let index = world.get::<Player>(id)?.index;
        let (x, y) = def.spawn(index);
        let t = world.get_mut::<Transform>(id)?;
        t.x = x;
        t.y = y;
        t.rotation = 0.0;
        if let Some(rb) = world.try_get_mut::<Rigidbody>(id) {
            rigidbody::set_velocity(rb, 0.0, 0.0);
            rb.angular_velocity = 0.0;
        }
        world.get_mut::<Player>(id)?.grounded = false;
        world.remove_component::<Teleported>(id)?;
    }
    Ok(())
}

/// Create a player avatar for slot `index` at `(x, y)`.
pub fn spawn_player(world: &mut World, index: u8, (x, y): (f32, f32)) -> Result<EntityId, EngineError> {
    let id = world.create();
    world.add(&id, Transform { x, y, ..Default::default() })?;
    world.add(
        &id,
        Rigidbody {
            fixed_rotation: true,
            friction: 0.0,
            ..Default::default()
        },
    )?;
    world.add(&id, collider::rect(0.8, 1.0))?;
    world.add(&id, Player { index, ..Default::default() })?;
    world.add(&id, Sprite { kind: sprite::PLAYER, opacity: 1.0 })?;
    world.add(&id, player_color(index))?;
    world.add(&id, Renderable::default())?;
    tracing::debug!(entity = %id, player = index, "player spawned");
    Ok(id)
}

/// Tint used for everything belonging to player `index`.
pub fn player_color(index: u8) -> crate::components::Color {
    match index {
        0 => color::rgba(90, 170, 255, 255),
        _ => color::rgba(255, 140, 80, 255),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Joint;

    #[test]
    fn embedded_levels_parse() {
        let set = LevelSet::embedded().unwrap();
        assert!(set.len() >= 2);
        assert!(set.levels.iter().all(|l| l.goals.len() == 2));
    }

    #[test]
    fn level_index_wraps() {
        let set = LevelSet::embedded().unwrap();
        let (wrapped, _) = set.get(set.len() as u32);
        assert_eq!(wrapped, 0);
    }

    #[test]
    fn rebuilding_replaces_level_members_and_moves_players() {
        let mut world = World::with_seed(3);
        let mut room = RoomState::new();
        let p0 = spawn_player(&mut world, 0, (50.0, 50.0)).unwrap();
        build_level(&mut world, &mut room, 0).unwrap();
        let first: Vec<_> = world.scan(&Query::all().with::<LevelMember>());
        assert!(!first.is_empty());

        build_level(&mut world, &mut room, 1).unwrap();
        assert_eq!(room.meta.level, 1);
        assert!(first.iter().all(|id| !world.has(id)));
        assert!(world.has(&p0));
        let set = LevelSet::embedded().unwrap();
        let t = world.get::<Transform>(&p0).unwrap();
        assert_eq!((t.x, t.y), set.levels[1].spawn(0));
        assert!(!world.scan(&Query::all().with::<Joint>()).is_empty());
    }

    #[test]
    fn bad_level_data_is_reported() {
        assert!(matches!(
            LevelSet::from_json_str(r#"{ "levels": [] }"#),
            Err(EngineError::Level(_))
        ));
        assert!(matches!(
            LevelSet::from_json_str(r#"{ "levels": [{ "name": "x", "spawns": [[0, 0]] }] }"#),
            Err(EngineError::Level(_))
        ));
    }
}
