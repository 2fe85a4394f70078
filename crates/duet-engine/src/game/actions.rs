//! Action handlers.
//!
//! The server handlers are the only code that turns player intent into state
//! changes. The client handlers forward each accepted action to the server.
//! Every server handler starts by resolving the acting player's entity and
//! silently does nothing if it is gone.

use duet_ecs::entity::EntityId;
use duet_ecs::query::Query;
use duet_ecs::world::World;

use crate::action::{Action, ActionContext, ActionKind, ActionQueue, Vec2};
use crate::components::{collider, rigidbody, sprite, Collider, Renderable, Rigidbody, Sprite, Transform};
use crate::config::EngineConfig;
use crate::game::components::{LevelMember, Player, Portal, Projectile};
use crate::game::levels::{self, player_color};
use crate::physics::{PhysicsWorld, RayFilter};
use crate::EngineError;

/// Collider label for portals.
pub const PORTAL_LISTENER: &str = "portal";
/// Collider label for projectiles.
pub const PROJECTILE_LISTENER: &str = "projectile";

/// How far off the hit surface a portal is placed.
const PORTAL_OFFSET: f32 = 0.3;
/// Distance from the player's center at which projectiles spawn.
const MUZZLE_OFFSET: f32 = 0.9;

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Authoritative handlers, installed on the server registry.
pub fn register_server_handlers(queue: &mut ActionQueue) {
    queue.register(ActionKind::MovePlayer, |ctx, action, _dt| match action {
        Action::MovePlayer(a) => move_player(ctx, a.player, a.dir),
        _ => Ok(()),
    });
    queue.register(ActionKind::ShootPortal, |ctx, action, _dt| match action {
        Action::ShootPortal(a) => shoot_portal(ctx, a.player, a.aim),
        _ => Ok(()),
    });
    queue.register(ActionKind::Attack, |ctx, action, _dt| match action {
        Action::Attack(a) => attack(ctx, a.player, a.aim),
        _ => Ok(()),
    });
    queue.register(ActionKind::ResetLevel, |ctx, _action, _dt| {
        let level = ctx.room.meta.level;
        levels::build_level(ctx.world, ctx.room, level)
    });
}

/// Forwarding handlers, installed on the client registry.
pub fn register_client_handlers(queue: &mut ActionQueue) {
    for kind in ActionKind::ALL {
        queue.register(kind, |ctx, action, _dt| {
            ctx.outbox.push(action.to_wire());
            Ok(())
        });
    }
}

// ---------------------------------------------------------------------------
// Shared queries
// ---------------------------------------------------------------------------

/// The avatar entity for player slot `index`, if alive.
pub fn find_player(world: &World, index: u8) -> Option<EntityId> {
    world
        .scan(&Query::all().with::<Player>())
        .into_iter()
        .find(|id| world.try_get::<Player>(id).is_some_and(|p| p.index == index))
}

/// Whether a solid body lies just below `entity`'s collider.
pub fn standing_on_ground(
    world: &World,
    physics: &PhysicsWorld,
    config: &EngineConfig,
    entity: &EntityId,
) -> bool {
    let (Some(t), Some(c)) = (world.try_get::<Transform>(entity), world.try_get::<Collider>(entity)) else {
        return false;
    };
    let reach = collider::half_height(c) + config.tuning.ground_reach;
    !physics
        .cast_ray(world, (t.x, t.y), (0.0, -1.0), reach, &RayFilter::excluding(entity))
        .is_empty()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn move_player(ctx: &mut ActionContext<'_>, player: u8, dir: Vec2) -> Result<(), EngineError> {
    let Some(id) = find_player(ctx.world, player) else {
        return Ok(());
    };
    let grounded = standing_on_ground(ctx.world, ctx.physics, ctx.config, &id);
    let tuning = &ctx.config.tuning;

    if dir.x != 0.0 {
        let p = ctx.world.get_mut::<Player>(&id)?;
        p.facing = if dir.x > 0.0 { 1 } else { -1 };
    }
    let rb = ctx.world.get_mut::<Rigidbody>(&id)?;
    rb.vx = dir.x * tuning.move_speed;
    if dir.y > 0.0 && grounded {
        rb.vy = tuning.jump_force;
        tracing::trace!(entity = %id, "jump");
    }
    ctx.world.get_mut::<Player>(&id)?.grounded = grounded;
    Ok(())
}

fn shoot_portal(ctx: &mut ActionContext<'_>, player: u8, aim: Vec2) -> Result<(), EngineError> {
    let Some(shooter) = find_player(ctx.world, player) else {
        return Ok(());
    };
    let Some(t) = ctx.world.try_get::<Transform>(&shooter) else {
        return Ok(());
    };
    let origin = (t.x, t.y);
    let hits = ctx.physics.cast_ray(
        ctx.world,
        origin,
        (aim.x, aim.y),
        ctx.config.tuning.portal_range,
        &RayFilter::excluding(&shooter),
    );
    let Some(hit) = hits.into_iter().next() else {
        tracing::trace!(player, "portal shot hit nothing");
        return Ok(());
    };
    let x = hit.point.0 + hit.normal.0 * PORTAL_OFFSET;
    let y = hit.point.1 + hit.normal.1 * PORTAL_OFFSET;

    let existing = ctx
        .world
        .scan(&Query::all().with::<Portal>())
        .into_iter()
        .find(|id| ctx.world.try_get::<Portal>(id).is_some_and(|p| p.owner == player));
    let id = match existing {
        Some(id) => id,
        None => {
            let id = ctx.world.create();
            let mut pad = collider::rect(0.6, 0.6);
            collider::set_sensor(&mut pad, true);
            collider::set_listener(&mut pad, PORTAL_LISTENER);
            ctx.world.add(&id, Transform::default())?;
            ctx.world.add(&id, rigidbody::fixed())?;
            ctx.world.add(&id, pad)?;
            ctx.world.add(&id, Portal { owner: player, ..Default::default() })?;
            ctx.world.add(&id, Sprite { kind: sprite::PORTAL, opacity: 1.0 })?;
            ctx.world.add(&id, player_color(player))?;
            ctx.world.add(&id, Renderable::default())?;
            ctx.world.add(&id, LevelMember { level: ctx.room.meta.level })?;
            id
        }
    };
    let t = ctx.world.get_mut::<Transform>(&id)?;
    t.x = x;
    t.y = y;
    let portal = ctx.world.get_mut::<Portal>(&id)?;
    portal.normal_x = hit.normal.0;
    portal.normal_y = hit.normal.1;
    tracing::debug!(entity = %id, player, x, y, "portal placed");
    Ok(())
}

fn attack(ctx: &mut ActionContext<'_>, player: u8, aim: Vec2) -> Result<(), EngineError> {
    let Some(shooter) = find_player(ctx.world, player) else {
        return Ok(());
    };
    let Some(dir) = aim.normalized() else {
        return Ok(());
    };
    let Some(t) = ctx.world.try_get::<Transform>(&shooter) else {
        return Ok(());
    };
    let (x, y) = (t.x + dir.x * MUZZLE_OFFSET, t.y + dir.y * MUZZLE_OFFSET);
    let tuning = &ctx.config.tuning;

    let id = ctx.world.create();
    let mut shape = collider::circle(0.15);
    collider::set_sensor(&mut shape, true);
    collider::set_listener(&mut shape, PROJECTILE_LISTENER);
    ctx.world.add(&id, Transform { x, y, ..Default::default() })?;
    ctx.world.add(
        &id,
        Rigidbody {
            vx: dir.x * tuning.projectile_speed,
            vy: dir.y * tuning.projectile_speed,
            gravity_scale: 0.0,
            fixed_rotation: true,
            ..Default::default()
        },
    )?;
    ctx.world.add(&id, shape)?;
    ctx.world.add(
        &id,
        Projectile {
            owner: shooter.as_str().to_owned(),
            ttl: tuning.projectile_ttl,
        },
    )?;
    ctx.world.add(&id, Sprite { kind: sprite::PROJECTILE, opacity: 1.0 })?;
    ctx.world.add(&id, player_color(player))?;
    ctx.world.add(&id, Renderable::default())?;
    ctx.world.add(&id, LevelMember { level: ctx.room.meta.level })?;
    tracing::debug!(entity = %id, player, "projectile launched");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MovePlayer;
    use duet_sync::room::RoomState;

    struct Stage {
        world: World,
        room: RoomState,
        physics: PhysicsWorld,
        config: EngineConfig,
        queue: ActionQueue,
    }

    impl Stage {
        /// A player resting on a floor, with bodies already created.
        fn grounded() -> (Self, EntityId) {
            let mut stage = Self {
                world: World::with_seed(11),
                room: RoomState::new(),
                physics: PhysicsWorld::new(0.0, 0.0),
                config: EngineConfig::default(),
                queue: ActionQueue::new(),
            };
            register_server_handlers(&mut stage.queue);
            let floor = stage.world.create();
            stage.world.add(&floor, Transform::default()).unwrap();
            stage.world.add(&floor, rigidbody::fixed()).unwrap();
            stage.world.add(&floor, collider::rect(30.0, 1.0)).unwrap();
            let player = levels::spawn_player(&mut stage.world, 0, (0.0, 1.0)).unwrap();
            stage.step();
            (stage, player)
        }

        fn step(&mut self) {
            let members = self
                .world
                .scan(&Query::all().with::<Transform>().with::<Rigidbody>());
            self.physics
                .step(&mut self.world, &mut self.room, &self.config, &members, 1.0 / 60.0, 0)
                .unwrap();
        }

        fn perform(&mut self, action: Action) {
            self.queue.enqueue(action);
            let mut outbox = Vec::new();
            let mut ctx = ActionContext {
                world: &mut self.world,
                room: &mut self.room,
                physics: &mut self.physics,
                config: &self.config,
                outbox: &mut outbox,
                tick: 1,
            };
            self.queue.flush(&mut ctx, 1.0 / 60.0).unwrap();
        }
    }

    fn mv(x: f32, y: f32) -> Action {
        Action::MovePlayer(MovePlayer {
            player: 0,
            dir: Vec2::new(x, y),
        })
    }

    #[test]
    fn grounded_jump_sets_exact_velocities() {
        let (mut stage, player) = Stage::grounded();
        assert!(standing_on_ground(&stage.world, &stage.physics, &stage.config, &player));

        stage.perform(mv(0.5, 1.0));
        let tuning = &stage.config.tuning;
        let rb = stage.world.get::<Rigidbody>(&player).unwrap();
        assert_eq!(rb.vy, tuning.jump_force);
        assert_eq!(rb.vx, 0.5 * tuning.move_speed);
        let p = stage.world.get::<Player>(&player).unwrap();
        assert!(p.grounded);
        assert_eq!(p.facing, 1);
    }

    #[test]
    fn walking_on_the_ground_keeps_vertical_speed() {
        let (mut stage, player) = Stage::grounded();
        stage.perform(mv(-1.0, 0.0));
        let rb = stage.world.get::<Rigidbody>(&player).unwrap();
        assert_eq!(rb.vx, -stage.config.tuning.move_speed);
        assert_eq!(rb.vy, 0.0);
        assert_eq!(stage.world.get::<Player>(&player).unwrap().facing, -1);
    }

    #[test]
    fn destroyed_floor_no_longer_grounds() {
        let (mut stage, player) = Stage::grounded();
        let floor = stage
            .world
            .scan(&Query::all().with::<Collider>())
            .into_iter()
            .find(|id| *id != player)
            .unwrap();
        stage.world.destroy(&floor).unwrap();
        // The body is still in the physics world until the next step.
        assert!(stage.physics.has_body(&floor));
        assert!(!standing_on_ground(&stage.world, &stage.physics, &stage.config, &player));

        stage.perform(mv(0.0, 1.0));
        assert_eq!(stage.world.get::<Rigidbody>(&player).unwrap().vy, 0.0);
        assert!(!stage.world.get::<Player>(&player).unwrap().grounded);
    }
}
