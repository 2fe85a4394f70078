//! Gameplay systems, in execution order.
//!
//! | system            | side   | priority | phase    |
//! |-------------------|--------|----------|----------|
//! | `input`           | client | 100      | fixed    |
//! | `player_state`    | server | 60       | fixed    |
//! | `velocity_clamp`  | server | 50       | fixed    |
//! | `projectiles`     | server | 40       | fixed    |
//! | `teleport_cooldown` | server | 31     | fixed    |
//! | `portals`         | server | 30       | fixed    |
//! | `levels`          | server | 20       | fixed    |
//! | `interpolation`   | client | 0        | variable |
//! | `physics`         | server | -100     | fixed    |

use duet_ecs::entity::EntityId;
use duet_ecs::query::Query;

use crate::action::{Action, Attack, MovePlayer, ShootPortal, Vec2};
use crate::components::{rigidbody, Collider, Renderable, Rigidbody, Transform};
use crate::game::actions::standing_on_ground;
use crate::game::components::{Goal, Interpolated, Player, Portal, Projectile, Teleported};
use crate::game::levels;
use crate::registry::{System, SystemContext, SystemTarget};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Client: input
// ---------------------------------------------------------------------------

/// Turns the local [`InputContext`](crate::input::InputContext) into actions.
///
/// Actions go through the client's queue with the configured simulated
/// latency; the client handlers then forward them to the server.
#[derive(Debug, Default)]
pub struct InputSystem;

impl System for InputSystem {
    fn name(&self) -> &str {
        "input"
    }

    fn query(&self) -> Query {
        Query::all().with::<Player>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Client
    }

    fn priority(&self) -> i32 {
        100
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        _dt: f32,
    ) -> Result<(), EngineError> {
        let Some(player) = ctx.input.player else {
            return Ok(());
        };
        let delay = ctx.config.simulated_latency_ms;
        let (jump, shoot_portal, attack) = ctx.input.take_presses();
        let move_x = if ctx.input.move_x.is_finite() {
            ctx.input.move_x.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        // A held direction is resent every tick; friction would stop the
        // avatar otherwise.
        if move_x != 0.0 || move_x != ctx.input.last_move_x || jump {
            let dir = Vec2::new(move_x, if jump { 1.0 } else { 0.0 });
            ctx.actions
                .enqueue_delayed(Action::MovePlayer(MovePlayer { player, dir }), delay);
            ctx.input.last_move_x = move_x;
        }

        if shoot_portal || attack {
            let facing = entities
                .iter()
                .filter_map(|id| ctx.world.try_get::<Player>(id))
                .find(|p| p.index == player)
                .map_or(1, |p| p.facing);
            let aim = Vec2::new(ctx.input.aim.0, ctx.input.aim.1)
                .normalized()
                .unwrap_or(Vec2::new(facing as f32, 0.0));
            if shoot_portal {
                ctx.actions
                    .enqueue_delayed(Action::ShootPortal(ShootPortal { player, aim }), delay);
            }
            if attack {
                ctx.actions
                    .enqueue_delayed(Action::Attack(Attack { player, aim }), delay);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server: players
// ---------------------------------------------------------------------------

/// Refreshes `Player::grounded` from the ground ray.
#[derive(Debug, Default)]
pub struct PlayerStateSystem;

impl System for PlayerStateSystem {
    fn name(&self) -> &str {
        "player_state"
    }

    fn query(&self) -> Query {
        Query::all()
            .with::<Player>()
            .with::<Transform>()
            .with::<Collider>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Server
    }

    fn priority(&self) -> i32 {
        60
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        _dt: f32,
    ) -> Result<(), EngineError> {
        for id in entities {
            let grounded = standing_on_ground(ctx.world, ctx.physics, ctx.config, id);
            let player = ctx.world.get_mut::<Player>(id)?;
            if player.grounded != grounded {
                player.grounded = grounded;
            }
        }
        Ok(())
    }
}

/// Caps player speed at `tuning.max_speed`. Installed only when it is set.
#[derive(Debug, Default)]
pub struct VelocityClampSystem;

impl System for VelocityClampSystem {
    fn name(&self) -> &str {
        "velocity_clamp"
    }

    fn query(&self) -> Query {
        Query::all().with::<Player>().with::<Rigidbody>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Server
    }

    fn priority(&self) -> i32 {
        50
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        _dt: f32,
    ) -> Result<(), EngineError> {
        let Some(max) = ctx.config.tuning.max_speed else {
            return Ok(());
        };
        for id in entities {
            rigidbody::clamp_speed(ctx.world.get_mut::<Rigidbody>(id)?, max);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server: projectiles, portals
// ---------------------------------------------------------------------------

/// Counts projectile lifetimes down and removes expired ones.
#[derive(Debug, Default)]
pub struct ProjectileSystem;

impl System for ProjectileSystem {
    fn name(&self) -> &str {
        "projectiles"
    }

    fn query(&self) -> Query {
        Query::all().with::<Projectile>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Server
    }

    fn priority(&self) -> i32 {
        40
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        dt: f32,
    ) -> Result<(), EngineError> {
        for id in entities {
            let projectile = ctx.world.get_mut::<Projectile>(id)?;
            projectile.ttl -= dt;
            if projectile.ttl <= 0.0 {
                ctx.world.destroy(id)?;
                tracing::trace!(entity = %id, "projectile expired");
            }
        }
        Ok(())
    }
}

/// Clears [`Teleported`] once its cooldown elapses.
#[derive(Debug, Default)]
pub struct TeleportCooldownSystem;

impl System for TeleportCooldownSystem {
    fn name(&self) -> &str {
        "teleport_cooldown"
    }

    fn query(&self) -> Query {
        Query::all().with::<Teleported>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Server
    }

    fn priority(&self) -> i32 {
        31
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        dt: f32,
    ) -> Result<(), EngineError> {
        for id in entities {
            let t = ctx.world.get_mut::<Teleported>(id)?;
            t.cooldown -= dt;
            if t.cooldown <= 0.0 {
                ctx.world.remove_component::<Teleported>(id)?;
            }
        }
        Ok(())
    }
}

/// Links the portals once both players have placed one.
#[derive(Debug, Default)]
pub struct PortalSystem;

impl System for PortalSystem {
    fn name(&self) -> &str {
        "portals"
    }

    fn query(&self) -> Query {
        Query::all().with::<Portal>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Server
    }

    fn priority(&self) -> i32 {
        30
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        _dt: f32,
    ) -> Result<(), EngineError> {
        let mut owners = [false; 2];
        for id in entities {
            if let Some(slot) = owners.get_mut(usize::from(ctx.world.get::<Portal>(id)?.owner)) {
                *slot = true;
            }
        }
        let linked = owners.iter().all(|o| *o);
        for id in entities {
            let portal = ctx.world.get_mut::<Portal>(id)?;
            if portal.linked != linked {
                portal.linked = linked;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server: level progression
// ---------------------------------------------------------------------------

/// Advances to the next level once every goal has been reached.
#[derive(Debug, Default)]
pub struct LevelSystem;

impl System for LevelSystem {
    fn name(&self) -> &str {
        "levels"
    }

    fn query(&self) -> Query {
        Query::all().with::<Goal>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Server
    }

    fn priority(&self) -> i32 {
        20
    }

    fn fixed_update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        _dt: f32,
    ) -> Result<(), EngineError> {
        if entities.is_empty() {
            return Ok(());
        }
        for id in entities {
            if !ctx.world.get::<Goal>(id)?.reached {
                return Ok(());
            }
        }
        ctx.room.meta.completed_levels += 1;
        let next = ctx.room.meta.level + 1;
        tracing::info!(
            completed = ctx.room.meta.completed_levels,
            tick = ctx.tick,
            "level complete"
        );
        levels::build_level(ctx.world, ctx.room, next)
    }
}

// ---------------------------------------------------------------------------
// Client: interpolation
// ---------------------------------------------------------------------------

/// Eases each drawn entity's [`Interpolated`] pose toward its replicated
/// [`Transform`].
#[derive(Debug)]
pub struct InterpolationSystem {
    /// Fraction of the remaining gap closed per second.
    pub rate: f32,
}

impl Default for InterpolationSystem {
    fn default() -> Self {
        Self { rate: 15.0 }
    }
}

impl System for InterpolationSystem {
    fn name(&self) -> &str {
        "interpolation"
    }

    fn query(&self) -> Query {
        Query::all().with::<Transform>().with::<Renderable>()
    }

    fn target(&self) -> SystemTarget {
        SystemTarget::Client
    }

    fn update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &[EntityId],
        dt: f32,
    ) -> Result<(), EngineError> {
        let k = (dt * self.rate).clamp(0.0, 1.0);
        for id in entities {
            let (x, y, rotation) = {
                let t = ctx.world.get::<Transform>(id)?;
                (t.x, t.y, t.rotation)
            };
            match ctx.world.try_get_mut::<Interpolated>(id) {
                Some(pose) => {
                    pose.x += (x - pose.x) * k;
                    pose.y += (y - pose.y) * k;
                    pose.rotation += (rotation - pose.rotation) * k;
                }
                None => {
                    ctx.world.add(id, Interpolated { x, y, rotation })?;
                }
            }
        }
        Ok(())
    }
}
