//! Queued collision listeners for goals, portals, and projectiles.
//!
//! All three run after the physics write-back, so they may freely create,
//! move, and destroy entities.

use duet_ecs::query::Query;

use crate::components::{Collider, Rigidbody, Transform};
use crate::game::actions::{PORTAL_LISTENER, PROJECTILE_LISTENER};
use crate::game::components::{Goal, Player, Portal, Projectile, Teleported};
use crate::game::levels::GOAL_LISTENER;
use crate::physics::{CollisionContact, CollisionListener, CollisionPhase, ListenerContext, PhysicsWorld};
use crate::EngineError;

/// Velocity added to a body hit by a projectile.
const KNOCKBACK: f32 = 6.0;
/// How far in front of the exit portal a teleported body appears.
const EXIT_OFFSET: f32 = 1.0;

pub fn register(physics: &mut PhysicsWorld) {
    physics.add_listener(
        GOAL_LISTENER,
        CollisionPhase::Start,
        CollisionListener::Queued(Box::new(goal_touched)),
    );
    physics.add_listener(
        PORTAL_LISTENER,
        CollisionPhase::Start,
        CollisionListener::Queued(Box::new(portal_entered)),
    );
    physics.add_listener(
        PROJECTILE_LISTENER,
        CollisionPhase::Start,
        CollisionListener::Queued(Box::new(projectile_hit)),
    );
}

/// Marks the goal reached when its own player touches it.
fn goal_touched(ctx: &mut ListenerContext<'_>, contact: &CollisionContact) -> Result<(), EngineError> {
    let Some(index) = ctx.world.try_get::<Player>(&contact.other).map(|p| p.index) else {
        return Ok(());
    };
    let Some(goal) = ctx.world.try_get_mut::<Goal>(&contact.this) else {
        return Ok(());
    };
    if goal.player_index == index && !goal.reached {
        goal.reached = true;
        tracing::debug!(goal = %contact.this, player = index, "goal reached");
    }
    Ok(())
}

/// Sends a dynamic body through a linked portal to its partner.
fn portal_entered(ctx: &mut ListenerContext<'_>, contact: &CollisionContact) -> Result<(), EngineError> {
    let world = &mut *ctx.world;
    let body = &contact.other;
    if world.has_type::<Teleported>(body)
        || world.has_type::<Projectile>(body)
        || world.has_type::<Portal>(body)
    {
        return Ok(());
    }
    if world.try_get::<Rigidbody>(body).map_or(true, |rb| rb.is_static) {
        return Ok(());
    }
    let Some(owner) = world
        .try_get::<Portal>(&contact.this)
        .filter(|p| p.linked)
        .map(|p| p.owner)
    else {
        return Ok(());
    };
    let Some(exit) = world
        .scan(&Query::all().with::<Portal>().with::<Transform>())
        .into_iter()
        .find(|id| world.try_get::<Portal>(id).is_some_and(|p| p.owner != owner))
    else {
        return Ok(());
    };
    let (ex, ey) = {
        let t = world.get::<Transform>(&exit)?;
        (t.x, t.y)
    };
    let (nx, ny) = {
        let p = world.get::<Portal>(&exit)?;
        (p.normal_x, p.normal_y)
    };
    let Some(t) = world.try_get_mut::<Transform>(body) else {
        return Ok(());
    };
    t.x = ex + nx * EXIT_OFFSET;
    t.y = ey + ny * EXIT_OFFSET;
    world.add(
        body,
        Teleported {
            cooldown: ctx.config.tuning.portal_cooldown,
        },
    )?;
    tracing::debug!(entity = %body, from = %contact.this, to = %exit, "teleported");
    Ok(())
}

/// Knocks back the first non-owner body a projectile touches and removes the
/// projectile.
fn projectile_hit(ctx: &mut ListenerContext<'_>, contact: &CollisionContact) -> Result<(), EngineError> {
    let world = &mut *ctx.world;
    let Some(projectile) = world.try_get::<Projectile>(&contact.this) else {
        return Ok(());
    };
    if projectile.owner == contact.other.as_str() {
        return Ok(());
    }
    if world.try_get::<Collider>(&contact.other).is_some_and(|c| c.is_sensor) {
        return Ok(());
    }
    let (dx, dy) = world
        .try_get::<Rigidbody>(&contact.this)
        .map(|rb| {
            let len = (rb.vx * rb.vx + rb.vy * rb.vy).sqrt();
            if len > 0.0 {
                (rb.vx / len, rb.vy / len)
            } else {
                (0.0, 0.0)
            }
        })
        .unwrap_or((0.0, 0.0));
    if let Some(rb) = world.try_get_mut::<Rigidbody>(&contact.other) {
        if !rb.is_static {
            rb.vx += dx * KNOCKBACK;
            rb.vy += dy * KNOCKBACK;
        }
    }
    world.destroy(&contact.this)?;
    tracing::debug!(projectile = %contact.this, target = %contact.other, "projectile hit");
    Ok(())
}
