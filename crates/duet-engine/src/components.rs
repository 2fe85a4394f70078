//! Engine components (type ids `191..=255`).
//!
//! These are the records the engine itself reads: spatial transform, render
//! hints, collider and rigidbody descriptors, and joint constraints. They are
//! plain data; every mutation helper is a free function in the module named
//! after the component, taking the record explicitly:
//!
//! ```
//! use duet_engine::components::{rigidbody, Rigidbody};
//!
//! let mut rb = Rigidbody::default();
//! rigidbody::set_velocity(&mut rb, 3.0, -1.0);
//! assert_eq!((rb.vx, rb.vy), (3.0, -1.0));
//! ```

use duet_ecs::component::{ComponentCatalog, TypeOrigin};
use duet_ecs::EcsError;

duet_ecs::component! {
    /// Position, rotation (radians), and scale in world units.
    pub struct Transform: 191, "transform" {
        pub x: f32 = 0.0,
        pub y: f32 = 0.0,
        pub rotation: f32 = 0.0,
        pub scale_x: f32 = 1.0,
        pub scale_y: f32 = 1.0,
    }
}

duet_ecs::component! {
    /// RGBA tint, each channel in `0..=255`.
    pub struct Color: 192, "color" {
        pub r: u8 = 255,
        pub g: u8 = 255,
        pub b: u8 = 255,
        pub a: u8 = 255,
    }
}

duet_ecs::component! {
    /// Which sprite the renderer draws, see [`sprite`] for kinds.
    pub struct Sprite: 193, "sprite" {
        pub kind: u8 = sprite::BLOCK,
        pub opacity: f32 = 1.0,
    }
}

duet_ecs::component! {
    /// Collision shape. `shape` selects which dimension fields apply.
    ///
    /// `listener` names the collision listener set invoked for this collider;
    /// empty means none.
    pub struct Collider: 194, "collider" {
        pub shape: u8 = collider::RECT,
        pub width: f32 = 1.0,
        pub height: f32 = 1.0,
        pub radius: f32 = 0.5,
        pub is_sensor: bool = false,
        pub listener: String = String::new(),
    }
}

duet_ecs::component! {
    /// Rigid body parameters and current velocity.
    pub struct Rigidbody: 195, "rigidbody" {
        pub is_static: bool = false,
        pub vx: f32 = 0.0,
        pub vy: f32 = 0.0,
        pub angular_velocity: f32 = 0.0,
        pub friction: f32 = 0.5,
        pub restitution: f32 = 0.0,
        pub fixed_rotation: bool = false,
        pub gravity_scale: f32 = 1.0,
    }
}

duet_ecs::component! {
    /// Marks an entity the renderer should draw.
    pub struct Renderable: 196, "renderable" {}
}

duet_ecs::component! {
    /// Revolute pin between two bodies, each anchored at a local offset.
    pub struct Joint: 197, "joint" {
        pub entity_a: String = String::new(),
        pub entity_b: String = String::new(),
        pub anchor_ax: f32 = 0.0,
        pub anchor_ay: f32 = 0.0,
        pub anchor_bx: f32 = 0.0,
        pub anchor_by: f32 = 0.0,
    }
}

/// Register every engine component with `catalog`.
pub fn register_engine_components(catalog: &mut ComponentCatalog) -> Result<(), EcsError> {
    catalog.register::<Transform>(TypeOrigin::Engine)?;
    catalog.register::<Color>(TypeOrigin::Engine)?;
    catalog.register::<Sprite>(TypeOrigin::Engine)?;
    catalog.register::<Collider>(TypeOrigin::Engine)?;
    catalog.register::<Rigidbody>(TypeOrigin::Engine)?;
    catalog.register::<Renderable>(TypeOrigin::Engine)?;
    catalog.register::<Joint>(TypeOrigin::Engine)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Free-function helpers
// ---------------------------------------------------------------------------

pub mod transform {
    use super::Transform;

    pub fn set_position(t: &mut Transform, x: f32, y: f32) {
        t.x = x;
        t.y = y;
    }

    pub fn translate(t: &mut Transform, dx: f32, dy: f32) {
        t.x += dx;
        t.y += dy;
    }
}

pub mod color {
    use super::Color;

    pub fn rgba(r: u8, g: u8, b: u8, a: u8) -> Color {
        Color { r, g, b, a }
    }
}

pub mod sprite {
    pub const PLAYER: u8 = 0;
    pub const BLOCK: u8 = 1;
    pub const GOAL: u8 = 2;
    pub const PORTAL: u8 = 3;
    pub const PROJECTILE: u8 = 4;
    pub const PLANK: u8 = 5;

    use super::Sprite;

    pub fn set_opacity(s: &mut Sprite, opacity: f32) {
        s.opacity = opacity.clamp(0.0, 1.0);
    }
}

/// Collider shapes and shape setters.
///
/// The physics adapter compares each collider's shape fields with the ones
/// its body was built from and rebuilds the body on any difference.
pub mod collider {
    use super::Collider;

    pub const RECT: u8 = 0;
    pub const CIRCLE: u8 = 1;

    pub fn rect(width: f32, height: f32) -> Collider {
        Collider {
            shape: RECT,
            width,
            height,
            ..Default::default()
        }
    }

    pub fn circle(radius: f32) -> Collider {
        Collider {
            shape: CIRCLE,
            radius,
            ..Default::default()
        }
    }

    pub fn set_rect(c: &mut Collider, width: f32, height: f32) {
        c.shape = RECT;
        c.width = width;
        c.height = height;
    }

    pub fn set_circle(c: &mut Collider, radius: f32) {
        c.shape = CIRCLE;
        c.radius = radius;
    }

    pub fn set_sensor(c: &mut Collider, is_sensor: bool) {
        c.is_sensor = is_sensor;
    }

    pub fn set_listener(c: &mut Collider, listener: &str) {
        c.listener = listener.to_owned();
    }

    /// Half height of the shape, used by ground rays.
    pub fn half_height(c: &Collider) -> f32 {
        match c.shape {
            CIRCLE => c.radius,
            _ => c.height * 0.5,
        }
    }
}

pub mod rigidbody {
    use super::Rigidbody;

    pub fn fixed() -> Rigidbody {
        Rigidbody {
            is_static: true,
            ..Default::default()
        }
    }

    pub fn set_velocity(rb: &mut Rigidbody, vx: f32, vy: f32) {
        rb.vx = vx;
        rb.vy = vy;
    }

    pub fn set_static(rb: &mut Rigidbody, is_static: bool) {
        rb.is_static = is_static;
    }

    /// Scale velocity down so its magnitude is at most `max`.
    pub fn clamp_speed(rb: &mut Rigidbody, max: f32) {
        let speed = (rb.vx * rb.vx + rb.vy * rb.vy).sqrt();
        if speed > max && speed > 0.0 {
            let k = max / speed;
            rb.vx *= k;
            rb.vy *= k;
        }
    }
}

pub mod joint {
    use duet_ecs::entity::EntityId;

    use super::Joint;

    pub fn pin(a: &EntityId, b: &EntityId, anchor_a: (f32, f32), anchor_b: (f32, f32)) -> Joint {
        Joint {
            entity_a: a.as_str().to_owned(),
            entity_b: b.as_str().to_owned(),
            anchor_ax: anchor_a.0,
            anchor_ay: anchor_a.1,
            anchor_bx: anchor_b.0,
            anchor_by: anchor_b.1,
        }
    }

    pub fn endpoints(j: &Joint) -> (EntityId, EntityId) {
        (
            EntityId::new(j.entity_a.clone()),
            EntityId::new(j.entity_b.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_ecs::component::{Component, ComponentTypeId};

    #[test]
    fn engine_ids_are_reserved_range() {
        let mut catalog = ComponentCatalog::new();
        register_engine_components(&mut catalog).unwrap();
        assert_eq!(catalog.len(), 7);
        assert_eq!(Transform::schema().type_id, ComponentTypeId(191));
        assert!(Joint::schema().type_id.is_engine_reserved());
    }

    #[test]
    fn clamp_speed_keeps_direction() {
        let mut rb = Rigidbody::default();
        rigidbody::set_velocity(&mut rb, 6.0, 8.0);
        rigidbody::clamp_speed(&mut rb, 5.0);
        assert!((rb.vx - 3.0).abs() < 1e-5);
        assert!((rb.vy - 4.0).abs() < 1e-5);
    }

    #[test]
    fn shape_setters_switch_kind() {
        let mut c = collider::rect(2.0, 1.0);
        assert_eq!(collider::half_height(&c), 0.5);
        collider::set_circle(&mut c, 0.25);
        assert_eq!(c.shape, collider::CIRCLE);
        assert_eq!(collider::half_height(&c), 0.25);
    }
}
