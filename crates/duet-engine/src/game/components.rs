//! Gameplay components (type ids below the engine range).

use duet_ecs::component::{ComponentCatalog, TypeOrigin};
use duet_ecs::EcsError;

use crate::components::register_engine_components;

duet_ecs::component! {
    /// A player avatar.
    pub struct Player: 0, "player" {
        pub index: u8 = 0,
        pub grounded: bool = false,
        /// `1` facing right, `-1` facing left.
        pub facing: i32 = 1,
    }
}

duet_ecs::component! {
    /// A goal pad for one player. `reached` sticks once set.
    pub struct Goal: 1, "goal" {
        pub player_index: u8 = 0,
        pub reached: bool = false,
    }
}

duet_ecs::component! {
    /// A portal placed by player `owner`, facing along its surface normal.
    pub struct Portal: 2, "portal" {
        pub owner: u8 = 0,
        pub linked: bool = false,
        pub normal_x: f32 = 0.0,
        pub normal_y: f32 = 1.0,
    }
}

duet_ecs::component! {
    pub struct Projectile: 3, "projectile" {
        /// Entity id of the shooter.
        pub owner: String = String::new(),
        /// Seconds left before the projectile expires.
        pub ttl: f32 = 0.0,
    }
}

duet_ecs::component! {
    /// Destroyed when the level it belongs to is torn down.
    pub struct LevelMember: 4, "level_member" {
        pub level: u32 = 0,
    }
}

duet_ecs::component! {
    /// Recently teleported; portals ignore the body until `cooldown` runs out.
    pub struct Teleported: 5, "teleported" {
        pub cooldown: f32 = 0.0,
    }
}

duet_ecs::component! {
    /// Client-side smoothed pose used for drawing.
    pub struct Interpolated: 6, "interpolated" {
        pub x: f32 = 0.0,
        pub y: f32 = 0.0,
        pub rotation: f32 = 0.0,
    }
}

/// A catalog with every engine and gameplay component.
pub fn catalog() -> Result<ComponentCatalog, EcsError> {
    let mut catalog = ComponentCatalog::new();
    register_engine_components(&mut catalog)?;
    catalog.register::<Player>(TypeOrigin::Game)?;
    catalog.register::<Goal>(TypeOrigin::Game)?;
    catalog.register::<Portal>(TypeOrigin::Game)?;
    catalog.register::<Projectile>(TypeOrigin::Game)?;
    catalog.register::<LevelMember>(TypeOrigin::Game)?;
    catalog.register::<Teleported>(TypeOrigin::Game)?;
    catalog.register::<Interpolated>(TypeOrigin::Game)?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_holds_all_types() {
        assert_eq!(catalog().unwrap().len(), 14);
    }
}
