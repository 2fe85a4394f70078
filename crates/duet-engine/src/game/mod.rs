//! The two-player puzzle game: components, actions, systems, and levels.
//!
//! [`install`] wires everything into a [`Registry`]. Systems whose target
//! does not match the registry are skipped, so the same call sets up both
//! sides. Only the server registers authoritative handlers and collision
//! listeners and builds the first level; the client mirrors it.

pub mod actions;
pub mod components;
pub mod levels;
pub mod listeners;
pub mod systems;

use crate::physics::PhysicsSystem;
use crate::registry::{Registry, RegistryKind};
use crate::EngineError;

use self::systems::{
    InputSystem, InterpolationSystem, LevelSystem, PlayerStateSystem, PortalSystem,
    ProjectileSystem, TeleportCooldownSystem, VelocityClampSystem,
};

/// Install the game's systems, handlers, and listeners into `registry`.
pub fn install(registry: &mut Registry) -> Result<(), EngineError> {
    registry.add_system(InputSystem);
    registry.add_system(PlayerStateSystem);
    if registry.config().tuning.max_speed.is_some() {
        registry.add_system(VelocityClampSystem);
    }
    registry.add_system(ProjectileSystem);
    registry.add_system(TeleportCooldownSystem);
    registry.add_system(PortalSystem);
    registry.add_system(LevelSystem);
    registry.add_system(InterpolationSystem::default());
    registry.add_system(PhysicsSystem::default());

    match registry.kind() {
        RegistryKind::Server => {
            actions::register_server_handlers(registry.actions_mut());
            listeners::register(registry.physics_mut());
            let (world, room) = registry.state_mut();
            levels::build_level(world, room, 0)?;
        }
        RegistryKind::Client => actions::register_client_handlers(registry.actions_mut()),
    }
    tracing::debug!(kind = ?registry.kind(), systems = ?registry.system_names(), "game installed");
    Ok(())
}
