//! Engine configuration.
//!
//! [`EngineConfig`] gathers the simulation clock, replication rate, physics
//! constants, and gameplay tuning. Every field has a default, so a JSON
//! document only needs to name what it overrides:
//!
//! ```
//! use duet_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "patch_interval_ms": 100,
//!     "tuning": { "jump_force": 12.0 } }"#).unwrap();
//! assert_eq!(config.patch_interval_ms, 100);
//! assert_eq!(config.tuning.jump_force, 12.0);
//! assert_eq!(config.max_substeps, 5);
//! ```

use serde::{Deserialize, Serialize};

use crate::EngineError;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for a registry and the room hosts around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// Most fixed ticks a single frame may run to catch up.
    pub max_substeps: u32,
    /// Milliseconds between patch emissions on the server.
    pub patch_interval_ms: u32,
    /// Delay applied to locally produced actions, in milliseconds.
    pub simulated_latency_ms: u32,
    /// Seed for the server's entity id allocator.
    pub entity_seed: u64,
    pub physics: PhysicsConfig,
    pub tuning: TuningConfig,
}

impl Default for EngineConfig {
    /// 60 Hz simulation, 20 Hz patches, no simulated latency.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            max_substeps: 5,
            patch_interval_ms: 50,
            simulated_latency_ms: 0,
            entity_seed: 0,
            physics: PhysicsConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(EngineError::Config(format!(
                "fixed_dt must be positive and finite, got {}",
                self.fixed_dt
            )));
        }
        if self.max_substeps == 0 {
            return Err(EngineError::Config("max_substeps must be at least 1".into()));
        }
        if self.patch_interval_ms == 0 {
            return Err(EngineError::Config(
                "patch_interval_ms must be at least 1".into(),
            ));
        }
        let gravity = [self.physics.gravity_x, self.physics.gravity_y];
        if gravity.iter().any(|g| !g.is_finite()) {
            return Err(EngineError::Config("gravity must be finite".into()));
        }
        self.tuning.validate()
    }

    /// The fixed step as the `f32` the solver and systems work in.
    pub fn fixed_dt_f32(&self) -> f32 {
        self.fixed_dt as f32
    }
}

// ---------------------------------------------------------------------------
// PhysicsConfig
// ---------------------------------------------------------------------------

/// Physics backend constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity_x: f32,
    pub gravity_y: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity_x: 0.0,
            gravity_y: -20.0,
        }
    }
}

// ---------------------------------------------------------------------------
// TuningConfig
// ---------------------------------------------------------------------------

/// Gameplay constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Horizontal speed while a move direction is held.
    pub move_speed: f32,
    /// Vertical velocity set by a grounded jump.
    pub jump_force: f32,
    /// How far below a player's feet the ground ray reaches.
    pub ground_reach: f32,
    /// Longest distance a portal shot travels.
    pub portal_range: f32,
    /// Seconds before a teleported body may teleport again.
    pub portal_cooldown: f32,
    pub projectile_speed: f32,
    /// Projectile lifetime in seconds.
    pub projectile_ttl: f32,
    /// Velocity magnitude cap for players. `None` leaves speed uncapped.
    pub max_speed: Option<f32>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            move_speed: 6.0,
            jump_force: 10.0,
            ground_reach: 0.1,
            portal_range: 25.0,
            portal_cooldown: 0.5,
            projectile_speed: 18.0,
            projectile_ttl: 1.5,
            max_speed: None,
        }
    }
}

impl TuningConfig {
    fn validate(&self) -> Result<(), EngineError> {
        let positive = [
            ("move_speed", self.move_speed),
            ("jump_force", self.jump_force),
            ("ground_reach", self.ground_reach),
            ("portal_range", self.portal_range),
            ("projectile_speed", self.projectile_speed),
            ("projectile_ttl", self.projectile_ttl),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(EngineError::Config(format!(
                    "tuning.{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !(self.portal_cooldown >= 0.0 && self.portal_cooldown.is_finite()) {
            return Err(EngineError::Config(
                "tuning.portal_cooldown must be non-negative".into(),
            ));
        }
        if let Some(max) = self.max_speed {
            if !(max > 0.0 && max.is_finite()) {
                return Err(EngineError::Config(format!(
                    "tuning.max_speed must be positive, got {max}"
                )));
            }
        }
        Ok(())
    }
}
