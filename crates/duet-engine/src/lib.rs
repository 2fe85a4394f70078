//! # duet-engine
//!
//! Scheduler, action dispatch, physics, and room hosts for a two-player
//! cooperative game built on [`duet_ecs`] and replicated with [`duet_sync`].
//!
//! A [`Registry`](registry::Registry) exists on each side of the connection.
//! The server registry is authoritative: it runs the fixed-rate simulation
//! and is the only place actions mutate state. A client registry mirrors the
//! server's world from patches and runs render-side systems at frame rate.
//! [`room::ServerRoom`] and [`room::ClientRoom`] wrap the two registries with
//! their wire handling.
//!
//! # Quick Start
//!
//! ```
//! use duet_engine::config::EngineConfig;
//! use duet_engine::room::{ClientRoom, ServerRoom};
//!
//! let config = EngineConfig::default();
//! let mut server = ServerRoom::new(config.clone()).unwrap();
//! let mut alice = ClientRoom::new(config.clone(), "alice").unwrap();
//! let mut bob = ClientRoom::new(config, "bob").unwrap();
//!
//! let hello = server.join("alice", "Alice").unwrap();
//! alice.receive(&hello);
//! let hello = server.join("bob", "Bob").unwrap();
//! bob.receive(&hello);
//!
//! for (session, bytes) in server.advance(100.0).unwrap() {
//!     match session.as_str() {
//!         "alice" => alice.receive(&bytes),
//!         _ => bob.receive(&bytes),
//!     }
//! }
//! alice.frame(1.0 / 60.0).unwrap();
//! assert!(alice.registry().room().meta.started);
//! ```

#![deny(unsafe_code)]

pub mod action;
pub mod components;
pub mod config;
pub mod game;
pub mod input;
pub mod logging;
pub mod physics;
pub mod registry;
pub mod room;

pub use duet_ecs;
pub use duet_sync;

use duet_ecs::EcsError;
use duet_sync::SyncError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Ecs(#[from] EcsError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration is not valid JSON: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("level data: {0}")]
    Level(String),

    #[error("room is full, cannot seat session {session}")]
    RoomFull { session: String },

    #[error("unknown session {session}")]
    UnknownSession { session: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::action::{Action, ActionContext, ActionKind, ActionQueue, Vec2};
    pub use crate::components::{
        Collider, Color, Joint, Renderable, Rigidbody, Sprite, Transform,
    };
    pub use crate::config::EngineConfig;
    pub use crate::physics::{
        CollisionContact, CollisionListener, CollisionPhase, PhysicsWorld, RayFilter, RayHit,
    };
    pub use crate::registry::{Registry, RegistryKind, System, SystemContext, SystemTarget};
    pub use crate::room::{ClientRoom, ServerRoom};
    pub use crate::EngineError;
}
