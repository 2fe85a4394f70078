//! Duet Sync -- replication of the server's root state to clients.
//!
//! The replicated root is the server [`World`](duet_ecs::world::World) plus a
//! [`RoomState`](room::RoomState). On the server a
//! [`PatchEncoder`](encoder::PatchEncoder) diffs that root against the last
//! state it emitted and produces a [`Patch`](patch::Patch) of field-level
//! ops. On the client a [`Mirror`](mirror::Mirror) validates each patch and
//! signals a listener that updates the local store in place.
//!
//! # Example
//!
//! ```
//! use duet_ecs::prelude::*;
//! use duet_sync::prelude::*;
//!
//! duet_ecs::component! {
//!     pub struct Position: 191, "position" {
//!         pub x: f32 = 0.0,
//!     }
//! }
//!
//! let mut catalog = ComponentCatalog::new();
//! catalog.register::<Position>(TypeOrigin::Engine).unwrap();
//!
//! let mut server = World::new();
//! let e = server.create();
//! server.add(&e, Position { x: 3.0 }).unwrap();
//!
//! let mut encoder = PatchEncoder::new();
//! let room = RoomState::new();
//! let bytes = encoder.encode(1, &server, &room).unwrap().encode().unwrap();
//!
//! let mut client = World::new();
//! let mut mirror = Mirror::new();
//! mirror
//!     .apply(&Patch::decode(&bytes).unwrap(), &mut WorldSink::new(&mut client, &catalog))
//!     .unwrap();
//! assert_eq!(client.get::<Position>(&e).unwrap().x, 3.0);
//! ```

#![deny(unsafe_code)]

pub mod encoder;
pub mod message;
pub mod mirror;
pub mod patch;
pub mod room;

use duet_ecs::component::ComponentTypeId;
use duet_ecs::entity::EntityId;
use duet_ecs::EcsError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while encoding, decoding, or applying patches.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("wire encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("wire decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("{extra} trailing bytes after message")]
    TrailingBytes { extra: usize },

    #[error("patch out of order: expected seq {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("patch references unknown entity {entity}")]
    UnknownEntity { entity: EntityId },

    #[error("patch re-creates existing entity {entity}")]
    DuplicateEntity { entity: EntityId },

    #[error("patch references missing component {type_id:?} on {entity}")]
    UnknownComponent {
        entity: EntityId,
        type_id: ComponentTypeId,
    },

    #[error("patch re-adds component {type_id:?} on {entity}")]
    DuplicateComponent {
        entity: EntityId,
        type_id: ComponentTypeId,
    },

    #[error(transparent)]
    Ecs(#[from] EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::encoder::PatchEncoder;
    pub use crate::message::{ClientMessage, ServerMessage, WireAction};
    pub use crate::mirror::{Mirror, MirrorEvent, MirrorListener, WorldSink};
    pub use crate::patch::{Patch, PatchOp};
    pub use crate::room::{PlayerRecord, RoomMeta, RoomState};
    pub use crate::SyncError;
}
