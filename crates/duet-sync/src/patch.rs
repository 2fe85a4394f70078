//! Structural patches of the replicated root and their binary codec.
//!
//! A [`Patch`] is an ordered list of [`PatchOp`]s. Ops are emitted so that a
//! receiver applying them front to back never sees an update for an entity
//! before that entity's creation, nor any op for an entity after its removal:
//!
//! 1. room metadata and player records,
//! 2. every entity removal,
//! 3. per surviving or new entity (ascending id): its creation if new, then
//!    component removals, component additions, and field updates.
//!
//! Patches are encoded with `bincode` (serde mode, standard config).

use duet_ecs::component::{ComponentTypeId, FieldValue};
use duet_ecs::entity::EntityId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::room::{PlayerRecord, RoomMeta};
use crate::SyncError;

// ---------------------------------------------------------------------------
// PatchOp
// ---------------------------------------------------------------------------

/// One structural change to the replicated root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatchOp {
    /// Room metadata replaced wholesale.
    SetMeta(RoomMeta),
    /// A player record added or changed.
    UpsertPlayer { session: String, record: PlayerRecord },
    /// A player record removed.
    RemovePlayer { session: String },
    /// A new, empty entity.
    AddEntity { entity: EntityId },
    /// An entity and all its components removed.
    RemoveEntity { entity: EntityId },
    /// A new component with its full field values.
    AddComponent {
        entity: EntityId,
        type_id: ComponentTypeId,
        values: Vec<FieldValue>,
    },
    /// A component removed.
    RemoveComponent {
        entity: EntityId,
        type_id: ComponentTypeId,
    },
    /// One field of an existing component overwritten.
    SetField {
        entity: EntityId,
        type_id: ComponentTypeId,
        index: u16,
        value: FieldValue,
    },
}

impl PatchOp {
    /// The entity this op targets, if any.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            PatchOp::AddEntity { entity }
            | PatchOp::RemoveEntity { entity }
            | PatchOp::AddComponent { entity, .. }
            | PatchOp::RemoveComponent { entity, .. }
            | PatchOp::SetField { entity, .. } => Some(entity),
            PatchOp::SetMeta(_) | PatchOp::UpsertPlayer { .. } | PatchOp::RemovePlayer { .. } => {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A batch of ops summarizing everything that changed since the previous
/// emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Emission sequence number. Delta patches increase it by exactly one.
    pub seq: u64,
    /// Server tick at which the patch was taken.
    pub tick: u64,
    /// Whether this patch rebuilds the whole root from empty.
    pub full: bool,
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Encode to the binary wire form.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        encode(self)
    }

    /// Decode from the binary wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        decode(bytes)
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encode any wire value with the shared bincode configuration.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SyncError> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

/// Decode any wire value with the shared bincode configuration.
///
/// Trailing bytes after a complete value are rejected.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(SyncError::TrailingBytes {
            extra: bytes.len() - read,
        });
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
