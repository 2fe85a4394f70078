//! Client-side patch application.
//!
//! A [`Mirror`] tracks the shape of the mirrored root (which entities exist
//! and which component types each carries, plus the room state) and checks
//! every incoming op against it before signalling a [`MirrorListener`]. The
//! listener is where the client's store is actually changed; [`WorldSink`] is
//! the listener that drives a [`World`].
//!
//! Field updates are applied in place to the existing component instance, so
//! entity and component identity survive any number of patches.

use std::collections::{BTreeMap, BTreeSet};

use duet_ecs::component::{ComponentCatalog, ComponentTypeId, FieldValue};
use duet_ecs::entity::EntityId;
use duet_ecs::world::World;

use crate::patch::{Patch, PatchOp};
use crate::room::RoomState;
use crate::SyncError;

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Receives the mirrored collection's add/remove/change signals.
///
/// Signals arrive in patch order, already validated: an entity is always
/// announced before any of its components, and nothing is announced for an
/// entity after its removal.
pub trait MirrorListener {
    fn entity_added(&mut self, entity: &EntityId) -> Result<(), SyncError>;
    fn entity_removed(&mut self, entity: &EntityId) -> Result<(), SyncError>;
    fn component_added(
        &mut self,
        entity: &EntityId,
        type_id: ComponentTypeId,
        values: &[FieldValue],
    ) -> Result<(), SyncError>;
    fn component_removed(
        &mut self,
        entity: &EntityId,
        type_id: ComponentTypeId,
    ) -> Result<(), SyncError>;
    fn field_changed(
        &mut self,
        entity: &EntityId,
        type_id: ComponentTypeId,
        index: usize,
        value: &FieldValue,
    ) -> Result<(), SyncError>;
    /// The room metadata or a player record changed.
    fn room_changed(&mut self, _room: &RoomState) {}
}

/// A summary of one applied signal, recorded by [`WorldSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    EntityAdded(EntityId),
    EntityRemoved(EntityId),
    ComponentAdded(EntityId, ComponentTypeId),
    ComponentRemoved(EntityId, ComponentTypeId),
    FieldChanged(EntityId, ComponentTypeId, usize),
    RoomChanged,
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

/// Validating applier for an ordered stream of patches.
#[derive(Debug, Default)]
pub struct Mirror {
    last_seq: Option<u64>,
    room: RoomState,
    shape: BTreeMap<EntityId, BTreeSet<ComponentTypeId>>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirrored room state.
    pub fn room(&self) -> &RoomState {
        &self.room
    }

    /// Sequence number of the last applied patch.
    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Number of mirrored entities.
    pub fn entity_count(&self) -> usize {
        self.shape.len()
    }

    /// Apply `patch`, signalling `listener` for each op.
    ///
    /// A delta must carry the sequence number after the last applied one. A
    /// full patch first removes every mirrored entity, then rebuilds. On
    /// error, ops before the failing one stay applied.
    pub fn apply(
        &mut self,
        patch: &Patch,
        listener: &mut dyn MirrorListener,
    ) -> Result<(), SyncError> {
        if patch.full {
            let stale: Vec<EntityId> = self.shape.keys().cloned().collect();
            for entity in stale {
                listener.entity_removed(&entity)?;
                self.shape.remove(&entity);
            }
            self.room = RoomState::default();
        } else {
            let expected = self.last_seq.map_or(1, |s| s + 1);
            if patch.seq != expected {
                return Err(SyncError::OutOfOrder {
                    expected,
                    got: patch.seq,
                });
            }
        }

        let mut room_dirty = false;
        for op in &patch.ops {
            room_dirty |= self.apply_op(op, listener)?;
        }
        if room_dirty {
            listener.room_changed(&self.room);
        }
        self.last_seq = Some(patch.seq);
        tracing::trace!(seq = patch.seq, ops = patch.ops.len(), "patch applied");
        Ok(())
    }

    /// Returns whether the op touched the room state.
    fn apply_op(&mut self, op: &PatchOp, listener: &mut dyn MirrorListener) -> Result<bool, SyncError> {
        match op {
            PatchOp::SetMeta(meta) => {
                self.room.meta = meta.clone();
                return Ok(true);
            }
            PatchOp::UpsertPlayer { session, record } => {
                self.room.players.insert(session.clone(), record.clone());
                return Ok(true);
            }
            PatchOp::RemovePlayer { session } => {
                self.room.players.remove(session);
                return Ok(true);
            }
            PatchOp::AddEntity { entity } => {
                if self.shape.contains_key(entity) {
                    return Err(SyncError::DuplicateEntity {
                        entity: entity.clone(),
                    });
                }
                listener.entity_added(entity)?;
                self.shape.insert(entity.clone(), BTreeSet::new());
            }
            PatchOp::RemoveEntity { entity } => {
                if self.shape.remove(entity).is_none() {
                    return Err(SyncError::UnknownEntity {
                        entity: entity.clone(),
                    });
                }
                listener.entity_removed(entity)?;
            }
            PatchOp::AddComponent {
                entity,
                type_id,
                values,
            } => {
                let types = self.types_mut(entity)?;
                if types.contains(type_id) {
                    return Err(SyncError::DuplicateComponent {
                        entity: entity.clone(),
                        type_id: *type_id,
                    });
                }
                listener.component_added(entity, *type_id, values)?;
                self.types_mut(entity)?.insert(*type_id);
            }
            PatchOp::RemoveComponent { entity, type_id } => {
                if !self.types_mut(entity)?.remove(type_id) {
                    return Err(SyncError::UnknownComponent {
                        entity: entity.clone(),
                        type_id: *type_id,
                    });
                }
                listener.component_removed(entity, *type_id)?;
            }
            PatchOp::SetField {
                entity,
                type_id,
                index,
                value,
            } => {
                if !self.types_mut(entity)?.contains(type_id) {
                    return Err(SyncError::UnknownComponent {
                        entity: entity.clone(),
                        type_id: *type_id,
                    });
                }
                listener.field_changed(entity, *type_id, usize::from(*index), value)?;
            }
        }
        Ok(false)
    }

    fn types_mut(&mut self, entity: &EntityId) -> Result<&mut BTreeSet<ComponentTypeId>, SyncError> {
        self.shape
            .get_mut(entity)
            .ok_or_else(|| SyncError::UnknownEntity {
                entity: entity.clone(),
            })
    }
}

// ---------------------------------------------------------------------------
// WorldSink
// ---------------------------------------------------------------------------

/// [`MirrorListener`] that applies signals to a client [`World`].
///
/// New components are built through the [`ComponentCatalog`]; field updates
/// go through the type-erased setter on the stored instance.
pub struct WorldSink<'a> {
    world: &'a mut World,
    catalog: &'a ComponentCatalog,
    events: Vec<MirrorEvent>,
}

impl<'a> WorldSink<'a> {
    pub fn new(world: &'a mut World, catalog: &'a ComponentCatalog) -> Self {
        Self {
            world,
            catalog,
            events: Vec::new(),
        }
    }

    /// Signals applied so far, in order.
    pub fn events(&self) -> &[MirrorEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<MirrorEvent> {
        self.events
    }
}

impl MirrorListener for WorldSink<'_> {
    fn entity_added(&mut self, entity: &EntityId) -> Result<(), SyncError> {
        self.world.create_with_id(entity.clone())?;
        self.events.push(MirrorEvent::EntityAdded(entity.clone()));
        Ok(())
    }

    fn entity_removed(&mut self, entity: &EntityId) -> Result<(), SyncError> {
        self.world.destroy(entity)?;
        self.events.push(MirrorEvent::EntityRemoved(entity.clone()));
        Ok(())
    }

    fn component_added(
        &mut self,
        entity: &EntityId,
        type_id: ComponentTypeId,
        values: &[FieldValue],
    ) -> Result<(), SyncError> {
        let component = self.catalog.construct(type_id, values)?;
        self.world.add_boxed(entity, component)?;
        self.events
            .push(MirrorEvent::ComponentAdded(entity.clone(), type_id));
        Ok(())
    }

    fn component_removed(
        &mut self,
        entity: &EntityId,
        type_id: ComponentTypeId,
    ) -> Result<(), SyncError> {
        self.world.remove(entity, type_id)?;
        self.events
            .push(MirrorEvent::ComponentRemoved(entity.clone(), type_id));
        Ok(())
    }

    fn field_changed(
        &mut self,
        entity: &EntityId,
        type_id: ComponentTypeId,
        index: usize,
        value: &FieldValue,
    ) -> Result<(), SyncError> {
        self.world
            .get_dyn_mut(entity, type_id)?
            .set_field_value(index, value)?;
        self.events
            .push(MirrorEvent::FieldChanged(entity.clone(), type_id, index));
        Ok(())
    }

    fn room_changed(&mut self, _room: &RoomState) {
        self.events.push(MirrorEvent::RoomChanged);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
