//! Server-side patch encoder.
//!
//! The [`PatchEncoder`] keeps the last emitted state of the replicated root
//! (a [`WorldSnapshot`] plus a [`RoomState`]) and, on each emission, diffs the
//! current state against it. Only field-level differences are shipped; the
//! simulation may run many ticks between emissions.

use duet_ecs::snapshot::{EntitySnapshot, WorldSnapshot};
use duet_ecs::world::World;

use crate::patch::{Patch, PatchOp};
use crate::room::RoomState;

/// Diffs the replicated root against the last emitted state.
#[derive(Debug, Default)]
pub struct PatchEncoder {
    seq: u64,
    last_world: WorldSnapshot,
    last_room: RoomState,
}

impl PatchEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the last emitted delta (`0` before any).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Diff the current state against the last emission and advance the
    /// baseline. Returns `None` when nothing changed.
    pub fn encode(&mut self, tick: u64, world: &World, room: &RoomState) -> Option<Patch> {
        let world_now = world.capture_snapshot();
        let ops = diff(&self.last_world, &self.last_room, &world_now, room);
        if ops.is_empty() {
            return None;
        }
        self.seq += 1;
        self.last_world = world_now;
        self.last_room = room.clone();
        tracing::trace!(seq = self.seq, tick, ops = ops.len(), "patch encoded");
        Some(Patch {
            seq: self.seq,
            tick,
            full: false,
            ops,
        })
    }

    /// A full patch rebuilding the last emitted state from empty.
    ///
    /// Sent to a newly joined client; subsequent deltas apply on top of it
    /// because it reflects the encoder's baseline, not the live world.
    pub fn baseline(&self, tick: u64) -> Patch {
        Patch {
            seq: self.seq,
            tick,
            full: true,
            ops: diff(
                &WorldSnapshot::default(),
                &RoomState::default(),
                &self.last_world,
                &self.last_room,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Ordered ops turning `(prev_world, prev_room)` into `(next_world, next_room)`.
pub fn diff(
    prev_world: &WorldSnapshot,
    prev_room: &RoomState,
    next_world: &WorldSnapshot,
    next_room: &RoomState,
) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_room(prev_room, next_room, &mut ops);

    for prev in &prev_world.entities {
        if next_world.entity(&prev.id).is_none() {
            ops.push(PatchOp::RemoveEntity {
                entity: prev.id.clone(),
            });
        }
    }

    for next in &next_world.entities {
        match prev_world.entity(&next.id) {
            Some(prev) => diff_entity(prev, next, &mut ops),
            None => {
                ops.push(PatchOp::AddEntity {
                    entity: next.id.clone(),
                });
                for component in &next.components {
                    ops.push(PatchOp::AddComponent {
                        entity: next.id.clone(),
                        type_id: component.type_id,
                        values: component.values.clone(),
                    });
                }
            }
        }
    }
    ops
}

fn diff_room(prev: &RoomState, next: &RoomState, ops: &mut Vec<PatchOp>) {
    if prev.meta != next.meta {
        ops.push(PatchOp::SetMeta(next.meta.clone()));
    }
    for session in prev.players.keys() {
        if !next.players.contains_key(session) {
            ops.push(PatchOp::RemovePlayer {
                session: session.clone(),
            });
        }
    }
    for (session, record) in &next.players {
        if prev.players.get(session) != Some(record) {
            ops.push(PatchOp::UpsertPlayer {
                session: session.clone(),
                record: record.clone(),
            });
        }
    }
}

fn diff_entity(prev: &EntitySnapshot, next: &EntitySnapshot, ops: &mut Vec<PatchOp>) {
    let id = &next.id;
    for old in &prev.components {
        if next.component(old.type_id).is_none() {
            ops.push(PatchOp::RemoveComponent {
                entity: id.clone(),
                type_id: old.type_id,
            });
        }
    }
    for new in &next.components {
        match prev.component(new.type_id) {
            None => ops.push(PatchOp::AddComponent {
                entity: id.clone(),
                type_id: new.type_id,
                values: new.values.clone(),
            }),
            Some(old) if old.values.len() != new.values.len() => {
                ops.push(PatchOp::RemoveComponent {
                    entity: id.clone(),
                    type_id: new.type_id,
                });
                ops.push(PatchOp::AddComponent {
                    entity: id.clone(),
                    type_id: new.type_id,
                    values: new.values.clone(),
                });
            }
            Some(old) => {
                for (index, (a, b)) in old.values.iter().zip(&new.values).enumerate() {
                    if a != b {
                        ops.push(PatchOp::SetField {
                            entity: id.clone(),
                            type_id: new.type_id,
                            index: index as u16,
                            value: b.clone(),
                        });
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
