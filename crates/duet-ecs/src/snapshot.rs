//! World snapshots and state hashing.
//!
//! A [`WorldSnapshot`] is a plain, serializable copy of every entity and its
//! component field values. The replication encoder diffs consecutive
//! snapshots to produce patches; determinism tests compare
//! [`World::state_hash`] digests across runs.

use serde::{Deserialize, Serialize};

use crate::component::{AnyComponent, ComponentTypeId, FieldValue};
use crate::entity::EntityId;
use crate::world::World;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Field values of one component, in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub type_id: ComponentTypeId,
    pub values: Vec<FieldValue>,
}

/// One entity and its components, ascending by type id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub components: Vec<ComponentSnapshot>,
}

impl EntitySnapshot {
    /// The component of `type_id`, if present.
    pub fn component(&self, type_id: ComponentTypeId) -> Option<&ComponentSnapshot> {
        self.components
            .binary_search_by_key(&type_id, |c| c.type_id)
            .ok()
            .map(|i| &self.components[i])
    }
}

/// Every live entity, ascending by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    /// The entity called `id`, if present.
    pub fn entity(&self, id: &EntityId) -> Option<&EntitySnapshot> {
        self.entities
            .binary_search_by(|e| e.id.cmp(id))
            .ok()
            .map(|i| &self.entities[i])
    }

    /// Feed this snapshot into a BLAKE3 hasher in canonical order.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.entities.len() as u64).to_le_bytes());
        for entity in &self.entities {
            hasher.update(&(entity.id.as_str().len() as u32).to_le_bytes());
            hasher.update(entity.id.as_str().as_bytes());
            hasher.update(&(entity.components.len() as u32).to_le_bytes());
            for component in &entity.components {
                hasher.update(&[component.type_id.raw()]);
                for value in &component.values {
                    value.hash_into(hasher);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// World snapshot impl
// ---------------------------------------------------------------------------

impl World {
    /// Capture every entity and component field value.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        let entities = self
            .entities()
            .map(|id| EntitySnapshot {
                id: id.clone(),
                components: self
                    .components(id)
                    .map(|iter| {
                        iter.map(|c| ComponentSnapshot {
                            type_id: c.component_schema().type_id,
                            values: c.all_values(),
                        })
                        .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        WorldSnapshot { entities }
    }

    /// BLAKE3 hex digest (64 lowercase hex chars) of the world state.
    pub fn state_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        self.capture_snapshot().hash_into(&mut hasher);
        hasher.finalize().to_hex().to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
