//! The [`World`] is the entity/component store. It exclusively owns every
//! entity and component, and keeps the [`QueryIndex`] current on every
//! structural change (create, destroy, component add, component remove).

use std::collections::{BTreeMap, BTreeSet};

use crate::component::{AnyComponent, Component, ComponentTypeId};
use crate::entity::{EntityAllocator, EntityId};
use crate::query::{present_types, Query, QueryIndex, QueryKey};
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// Components of one entity, ordered by type id. Each component is boxed so
/// that its address survives map rebalancing and in-place field updates.
#[derive(Debug, Default)]
struct EntityRecord {
    components: BTreeMap<ComponentTypeId, Box<dyn AnyComponent>>,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Entity/component store with an incrementally maintained query index.
///
/// Entities iterate in ascending id order everywhere, which keeps every
/// consumer (systems, snapshots, patch encoding) deterministic.
#[derive(Debug)]
pub struct World {
    allocator: EntityAllocator,
    entities: BTreeMap<EntityId, EntityRecord>,
    queries: QueryIndex,
}

impl World {
    /// Create an empty world whose id allocator uses seed `0`.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create an empty world whose id sequence is determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            allocator: EntityAllocator::with_seed(seed),
            entities: BTreeMap::new(),
            queries: QueryIndex::new(),
        }
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create an empty entity with a freshly allocated id.
    pub fn create(&mut self) -> EntityId {
        let id = self.allocator.allocate();
        self.insert_record(id.clone());
        tracing::trace!(entity = %id, "entity created");
        id
    }

    /// Create an empty entity under a caller-supplied id.
    ///
    /// Used by the replication mirror, which adopts server ids verbatim.
    pub fn create_with_id(&mut self, id: EntityId) -> Result<EntityId, EcsError> {
        if self.entities.contains_key(&id) {
            return Err(EcsError::DuplicateEntity { entity: id });
        }
        self.allocator.reserve(&id);
        self.insert_record(id.clone());
        tracing::trace!(entity = %id, "entity created with supplied id");
        Ok(id)
    }

    fn insert_record(&mut self, id: EntityId) {
        self.entities.insert(id.clone(), EntityRecord::default());
        self.queries.reevaluate(&id, &[]);
    }

    /// Destroy an entity and all of its components.
    pub fn destroy(&mut self, id: &EntityId) -> Result<(), EcsError> {
        if self.entities.remove(id).is_none() {
            return Err(EcsError::UnknownEntity { entity: id.clone() });
        }
        self.queries.forget(id);
        tracing::trace!(entity = %id, "entity destroyed");
        Ok(())
    }

    /// Whether `id` names a live entity.
    pub fn has(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Live entity ids, ascending.
    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    // -- components ---------------------------------------------------------

    /// Attach `component`, replacing any existing component of the same type.
    ///
    /// Returns a reference to the stored instance.
    pub fn add<C: Component>(&mut self, id: &EntityId, component: C) -> Result<&mut C, EcsError> {
        let type_id = C::schema().type_id;
        self.add_boxed(id, Box::new(component))?;
        self.entities
            .get_mut(id)
            .and_then(|r| r.components.get_mut(&type_id))
            .and_then(|c| c.as_any_mut().downcast_mut::<C>())
            .ok_or_else(|| EcsError::MissingComponent {
                entity: id.clone(),
                component: C::schema().name.to_owned(),
            })
    }

    /// Attach a type-erased component, replacing any of the same type.
    pub fn add_boxed(&mut self, id: &EntityId, component: Box<dyn AnyComponent>) -> Result<(), EcsError> {
        let type_id = component.component_schema().type_id;
        let record = self
            .entities
            .get_mut(id)
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })?;
        let replaced = record.components.insert(type_id, component).is_some();
        if !replaced {
            let present = present_types(&record.components);
            self.queries.reevaluate(id, &present);
        }
        Ok(())
    }

    /// Detach the component of `type_id`.
    ///
    /// Returns `Ok(false)` when the entity has no such component.
    pub fn remove(&mut self, id: &EntityId, type_id: ComponentTypeId) -> Result<bool, EcsError> {
        let record = self
            .entities
            .get_mut(id)
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })?;
        if record.components.remove(&type_id).is_none() {
            return Ok(false);
        }
        let present = present_types(&record.components);
        self.queries.reevaluate(id, &present);
        Ok(true)
    }

    /// Typed form of [`remove`](Self::remove).
    pub fn remove_component<C: Component>(&mut self, id: &EntityId) -> Result<bool, EcsError> {
        self.remove(id, C::schema().type_id)
    }

    /// Whether the entity exists and carries a component of `type_id`.
    pub fn has_component(&self, id: &EntityId, type_id: ComponentTypeId) -> bool {
        self.entities
            .get(id)
            .is_some_and(|r| r.components.contains_key(&type_id))
    }

    /// Typed form of [`has_component`](Self::has_component).
    pub fn has_type<C: Component>(&self, id: &EntityId) -> bool {
        self.has_component(id, C::schema().type_id)
    }

    /// Borrow component `C` of an entity.
    ///
    /// Absence is an error: callers are expected to have checked membership
    /// through a query first. Use [`try_get`](Self::try_get) where absence is
    /// an expected race (delayed actions, collision callbacks).
    pub fn get<C: Component>(&self, id: &EntityId) -> Result<&C, EcsError> {
        let record = self
            .entities
            .get(id)
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })?;
        record
            .components
            .get(&C::schema().type_id)
            .and_then(|c| c.as_any().downcast_ref::<C>())
            .ok_or_else(|| EcsError::MissingComponent {
                entity: id.clone(),
                component: C::schema().name.to_owned(),
            })
    }

    /// Mutably borrow component `C` of an entity.
    pub fn get_mut<C: Component>(&mut self, id: &EntityId) -> Result<&mut C, EcsError> {
        let record = self
            .entities
            .get_mut(id)
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })?;
        record
            .components
            .get_mut(&C::schema().type_id)
            .and_then(|c| c.as_any_mut().downcast_mut::<C>())
            .ok_or_else(|| EcsError::MissingComponent {
                entity: id.clone(),
                component: C::schema().name.to_owned(),
            })
    }

    /// Borrow component `C` if both the entity and component exist.
    pub fn try_get<C: Component>(&self, id: &EntityId) -> Option<&C> {
        self.get::<C>(id).ok()
    }

    /// Mutably borrow component `C` if both the entity and component exist.
    pub fn try_get_mut<C: Component>(&mut self, id: &EntityId) -> Option<&mut C> {
        self.get_mut::<C>(id).ok()
    }

    /// Borrow a component by type id, type-erased.
    pub fn get_dyn(&self, id: &EntityId, type_id: ComponentTypeId) -> Result<&dyn AnyComponent, EcsError> {
        let record = self
            .entities
            .get(id)
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })?;
        record
            .components
            .get(&type_id)
            .map(|c| c.as_ref())
            .ok_or_else(|| EcsError::MissingComponent {
                entity: id.clone(),
                component: format!("{type_id:?}"),
            })
    }

    /// Mutably borrow a component by type id, type-erased.
    pub fn get_dyn_mut(
        &mut self,
        id: &EntityId,
        type_id: ComponentTypeId,
    ) -> Result<&mut dyn AnyComponent, EcsError> {
        let record = self
            .entities
            .get_mut(id)
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })?;
        match record.components.get_mut(&type_id) {
            Some(c) => Ok(c.as_mut()),
            None => Err(EcsError::MissingComponent {
                entity: id.clone(),
                component: format!("{type_id:?}"),
            }),
        }
    }

    /// Component types carried by an entity, ascending.
    pub fn component_types(&self, id: &EntityId) -> Result<Vec<ComponentTypeId>, EcsError> {
        self.entities
            .get(id)
            .map(|r| present_types(&r.components))
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })
    }

    /// All components of an entity, ascending by type id.
    pub fn components(
        &self,
        id: &EntityId,
    ) -> Result<impl Iterator<Item = &dyn AnyComponent>, EcsError> {
        let record = self
            .entities
            .get(id)
            .ok_or_else(|| EcsError::UnknownEntity { entity: id.clone() })?;
        Ok(record.components.values().map(|c| c.as_ref()))
    }

    // -- queries ------------------------------------------------------------

    /// Register interest in `query`; see [`QueryIndex::register`].
    pub fn register_query(&mut self, query: &Query) -> QueryKey {
        let scan = self
            .entities
            .iter()
            .map(|(id, r)| (id, present_types(&r.components)));
        self.queries.register(query, scan)
    }

    /// Release interest in a query registered through
    /// [`register_query`](Self::register_query).
    pub fn release_query(&mut self, key: &QueryKey) -> bool {
        self.queries.release(key)
    }

    /// Current members of a registered query.
    pub fn query_members(&self, key: &QueryKey) -> Option<&BTreeSet<EntityId>> {
        self.queries.members(key)
    }

    /// Owned copy of a registered query's members, ascending. Empty for an
    /// unknown key.
    pub fn matching(&self, key: &QueryKey) -> Vec<EntityId> {
        self.queries
            .members(key)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ad hoc scan for entities matching `query`, without registering it.
    pub fn scan(&self, query: &Query) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, r)| query.matches(&present_types(&r.components)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Read access to the query index.
    pub fn query_index(&self) -> &QueryIndex {
        &self.queries
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
