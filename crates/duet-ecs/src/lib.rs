//! Duet ECS -- string-keyed entity/component store with schema-described
//! components and an incrementally maintained query index.
//!
//! This crate provides the data layer of the Duet engine. Entities are opaque
//! string ids; components are plain records described by a static [`Schema`]
//! so that the replication layer can read, write, and rebuild them without
//! reflection. Systems select entities through [`Query`]s whose result sets
//! are shared and kept current on every structural change.
//!
//! # Quick Start
//!
//! ```
//! use duet_ecs::prelude::*;
//!
//! duet_ecs::component! {
//!     pub struct Position: 1, "position" {
//!         pub x: f32 = 0.0,
//!         pub y: f32 = 0.0,
//!     }
//! }
//!
//! let mut world = World::new();
//! let key = world.register_query(&Query::all().with::<Position>());
//!
//! let entity = world.create();
//! world.add(&entity, Position { x: 1.0, y: 2.0 }).unwrap();
//!
//! assert_eq!(world.matching(&key), vec![entity.clone()]);
//! assert_eq!(world.get::<Position>(&entity).unwrap().y, 2.0);
//! ```
//!
//! [`Schema`]: component::Schema
//! [`Query`]: query::Query

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod query;
pub mod snapshot;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by store operations.
///
/// All of these indicate that calling code broke an invariant (an unknown
/// id, a schema mismatch); none of them are expected during normal play.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist.
    #[error("entity {entity} does not exist")]
    UnknownEntity { entity: entity::EntityId },

    /// An entity with this id already exists.
    #[error("entity {entity} already exists")]
    DuplicateEntity { entity: entity::EntityId },

    /// The entity exists but lacks the requested component.
    #[error("entity {entity} has no '{component}' component")]
    MissingComponent {
        entity: entity::EntityId,
        component: String,
    },

    /// No component type is registered under this id.
    #[error("component type {type_id:?} is not registered")]
    UnknownComponentType { type_id: component::ComponentTypeId },

    /// A component type id lies outside the range allowed for its origin.
    #[error("component '{name}' uses id {type_id:?}, outside the {origin:?} range")]
    ReservedTypeId {
        type_id: component::ComponentTypeId,
        name: &'static str,
        origin: component::TypeOrigin,
    },

    /// Two different component types claim the same id.
    #[error("component id {type_id:?} is already taken by '{existing}', cannot register '{name}'")]
    DuplicateTypeId {
        type_id: component::ComponentTypeId,
        existing: &'static str,
        name: &'static str,
    },

    /// A field index past the end of the schema.
    #[error("component '{component}' has no field at index {index}")]
    UnknownField {
        component: &'static str,
        index: usize,
    },

    /// A field value of the wrong wire kind.
    #[error("field '{component}.{field}' expects {expected:?}, got {actual:?}")]
    FieldKind {
        component: &'static str,
        field: &'static str,
        expected: component::FieldKind,
        actual: component::FieldKind,
    },

    /// A full value list of the wrong length.
    #[error("component '{component}' expects {expected} field values, got {actual}")]
    FieldCount {
        component: &'static str,
        expected: usize,
        actual: usize,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{
        AnyComponent, Component, ComponentCatalog, ComponentTypeId, FieldDef, FieldKind,
        FieldValue, Schema, TypeOrigin,
    };
    pub use crate::entity::EntityId;
    pub use crate::query::{Query, QueryKey};
    pub use crate::snapshot::{ComponentSnapshot, EntitySnapshot, WorldSnapshot};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
