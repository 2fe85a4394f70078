//! Component schema and type-erased component storage.
//!
//! Every component type carries an explicit [`Schema`]: a static table mapping
//! each field (in declaration order) to its wire [`FieldKind`]. Both the store
//! and the replication layer consult the schema, so no reflection is needed to
//! read, write, or reconstruct a component from wire data.
//!
//! Components are plain records. Mutation helpers live as free functions next
//! to the component definition and take the record as an explicit argument.
//! The [`component!`](crate::component!) macro generates the struct, its
//! `Default`, and the schema accessors from one declaration.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EcsError;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Small integer id unique across the whole component type universe.
///
/// `0..=190` belongs to game components, `191..=255` to engine components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentTypeId(pub u8);

impl ComponentTypeId {
    /// First id of the engine-reserved range.
    pub const ENGINE_RESERVED_START: u8 = 191;

    /// Const constructor, usable inside schema statics.
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[inline]
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Whether the id lies in the engine-reserved range.
    #[inline]
    pub fn is_engine_reserved(self) -> bool {
        self.0 >= Self::ENGINE_RESERVED_START
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Field model
// ---------------------------------------------------------------------------

/// Wire type of a single component field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    U8,
    U32,
    I32,
    F32,
    Str,
}

/// A single field value as it crosses the store/replication boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    U8(u8),
    U32(u32),
    I32(i32),
    F32(f32),
    Str(String),
}

impl FieldValue {
    /// The wire kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::I32(_) => FieldKind::I32,
            FieldValue::F32(_) => FieldKind::F32,
            FieldValue::Str(_) => FieldKind::Str,
        }
    }

    /// Feed a canonical byte encoding of this value into `hasher`.
    ///
    /// Floats are hashed by bit pattern, so `-0.0` and `0.0` differ.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            FieldValue::Bool(v) => {
                hasher.update(&[0, *v as u8]);
            }
            FieldValue::U8(v) => {
                hasher.update(&[1, *v]);
            }
            FieldValue::U32(v) => {
                hasher.update(&[2]);
                hasher.update(&v.to_le_bytes());
            }
            FieldValue::I32(v) => {
                hasher.update(&[3]);
                hasher.update(&v.to_le_bytes());
            }
            FieldValue::F32(v) => {
                hasher.update(&[4]);
                hasher.update(&v.to_bits().to_le_bytes());
            }
            FieldValue::Str(v) => {
                hasher.update(&[5]);
                hasher.update(&(v.len() as u32).to_le_bytes());
                hasher.update(v.as_bytes());
            }
        }
    }
}

/// Rust types that may appear as component fields.
pub trait FieldType: Sized {
    /// Wire kind for this Rust type.
    const KIND: FieldKind;
    /// Convert to a wire value.
    fn to_value(&self) -> FieldValue;
    /// Convert from a wire value, `None` on kind mismatch.
    fn from_value(value: &FieldValue) -> Option<Self>;
}

macro_rules! impl_field_type {
    ($ty:ty, $kind:ident) => {
        impl FieldType for $ty {
            const KIND: FieldKind = FieldKind::$kind;

            fn to_value(&self) -> FieldValue {
                FieldValue::$kind(self.clone())
            }

            fn from_value(value: &FieldValue) -> Option<Self> {
                match value {
                    FieldValue::$kind(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_field_type!(bool, Bool);
impl_field_type!(u8, U8);
impl_field_type!(u32, U32);
impl_field_type!(i32, I32);
impl_field_type!(f32, F32);
impl_field_type!(String, Str);

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Name and wire kind of one schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Static descriptor of a component type.
#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    /// Stable human-readable tag, e.g. `"transform"`.
    pub name: &'static str,
    /// Numeric type id used as the storage and wire key.
    pub type_id: ComponentTypeId,
    /// Fields in declaration order. Field indices on the wire refer to this order.
    pub fields: &'static [FieldDef],
}

impl Schema {
    /// Index of the field called `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check that `values` line up with this schema, kind for kind.
    pub fn check_values(&self, values: &[FieldValue]) -> Result<(), EcsError> {
        if values.len() != self.fields.len() {
            return Err(EcsError::FieldCount {
                component: self.name,
                expected: self.fields.len(),
                actual: values.len(),
            });
        }
        for (def, value) in self.fields.iter().zip(values) {
            if def.kind != value.kind() {
                return Err(EcsError::FieldKind {
                    component: self.name,
                    field: def.name,
                    expected: def.kind,
                    actual: value.kind(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// A typed, plain-data record attached to at most one entity per type.
///
/// Implement through the [`component!`](crate::component!) macro rather than
/// by hand.
pub trait Component: Clone + Default + fmt::Debug + PartialEq + 'static {
    /// Static schema for this type.
    fn schema() -> &'static Schema;

    /// Read field `index` as a wire value.
    fn field(&self, index: usize) -> Option<FieldValue>;

    /// Overwrite field `index` in place.
    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<(), EcsError>;

    /// The schema defaults, taken from `Default`.
    fn defaults() -> Vec<FieldValue> {
        Self::default().values()
    }

    /// All field values in schema order.
    fn values(&self) -> Vec<FieldValue> {
        (0..Self::schema().fields.len())
            .filter_map(|i| self.field(i))
            .collect()
    }

    /// Build an instance from a full set of field values.
    fn from_values(values: &[FieldValue]) -> Result<Self, EcsError> {
        Self::schema().check_values(values)?;
        let mut component = Self::default();
        for (index, value) in values.iter().enumerate() {
            component.set_field(index, value)?;
        }
        Ok(component)
    }
}

/// Object-safe view of any [`Component`], used for type-erased storage.
pub trait AnyComponent: fmt::Debug {
    fn component_schema(&self) -> &'static Schema;
    fn field_value(&self, index: usize) -> Option<FieldValue>;
    fn set_field_value(&mut self, index: usize, value: &FieldValue) -> Result<(), EcsError>;
    fn all_values(&self) -> Vec<FieldValue>;
    fn clone_boxed(&self) -> Box<dyn AnyComponent>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> AnyComponent for T {
    fn component_schema(&self) -> &'static Schema {
        <T as Component>::schema()
    }

    fn field_value(&self, index: usize) -> Option<FieldValue> {
        self.field(index)
    }

    fn set_field_value(&mut self, index: usize, value: &FieldValue) -> Result<(), EcsError> {
        self.set_field(index, value)
    }

    fn all_values(&self) -> Vec<FieldValue> {
        self.values()
    }

    fn clone_boxed(&self) -> Box<dyn AnyComponent> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// component! macro
// ---------------------------------------------------------------------------

/// Declare a component type: struct, `Default`, and schema in one place.
///
/// ```
/// duet_ecs::component! {
///     /// Hit points.
///     pub struct Health: 3, "health" {
///         pub current: i32 = 100,
///         pub max: i32 = 100,
///     }
/// }
///
/// use duet_ecs::component::Component;
/// assert_eq!(Health::schema().fields.len(), 2);
/// assert_eq!(Health::default().current, 100);
/// ```
#[macro_export]
macro_rules! component {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $id:literal, $tag:literal {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty = $default:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                Self {
                    $( $field: $default, )*
                }
            }
        }

        impl $crate::component::Component for $name {
            fn schema() -> &'static $crate::component::Schema {
                static SCHEMA: $crate::component::Schema = $crate::component::Schema {
                    name: $tag,
                    type_id: $crate::component::ComponentTypeId::new($id),
                    fields: &[
                        $(
                            $crate::component::FieldDef {
                                name: stringify!($field),
                                kind: <$ty as $crate::component::FieldType>::KIND,
                            },
                        )*
                    ],
                };
                &SCHEMA
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn field(&self, index: usize) -> Option<$crate::component::FieldValue> {
                let mut i = 0usize;
                $(
                    if i == index {
                        return Some($crate::component::FieldType::to_value(&self.$field));
                    }
                    i += 1;
                )*
                None
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn set_field(
                &mut self,
                index: usize,
                value: &$crate::component::FieldValue,
            ) -> Result<(), $crate::EcsError> {
                let mut i = 0usize;
                $(
                    if i == index {
                        self.$field = <$ty as $crate::component::FieldType>::from_value(value)
                            .ok_or($crate::EcsError::FieldKind {
                                component: $tag,
                                field: stringify!($field),
                                expected: <$ty as $crate::component::FieldType>::KIND,
                                actual: value.kind(),
                            })?;
                        return Ok(());
                    }
                    i += 1;
                )*
                Err($crate::EcsError::UnknownField {
                    component: $tag,
                    index,
                })
            }
        }
    };
}

// ---------------------------------------------------------------------------
// ComponentCatalog
// ---------------------------------------------------------------------------

/// Which half of the type id universe a registration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOrigin {
    /// Ids `0..=190`.
    Game,
    /// Ids `191..=255`.
    Engine,
}

type Constructor = fn(&[FieldValue]) -> Result<Box<dyn AnyComponent>, EcsError>;

fn construct<C: Component>(values: &[FieldValue]) -> Result<Box<dyn AnyComponent>, EcsError> {
    Ok(Box::new(C::from_values(values)?))
}

#[derive(Clone, Copy)]
struct CatalogEntry {
    schema: &'static Schema,
    construct: Constructor,
}

/// Maps component type ids to their schema and a constructor.
///
/// The replication mirror uses the catalog to instantiate components it only
/// knows by id and field values.
#[derive(Clone, Default)]
pub struct ComponentCatalog {
    entries: BTreeMap<ComponentTypeId, CatalogEntry>,
}

impl ComponentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `C` under its schema id, enforcing the id range for `origin`.
    ///
    /// Registering the same type twice is a no-op; registering a different
    /// type under a taken id is an error.
    pub fn register<C: Component>(&mut self, origin: TypeOrigin) -> Result<ComponentTypeId, EcsError> {
        let schema = C::schema();
        let in_range = match origin {
            TypeOrigin::Game => !schema.type_id.is_engine_reserved(),
            TypeOrigin::Engine => schema.type_id.is_engine_reserved(),
        };
        if !in_range {
            return Err(EcsError::ReservedTypeId {
                type_id: schema.type_id,
                name: schema.name,
                origin,
            });
        }
        if let Some(existing) = self.entries.get(&schema.type_id) {
            if existing.schema.name != schema.name {
                return Err(EcsError::DuplicateTypeId {
                    type_id: schema.type_id,
                    existing: existing.schema.name,
                    name: schema.name,
                });
            }
            return Ok(schema.type_id);
        }
        self.entries.insert(
            schema.type_id,
            CatalogEntry {
                schema,
                construct: construct::<C>,
            },
        );
        Ok(schema.type_id)
    }

    /// Schema registered under `type_id`.
    pub fn schema(&self, type_id: ComponentTypeId) -> Option<&'static Schema> {
        self.entries.get(&type_id).map(|e| e.schema)
    }

    /// Instantiate the component registered under `type_id` from wire values.
    pub fn construct(
        &self,
        type_id: ComponentTypeId,
        values: &[FieldValue],
    ) -> Result<Box<dyn AnyComponent>, EcsError> {
        let entry = self
            .entries
            .get(&type_id)
            .ok_or(EcsError::UnknownComponentType { type_id })?;
        (entry.construct)(values)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ComponentCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.values().map(|e| e.schema.name))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
