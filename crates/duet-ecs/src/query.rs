//! Query index: required component sets mapped to live matching entity sets.
//!
//! A [`Query`] is an immutable set of required component type ids. Queries
//! with identical requirements share one canonical [`QueryKey`] and one
//! materialized result set, so the cost of keeping membership current on each
//! structural change is proportional to the number of *distinct* queries, not
//! to the number of systems that declared them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::component::{Component, ComponentTypeId};
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// An immutable set of required component types.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Query {
    required: BTreeSet<ComponentTypeId>,
}

impl Query {
    /// Build a query from type ids. Order and duplicates are irrelevant.
    pub fn new(required: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        Self {
            required: required.into_iter().collect(),
        }
    }

    /// A query that matches every entity.
    pub fn all() -> Self {
        Self::default()
    }

    /// Builder helper: additionally require component `C`.
    pub fn with<C: Component>(mut self) -> Self {
        self.required.insert(C::schema().type_id);
        self
    }

    /// The required component types, ascending.
    pub fn required(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.required.iter().copied()
    }

    /// Canonical, order-independent key.
    pub fn key(&self) -> QueryKey {
        let parts: Vec<String> = self.required.iter().map(|t| t.raw().to_string()).collect();
        QueryKey(parts.join(","))
    }

    /// Whether an entity carrying exactly `present` (sorted ascending) matches.
    pub fn matches(&self, present: &[ComponentTypeId]) -> bool {
        self.required
            .iter()
            .all(|t| present.binary_search(t).is_ok())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query[{}]", self.key().0)
    }
}

/// Canonical string form of a [`Query`], e.g. `"191,195"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    /// The key as a comma-separated list of type ids.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// QueryIndex
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct QueryEntry {
    query: Query,
    members: BTreeSet<EntityId>,
    refs: usize,
}

/// Incrementally maintained result sets, one per distinct query.
#[derive(Debug, Default)]
pub struct QueryIndex {
    entries: HashMap<QueryKey, QueryEntry>,
}

impl QueryIndex {
    /// An index with no registered queries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `query`.
    ///
    /// The first registration of a key materializes its result set by scanning
    /// `entities`; later registrations of the same key only bump a reference
    /// count.
    pub fn register<'a, I>(&mut self, query: &Query, entities: I) -> QueryKey
    where
        I: IntoIterator<Item = (&'a EntityId, Vec<ComponentTypeId>)>,
    {
        let key = query.key();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refs += 1;
            return key;
        }
        let members = entities
            .into_iter()
            .filter(|(_, present)| query.matches(present))
            .map(|(id, _)| id.clone())
            .collect();
        tracing::trace!(query = %key, "materialized query result set");
        self.entries.insert(
            key.clone(),
            QueryEntry {
                query: query.clone(),
                members,
                refs: 1,
            },
        );
        key
    }

    /// Drop one reference to `key`. The result set is discarded with its last
    /// reference. Returns `false` if the key was not registered.
    pub fn release(&mut self, key: &QueryKey) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            self.entries.remove(key);
        }
        true
    }

    /// Re-evaluate `entity` against every registered query.
    ///
    /// `present` must be the entity's current component types, ascending.
    pub fn reevaluate(&mut self, entity: &EntityId, present: &[ComponentTypeId]) {
        for entry in self.entries.values_mut() {
            if entry.query.matches(present) {
                if !entry.members.contains(entity) {
                    entry.members.insert(entity.clone());
                }
            } else {
                entry.members.remove(entity);
            }
        }
    }

    /// Remove `entity` from every result set.
    pub fn forget(&mut self, entity: &EntityId) {
        for entry in self.entries.values_mut() {
            entry.members.remove(entity);
        }
    }

    /// Current members of `key`, ascending by id.
    pub fn members(&self, key: &QueryKey) -> Option<&BTreeSet<EntityId>> {
        self.entries.get(key).map(|e| &e.members)
    }

    /// Number of systems (or other holders) sharing `key`.
    pub fn ref_count(&self, key: &QueryKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.refs)
    }

    /// Number of distinct registered queries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered query with its member set, for invariant checks.
    pub fn iter(&self) -> impl Iterator<Item = (&Query, &BTreeSet<EntityId>)> {
        self.entries.values().map(|e| (&e.query, &e.members))
    }
}

/// Build the `(id, present types)` pairs [`QueryIndex::register`] scans.
pub(crate) fn present_types<V>(
    components: &BTreeMap<ComponentTypeId, V>,
) -> Vec<ComponentTypeId> {
    components.keys().copied().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
