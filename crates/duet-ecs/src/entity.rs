//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is an opaque string. Identity is the id alone: two ids are
//! the same entity iff their strings are equal. The server allocates ids from a
//! seeded PCG stream so that a simulation run is reproducible from its seed;
//! clients never allocate and instead adopt the ids carried by patches.

use std::collections::HashSet;
use std::fmt;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

/// Number of characters in an allocated id.
pub const ID_LEN: usize = 9;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A globally unique, opaque entity identifier.
///
/// Systems hold ids across ticks, never component references: every access
/// re-resolves the id against the current store state.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Issues fresh [`EntityId`]s.
///
/// Ids are drawn from a seeded [`Pcg32`] and checked against every id ever
/// issued or reserved, so an id is never reused within one allocator's life,
/// even after the entity it named is destroyed.
#[derive(Debug)]
pub struct EntityAllocator {
    rng: Pcg32,
    issued: HashSet<EntityId>,
}

impl EntityAllocator {
    /// Create an allocator whose id sequence is fully determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(seed),
            issued: HashSet::new(),
        }
    }

    /// Allocate a fresh id.
    pub fn allocate(&mut self) -> EntityId {
        loop {
            let raw: String = (0..ID_LEN)
                .map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            let id = EntityId(raw);
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Mark an externally supplied id as taken.
    ///
    /// Returns `false` if the id was already issued or reserved.
    pub fn reserve(&mut self, id: &EntityId) -> bool {
        self.issued.insert(id.clone())
    }

    /// Total number of ids handed out or reserved.
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
