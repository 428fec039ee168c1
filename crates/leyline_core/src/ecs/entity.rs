//! # Entity Management
//!
//! Entities are dense, monotonically assigned identifiers. IDs are never
//! reused within a world's lifetime, so a stale ID can never silently alias
//! a newer entity. The index tracks exactly one location per live entity.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::archetype::ArchetypeId;

/// Unique identifier for an entity.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Sentinel denoting "no entity".
    pub const BAD: Self = Self(u64::MAX);

    /// Checks if this is the "no entity" sentinel.
    #[inline]
    #[must_use]
    pub const fn is_bad(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bad() {
            write!(f, "<bad>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Where an entity's row lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype holding the entity.
    pub archetype: ArchetypeId,
    /// Row inside that archetype's columns.
    pub row: usize,
}

/// Allocates entity IDs and tracks `entity -> (archetype, row)`.
#[derive(Debug, Default)]
pub struct EntityIndex {
    next_id: u64,
    locations: HashMap<EntityId, EntityLocation>,
}

impl EntityIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next entity ID. IDs are never reused.
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Returns the location of a live entity.
    #[must_use]
    pub fn location(&self, id: EntityId) -> Option<EntityLocation> {
        self.locations.get(&id).copied()
    }

    /// Records or updates an entity's location.
    pub fn set_location(&mut self, id: EntityId, loc: EntityLocation) {
        self.locations.insert(id, loc);
    }

    /// Drops an entity from the index, returning its last location.
    pub fn remove(&mut self, id: EntityId) -> Option<EntityLocation> {
        self.locations.remove(&id)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// True if no entities are alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// The next ID that would be allocated.
    #[must_use]
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Restores the allocator watermark from a persisted snapshot.
    pub fn restore_next_id(&mut self, next_id: u64) {
        self.next_id = next_id;
    }

    /// Iterates over all live entities and their locations.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityLocation)> + '_ {
        self.locations.iter().map(|(id, loc)| (*id, *loc))
    }
}
