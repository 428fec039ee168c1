//! # Archetype Store
//!
//! An archetype is the exact set of component kinds an entity carries, and
//! the storage bucket grouping all entities that share it. Each archetype
//! owns one [`Column`] per component, all kept at identical length; the row
//! index is the entity's position in every one of them.
//!
//! Archetypes are created lazily the first time a component set appears and
//! are never destroyed, so archetype IDs stay stable for the lifetime of a
//! world; the search cache relies on that.

use std::collections::HashMap;

use super::component::{ComponentId, ComponentSet};
use super::entity::EntityId;
use super::storage::Column;
use crate::error::{EngineError, EngineResult};

/// Dense numeric archetype identifier, assigned in creation order.
pub type ArchetypeId = u32;

/// Storage bucket for all entities sharing one component set.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    set: ComponentSet,
    /// One column per component, ascending by component ID.
    columns: Vec<(ComponentId, Column)>,
    /// Row index -> entity, the inverse of the entity location table.
    entities: Vec<EntityId>,
}

impl Archetype {
    fn new(id: ArchetypeId, set: ComponentSet) -> Self {
        let columns = set.iter().map(|cid| (cid, Column::new())).collect();
        Self {
            id,
            set,
            columns,
            entities: Vec::new(),
        }
    }

    /// The archetype's stable ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The component set this archetype stores.
    #[inline]
    #[must_use]
    pub const fn set(&self) -> &ComponentSet {
        &self.set
    }

    /// Number of entities (rows) in this archetype.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the archetype holds no entities.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The entity occupying `row`, if any.
    #[must_use]
    pub fn entity_at(&self, row: usize) -> Option<EntityId> {
        self.entities.get(row).copied()
    }

    /// Row-ordered entity list.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    fn column_idx(&self, cid: ComponentId) -> Option<usize> {
        self.columns.binary_search_by_key(&cid, |(id, _)| *id).ok()
    }

    /// The column for a component, if this archetype stores it.
    #[must_use]
    pub fn column(&self, cid: ComponentId) -> Option<&Column> {
        self.column_idx(cid).map(|i| &self.columns[i].1)
    }

    /// Reads the encoded value at `(row, component)`.
    #[must_use]
    pub fn get_cell(&self, row: usize, cid: ComponentId) -> Option<&[u8]> {
        self.column(cid).and_then(|c| c.get(row))
    }

    /// Overwrites the encoded value at `(row, component)`.
    pub fn set_cell(&mut self, row: usize, cid: ComponentId, value: Vec<u8>) -> EngineResult<()> {
        let idx = self.column_idx(cid).ok_or_else(|| {
            EngineError::Internal(format!("component {cid} not stored in archetype {}", self.id))
        })?;
        self.columns[idx].1.set(row, value)
    }

    /// Appends a full row for `entity`.
    ///
    /// `values` must cover exactly this archetype's component set; they are
    /// sorted by component ID before writing, so callers may pass them in
    /// any order.
    pub fn push_row(
        &mut self,
        entity: EntityId,
        mut values: Vec<(ComponentId, Vec<u8>)>,
    ) -> EngineResult<usize> {
        values.sort_unstable_by_key(|(cid, _)| *cid);
        if values.len() != self.columns.len() {
            return Err(EngineError::Internal(format!(
                "archetype {} expects {} components, got {}",
                self.id,
                self.columns.len(),
                values.len()
            )));
        }
        for ((cid, column), (value_cid, _)) in self.columns.iter().zip(values.iter()) {
            if cid != value_cid {
                return Err(EngineError::Internal(format!(
                    "archetype {} row misaligned: column {cid}, value {value_cid}",
                    self.id
                )));
            }
            debug_assert_eq!(column.len(), self.entities.len());
        }

        let row = self.entities.len();
        for ((_, column), (_, value)) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
        self.entities.push(entity);
        Ok(row)
    }

    /// Removes `row`, returning its values and the entity (previously the
    /// tail) that now occupies `row`, if any.
    pub fn take_row(
        &mut self,
        row: usize,
    ) -> EngineResult<(Vec<(ComponentId, Vec<u8>)>, Option<EntityId>)> {
        if row >= self.entities.len() {
            return Err(EngineError::Internal(format!(
                "archetype {} has no row {row}",
                self.id
            )));
        }
        let mut values = Vec::with_capacity(self.columns.len());
        for (cid, column) in &mut self.columns {
            values.push((*cid, column.swap_remove(row)?));
        }
        self.entities.swap_remove(row);
        Ok((values, self.entities.get(row).copied()))
    }

    /// Removes `row`, discarding its values. Same swap semantics as
    /// [`Archetype::take_row`].
    pub fn swap_remove_row(&mut self, row: usize) -> EngineResult<Option<EntityId>> {
        Ok(self.take_row(row)?.1)
    }

    /// Verifies that every column agrees with the row count.
    pub fn check_columns(&self) -> EngineResult<()> {
        for (cid, column) in &self.columns {
            if column.len() != self.entities.len() {
                return Err(EngineError::Internal(format!(
                    "archetype {}: column {cid} has {} rows, expected {}",
                    self.id,
                    column.len(),
                    self.entities.len()
                )));
            }
        }
        Ok(())
    }

    /// Restores a persisted column. Used only by state restore.
    pub(crate) fn restore_column(&mut self, cid: ComponentId, column: Column) -> EngineResult<()> {
        let idx = self.column_idx(cid).ok_or_else(|| {
            EngineError::SchemaIncompatible(format!(
                "persisted column {cid} does not belong to archetype {}",
                self.id
            ))
        })?;
        self.columns[idx].1 = column;
        Ok(())
    }

    /// Restores the persisted row-order entity list. Used only by restore.
    pub(crate) fn restore_entities(&mut self, entities: Vec<EntityId>) {
        self.entities = entities;
    }
}

/// Maps component sets to archetypes and owns their storage.
#[derive(Debug, Default)]
pub struct ArchetypeStore {
    archetypes: Vec<Archetype>,
    by_set: HashMap<ComponentSet, ArchetypeId>,
}

impl ArchetypeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the archetype for a component set, creating it on first use.
    pub fn archetype_for(&mut self, set: ComponentSet) -> ArchetypeId {
        if let Some(&id) = self.by_set.get(&set) {
            return id;
        }
        let id = self.archetypes.len() as ArchetypeId;
        tracing::debug!(archetype = id, components = set.len(), "new archetype");
        self.archetypes.push(Archetype::new(id, set));
        self.by_set.insert(set, id);
        id
    }

    /// Looks up an archetype by ID.
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    /// Looks up an archetype mutably.
    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id as usize)
    }

    /// Number of archetypes ever created.
    #[must_use]
    pub fn count(&self) -> usize {
        self.archetypes.len()
    }

    /// Iterates archetypes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Iterates `(entity, row)` pairs across the given archetypes, starting
    /// at `starting_row` within each, in creation order then ascending row.
    pub fn iterate<'a>(
        &'a self,
        ids: &'a [ArchetypeId],
        starting_row: usize,
    ) -> impl Iterator<Item = (EntityId, usize)> + 'a {
        ids.iter()
            .filter_map(|id| self.get(*id))
            .flat_map(move |arch| {
                arch.entities()
                    .iter()
                    .enumerate()
                    .skip(starting_row)
                    .map(|(row, id)| (*id, row))
            })
    }
}
