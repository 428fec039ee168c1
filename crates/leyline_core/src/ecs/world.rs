//! # ECS State Container
//!
//! [`WorldState`] owns the archetype store and the entity index and keeps
//! them consistent through every structural operation: creation, archetype
//! migration, and swap-remove destruction. It is single-writer by
//! construction: only the scheduler worker touches it.

use super::archetype::{ArchetypeId, ArchetypeStore};
use super::component::{ComponentId, ComponentRegistry, ComponentSet};
use super::entity::{EntityId, EntityIndex, EntityLocation};
use super::storage::Column;
use crate::error::{EngineError, EngineResult};
use crate::persist::ArchetypeRecord;

/// The mutable ECS state of a world.
#[derive(Debug, Default)]
pub struct WorldState {
    archetypes: ArchetypeStore,
    entities: EntityIndex,
}

impl WorldState {
    /// Creates empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The archetype store.
    #[must_use]
    pub fn archetypes(&self) -> &ArchetypeStore {
        &self.archetypes
    }

    /// The entity index.
    #[must_use]
    pub fn entities(&self) -> &EntityIndex {
        &self.entities
    }

    /// Location of a live entity.
    #[must_use]
    pub fn location(&self, id: EntityId) -> Option<EntityLocation> {
        self.entities.location(id)
    }

    /// Creates an entity from encoded component values.
    ///
    /// The values' component IDs define the archetype; the archetype is
    /// created on first use.
    pub fn create_entity(
        &mut self,
        values: Vec<(ComponentId, Vec<u8>)>,
    ) -> EngineResult<EntityId> {
        let set = ComponentSet::from_ids(values.iter().map(|(cid, _)| *cid));
        if set.len() != values.len() {
            return Err(EngineError::Internal(
                "duplicate component in creation bundle".to_string(),
            ));
        }
        let archetype = self.archetypes.archetype_for(set);
        let id = self.entities.allocate();
        let row = self
            .archetype_mut(archetype)?
            .push_row(id, values)?;
        self.entities.set_location(id, EntityLocation { archetype, row });
        Ok(id)
    }

    /// Destroys an entity, fixing up the location of the row swapped into
    /// its slot.
    pub fn destroy_entity(&mut self, id: EntityId) -> EngineResult<()> {
        let loc = self
            .entities
            .remove(id)
            .ok_or(EngineError::UnknownEntity(id))?;
        let moved = self.archetype_mut(loc.archetype)?.swap_remove_row(loc.row)?;
        if let Some(moved) = moved {
            self.entities.set_location(moved, loc);
        }
        Ok(())
    }

    /// Moves an entity to the archetype for `new_set`.
    ///
    /// Values of intersecting components are preserved; components only in
    /// the new set are initialized from their registered defaults; the rest
    /// are dropped.
    pub fn move_entity(
        &mut self,
        id: EntityId,
        new_set: ComponentSet,
        registry: &ComponentRegistry,
    ) -> EngineResult<()> {
        let loc = self
            .entities
            .location(id)
            .ok_or(EngineError::UnknownEntity(id))?;
        let old_set = *self.archetype(loc.archetype)?.set();
        if old_set == new_set {
            return Ok(());
        }

        let destination = self.archetypes.archetype_for(new_set);
        let (mut values, moved) = self.archetype_mut(loc.archetype)?.take_row(loc.row)?;
        if let Some(moved) = moved {
            self.entities.set_location(moved, loc);
        }

        values.retain(|(cid, _)| new_set.contains(*cid));
        for cid in new_set.iter() {
            if !old_set.contains(cid) {
                let info = registry.lookup_by_id(cid).ok_or_else(|| {
                    EngineError::UnknownComponent(format!("id {cid}"))
                })?;
                values.push((cid, info.default_bytes().to_vec()));
            }
        }

        let row = self.archetype_mut(destination)?.push_row(id, values)?;
        self.entities
            .set_location(id, EntityLocation { archetype: destination, row });
        Ok(())
    }

    /// The component set present on an entity.
    pub fn components_of(&self, id: EntityId) -> EngineResult<ComponentSet> {
        let loc = self
            .entities
            .location(id)
            .ok_or(EngineError::UnknownEntity(id))?;
        Ok(*self.archetype(loc.archetype)?.set())
    }

    /// Reads the encoded value of one component on an entity.
    pub fn get_component(&self, id: EntityId, cid: ComponentId) -> EngineResult<&[u8]> {
        let loc = self
            .entities
            .location(id)
            .ok_or(EngineError::UnknownEntity(id))?;
        let arch = self.archetype(loc.archetype)?;
        if !arch.set().contains(cid) {
            return Err(EngineError::ComponentNotOnEntity {
                component: format!("#{cid}"),
                entity: id,
            });
        }
        arch.get_cell(loc.row, cid).ok_or_else(|| {
            EngineError::Internal(format!("row {} missing in archetype {}", loc.row, loc.archetype))
        })
    }

    /// Overwrites the encoded value of one component on an entity.
    pub fn set_component(
        &mut self,
        id: EntityId,
        cid: ComponentId,
        value: Vec<u8>,
    ) -> EngineResult<()> {
        let loc = self
            .entities
            .location(id)
            .ok_or(EngineError::UnknownEntity(id))?;
        let arch = self.archetype_mut(loc.archetype)?;
        if !arch.set().contains(cid) {
            return Err(EngineError::ComponentNotOnEntity {
                component: format!("#{cid}"),
                entity: id,
            });
        }
        arch.set_cell(loc.row, cid, value)
    }

    fn archetype(&self, id: ArchetypeId) -> EngineResult<&super::archetype::Archetype> {
        self.archetypes
            .get(id)
            .ok_or_else(|| EngineError::Internal(format!("archetype {id} missing")))
    }

    fn archetype_mut(
        &mut self,
        id: ArchetypeId,
    ) -> EngineResult<&mut super::archetype::Archetype> {
        self.archetypes
            .get_mut(id)
            .ok_or_else(|| EngineError::Internal(format!("archetype {id} missing")))
    }

    /// Walks the structural invariants: every live entity has exactly one
    /// valid location whose archetype row points back at it, every
    /// archetype row belongs to a live entity, and all column lengths
    /// agree with row counts.
    pub fn check_integrity(&self) -> EngineResult<()> {
        for (id, loc) in self.entities.iter() {
            let arch = self.archetype(loc.archetype)?;
            if arch.entity_at(loc.row) != Some(id) {
                return Err(EngineError::Internal(format!(
                    "entity {id} location ({}, {}) does not point back at it",
                    loc.archetype, loc.row
                )));
            }
        }
        let mut rows = 0;
        for arch in self.archetypes.iter() {
            arch.check_columns()?;
            rows += arch.len();
            for (row, id) in arch.entities().iter().enumerate() {
                match self.entities.location(*id) {
                    Some(loc) if loc.archetype == arch.id() && loc.row == row => {}
                    _ => {
                        return Err(EngineError::Internal(format!(
                            "archetype {} row {row} holds {id} without a matching location",
                            arch.id()
                        )))
                    }
                }
            }
        }
        if rows != self.entities.len() {
            return Err(EngineError::Internal(format!(
                "{rows} archetype rows for {} live entities",
                self.entities.len()
            )));
        }
        Ok(())
    }

    /// Archetype layouts and row order, for persistence.
    #[must_use]
    pub fn archetype_records(&self) -> Vec<ArchetypeRecord> {
        self.archetypes
            .iter()
            .map(|arch| ArchetypeRecord {
                id: arch.id(),
                components: arch.set().iter().collect(),
                entities: arch.entities().to_vec(),
            })
            .collect()
    }

    /// Rebuilds state from persisted records, fetching columns through
    /// `fetch_column`.
    pub fn restore(
        &mut self,
        next_entity_id: u64,
        records: Vec<ArchetypeRecord>,
        fetch_column: impl Fn(ArchetypeId, ComponentId) -> EngineResult<Option<Vec<Vec<u8>>>>,
    ) -> EngineResult<()> {
        for record in records {
            let set = ComponentSet::from_ids(record.components.iter().copied());
            let id = self.archetypes.archetype_for(set);
            if id != record.id {
                return Err(EngineError::PersistenceFailure(format!(
                    "archetype {} restored out of order as {id}",
                    record.id
                )));
            }
            for (row, entity) in record.entities.iter().enumerate() {
                self.entities
                    .set_location(*entity, EntityLocation { archetype: id, row });
            }
            let arch = self.archetype_mut(id)?;
            arch.restore_entities(record.entities);
            for cid in record.components {
                let cells = fetch_column(id, cid)?.ok_or_else(|| {
                    EngineError::PersistenceFailure(format!(
                        "column {cid} of archetype {id} missing from store"
                    ))
                })?;
                arch.restore_column(cid, Column::from_cells(cells))?;
            }
        }
        self.entities.restore_next_id(next_entity_id);
        self.check_integrity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(ComponentId, u8)]) -> Vec<(ComponentId, Vec<u8>)> {
        pairs.iter().map(|(cid, v)| (*cid, vec![*v])).collect()
    }

    #[test]
    fn test_create_and_read() {
        let mut state = WorldState::new();
        let id = state.create_entity(values(&[(1, 10), (2, 20)])).unwrap();
        assert_eq!(state.get_component(id, 1).unwrap(), &[10]);
        assert_eq!(state.get_component(id, 2).unwrap(), &[20]);
        assert_eq!(state.components_of(id).unwrap(), ComponentSet::from_ids([1, 2]));
        state.check_integrity().unwrap();
    }

    #[test]
    fn test_duplicate_component_in_bundle_is_rejected() {
        let mut state = WorldState::new();
        assert!(state.create_entity(values(&[(1, 1), (1, 2)])).is_err());
    }

    #[test]
    fn test_destroy_fixes_swapped_location() {
        let mut state = WorldState::new();
        let a = state.create_entity(values(&[(1, 1)])).unwrap();
        let _b = state.create_entity(values(&[(1, 2)])).unwrap();
        let c = state.create_entity(values(&[(1, 3)])).unwrap();

        state.destroy_entity(a).unwrap();
        // c was the tail; it now occupies a's old row.
        let loc = state.location(c).unwrap();
        assert_eq!(loc.row, 0);
        assert_eq!(state.get_component(c, 1).unwrap(), &[3]);
        state.check_integrity().unwrap();

        assert!(matches!(
            state.destroy_entity(a),
            Err(EngineError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_component_errors() {
        let mut state = WorldState::new();
        let id = state.create_entity(values(&[(1, 1)])).unwrap();
        assert!(matches!(
            state.get_component(id, 2),
            Err(EngineError::ComponentNotOnEntity { .. })
        ));
        assert!(matches!(
            state.get_component(EntityId(99), 1),
            Err(EngineError::UnknownEntity(_))
        ));
        assert!(state.set_component(id, 2, vec![0]).is_err());
    }
}
