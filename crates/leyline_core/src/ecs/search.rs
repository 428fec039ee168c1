//! # Entity Search
//!
//! A [`Search`] binds a filter and memoizes, per namespace, the archetype
//! IDs that match it. Archetypes are never destroyed and their IDs are
//! assigned in creation order, so the cache only ever has to look at
//! archetypes created since its last evaluation (the `seen` high-water
//! mark). Reusing a search across ticks is therefore much cheaper than
//! rebuilding one.
//!
//! ## Iteration under mutation ("remove-safe forward iteration")
//!
//! `each` walks matching archetypes in creation order and rows from 0
//! upward, against the entity list observed when the pass enters each
//! archetype. Entities created during the pass are not visited. Removing
//! an entity swap-moves the tail row into its slot; entities already
//! visited stay visited, entities removed before their visit are skipped,
//! and the swapped tail entity is visited exactly once. This is the
//! contract callbacks may rely on when they mutate while iterating.

use std::collections::HashMap;

use super::archetype::{ArchetypeId, ArchetypeStore};
use super::entity::EntityId;
use super::filter::Filter;
use crate::context::EngineContext;
use crate::error::EngineResult;

#[derive(Debug, Default)]
struct CacheEntry {
    archetypes: Vec<ArchetypeId>,
    seen: usize,
}

/// A reusable, cached entity search.
#[derive(Debug)]
pub struct Search {
    filter: Filter,
    matches: HashMap<String, CacheEntry>,
}

impl Search {
    /// Creates a search for the given filter.
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            matches: HashMap::new(),
        }
    }

    /// Returns matching archetype IDs, incrementally evaluating only
    /// archetypes created since the last call for this namespace.
    fn matching(&mut self, namespace: &str, store: &ArchetypeStore) -> Vec<ArchetypeId> {
        let Self { filter, matches } = self;
        let entry = matches.entry(namespace.to_string()).or_default();
        for idx in entry.seen..store.count() {
            if let Some(arch) = store.get(idx as ArchetypeId) {
                if filter.matches(arch.set()) {
                    entry.archetypes.push(arch.id());
                }
            }
        }
        entry.seen = store.count();
        entry.archetypes.clone()
    }

    /// Invokes `cb` for every matching entity.
    ///
    /// Return `false` from the callback to stop early, `true` to continue.
    /// The callback receives the context back and may mutate entities,
    /// subject to the iteration contract documented on this module.
    pub fn each<F>(&mut self, ctx: &mut EngineContext<'_>, mut cb: F) -> EngineResult<()>
    where
        F: FnMut(&mut EngineContext<'_>, EntityId) -> bool,
    {
        let namespace = ctx.namespace().to_string();
        let archetypes = self.matching(&namespace, ctx.archetypes());
        for aid in archetypes {
            let snapshot = match ctx.archetypes().get(aid) {
                Some(arch) => arch.entities().to_vec(),
                None => continue,
            };
            for id in snapshot {
                // Skip entities that left this archetype since the pass
                // began (removed, or migrated by the callback).
                match ctx.entity_location(id) {
                    Some(loc) if loc.archetype == aid => {}
                    _ => continue,
                }
                if !cb(ctx, id) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Number of entities matching the search.
    #[must_use]
    pub fn count(&mut self, ctx: &EngineContext<'_>) -> usize {
        let namespace = ctx.namespace().to_string();
        let archetypes = self.matching(&namespace, ctx.archetypes());
        ctx.archetypes().iterate(&archetypes, 0).count()
    }

    /// The first matching entity, or [`EntityId::BAD`] if none match.
    ///
    /// Order is archetype creation order, then ascending row index.
    #[must_use]
    pub fn first(&mut self, ctx: &EngineContext<'_>) -> EntityId {
        let namespace = ctx.namespace().to_string();
        let archetypes = self.matching(&namespace, ctx.archetypes());
        let result = ctx
            .archetypes()
            .iterate(&archetypes, 0)
            .map(|(id, _)| id)
            .next()
            .unwrap_or(EntityId::BAD);
        result
    }

    /// Like [`Search::first`], but panics when nothing matches.
    ///
    /// # Panics
    ///
    /// Panics if no entity matches the search.
    #[must_use]
    pub fn must_first(&mut self, ctx: &EngineContext<'_>) -> EntityId {
        let id = self.first(ctx);
        assert!(!id.is_bad(), "no entity matches the search");
        id
    }
}
