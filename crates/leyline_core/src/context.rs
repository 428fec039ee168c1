//! # Engine Context
//!
//! Systems and query handlers receive an [`EngineContext`]: the typed
//! surface over the byte-oriented ECS state, plus the tick's message queue
//! and receipt buffer. Query contexts carry the read-only flag, which
//! blocks every mutation with `ReadOnlyContext`; determinism of state
//! evolution depends on mutations flowing only through ticked systems.

use alloy_primitives::B256;

use crate::ecs::archetype::ArchetypeStore;
use crate::ecs::component::{
    Component, ComponentBundle, ComponentList, ComponentRegistry, ComponentSet,
};
use crate::ecs::entity::{EntityId, EntityLocation};
use crate::ecs::world::WorldState;
use crate::error::{EngineError, EngineResult};
use crate::message::{MessageKindId, MessageQueue, QueuedMessage};
use crate::receipt::ReceiptBuffer;

/// Read/write access to world state for one system invocation or query.
pub struct EngineContext<'a> {
    state: &'a mut WorldState,
    components: &'a ComponentRegistry,
    namespace: &'a str,
    tick: u64,
    queue: Option<&'a mut MessageQueue>,
    receipts: Option<&'a mut ReceiptBuffer>,
    read_only: bool,
}

impl<'a> EngineContext<'a> {
    pub(crate) fn new(
        state: &'a mut WorldState,
        components: &'a ComponentRegistry,
        namespace: &'a str,
        tick: u64,
        queue: Option<&'a mut MessageQueue>,
        receipts: Option<&'a mut ReceiptBuffer>,
        read_only: bool,
    ) -> Self {
        Self {
            state,
            components,
            namespace,
            tick,
            queue,
            receipts,
            read_only,
        }
    }

    /// The tick currently executing.
    #[inline]
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// The world's namespace.
    #[inline]
    #[must_use]
    pub const fn namespace(&self) -> &str {
        self.namespace
    }

    /// True if mutation APIs are blocked.
    #[inline]
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_mutable(&self) -> EngineResult<()> {
        if self.read_only {
            return Err(EngineError::ReadOnlyContext);
        }
        Ok(())
    }

    pub(crate) fn archetypes(&self) -> &ArchetypeStore {
        self.state.archetypes()
    }

    pub(crate) fn entity_location(&self, id: EntityId) -> Option<EntityLocation> {
        self.state.location(id)
    }

    /// Creates an entity carrying the bundle's components.
    pub fn create<B: ComponentBundle>(&mut self, bundle: B) -> EngineResult<EntityId> {
        self.ensure_mutable()?;
        let values = bundle.encode(self.components)?;
        self.state.create_entity(values)
    }

    /// Creates `n` entities carrying identical component values.
    pub fn create_many<B: ComponentBundle>(
        &mut self,
        n: usize,
        bundle: B,
    ) -> EngineResult<Vec<EntityId>> {
        self.ensure_mutable()?;
        let values = bundle.encode(self.components)?;
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            ids.push(self.state.create_entity(values.clone())?);
        }
        Ok(ids)
    }

    /// Destroys an entity.
    pub fn remove(&mut self, id: EntityId) -> EngineResult<()> {
        self.ensure_mutable()?;
        self.state.destroy_entity(id)
    }

    /// Adds a component (initialized to its default) to an entity, moving
    /// it to the corresponding archetype.
    pub fn add_component<T: Component>(&mut self, id: EntityId) -> EngineResult<()> {
        self.ensure_mutable()?;
        let cid = self.components.id_of::<T>()?;
        let set = self.state.components_of(id)?;
        if set.contains(cid) {
            return Err(EngineError::ComponentAlreadyOnEntity {
                component: T::NAME.to_string(),
                entity: id,
            });
        }
        self.state.move_entity(id, set.with(cid), self.components)
    }

    /// Removes a component from an entity, moving it to the corresponding
    /// archetype and dropping the value.
    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> EngineResult<()> {
        self.ensure_mutable()?;
        let cid = self.components.id_of::<T>()?;
        let set = self.state.components_of(id)?;
        if !set.contains(cid) {
            return Err(EngineError::ComponentNotOnEntity {
                component: T::NAME.to_string(),
                entity: id,
            });
        }
        self.state.move_entity(id, set.without(cid), self.components)
    }

    /// Reads a component value from an entity.
    pub fn get_component<T: Component>(&self, id: EntityId) -> EngineResult<T> {
        let cid = self.components.id_of::<T>()?;
        let bytes = self
            .state
            .get_component(id, cid)
            .map_err(|e| name_component_error::<T>(e, id))?;
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Codec(format!("decode {}: {e}", T::NAME)))
    }

    /// Overwrites a component value on an entity.
    ///
    /// The component must already be present; use
    /// [`EngineContext::add_component`] to attach one.
    pub fn set_component<T: Component>(&mut self, id: EntityId, value: &T) -> EngineResult<()> {
        self.ensure_mutable()?;
        let cid = self.components.id_of::<T>()?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| EngineError::Codec(format!("encode {}: {e}", T::NAME)))?;
        self.state
            .set_component(id, cid, bytes)
            .map_err(|e| name_component_error::<T>(e, id))?;
        tracing::debug!(entity = %id, component = T::NAME, "entity updated");
        Ok(())
    }

    /// Reads, transforms and writes back a component value.
    pub fn update_component<T: Component>(
        &mut self,
        id: EntityId,
        f: impl FnOnce(T) -> T,
    ) -> EngineResult<()> {
        self.ensure_mutable()?;
        let value = self.get_component::<T>(id)?;
        self.set_component(id, &f(value))
    }

    /// The component set present on an entity.
    pub fn components_of(&self, id: EntityId) -> EngineResult<ComponentSet> {
        self.state.components_of(id)
    }

    /// Resolves a tuple of component types to a [`ComponentSet`], for
    /// building filters.
    pub fn component_set<L: ComponentList>(&self) -> EngineResult<ComponentSet> {
        Ok(ComponentSet::from_ids(L::component_ids(self.components)?))
    }

    pub(crate) fn take_messages(&mut self, kind: MessageKindId) -> Vec<QueuedMessage> {
        self.queue
            .as_mut()
            .map(|q| q.take_all(kind))
            .unwrap_or_default()
    }

    /// Records the encoded result for a message's receipt.
    pub fn record_result(&mut self, tx_hash: B256, result: Vec<u8>) {
        if let Some(receipts) = self.receipts.as_mut() {
            receipts.set_result(tx_hash, result);
        }
    }

    /// Appends an error to a message's receipt.
    pub fn record_error(&mut self, tx_hash: B256, error: impl Into<String>) {
        if let Some(receipts) = self.receipts.as_mut() {
            receipts.add_error(tx_hash, error);
        }
    }
}

/// Replaces the state layer's `#<id>` placeholder with the component name.
fn name_component_error<T: Component>(err: EngineError, id: EntityId) -> EngineError {
    match err {
        EngineError::ComponentNotOnEntity { .. } => EngineError::ComponentNotOnEntity {
            component: T::NAME.to_string(),
            entity: id,
        },
        other => other,
    }
}
