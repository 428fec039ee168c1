//! # Component Registry
//!
//! Components are pure data: serde-serializable value types with a stable
//! name. The registry assigns each registered type a dense numeric ID
//! (starting at 1) and a schema fingerprint derived from the JSON encoding
//! of its default value, which is what guards restarts against silently
//! incompatible layouts.
//!
//! Internally the store only manipulates byte strings; the registry owns
//! the `(type identity) -> component_id` resolution that makes the typed
//! accessors on the engine context work.

use std::any::TypeId;
use std::collections::HashMap;

use alloy_primitives::{keccak256, B256};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};

/// Marker trait for ECS components.
///
/// Components must be serde-serializable value types with a default value
/// (used when a component is added to an existing entity). `NAME` must be
/// globally unique within a world.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Health {
///     hp: u32,
/// }
///
/// impl Component for Health {
///     const NAME: &'static str = "health";
/// }
/// ```
pub trait Component:
    Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
    /// Stable, globally unique component name.
    const NAME: &'static str;
}

/// Dense numeric component identifier, assigned at registration.
///
/// IDs start at 1; 0 is never assigned.
pub type ComponentId = u32;

/// Maximum number of registrable component kinds.
pub const COMPONENT_CAP: usize = 256;

const WORDS: usize = COMPONENT_CAP / 64;

/// The unordered set of component IDs present on an entity.
///
/// A fixed-capacity bitset: filters compile down to mask tests over it, and
/// equality/subset checks are word-wise. The bitset is inherently canonical,
/// so two sets built from differently ordered ID lists compare equal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComponentSet {
    words: [u64; WORDS],
}

impl ComponentSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Builds a set from component IDs.
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = ComponentId>) -> Self {
        let mut set = Self::new();
        for id in ids {
            set.insert(id);
        }
        set
    }

    /// Adds a component ID to the set.
    pub fn insert(&mut self, id: ComponentId) {
        debug_assert!((id as usize) < COMPONENT_CAP, "component id out of range");
        self.words[id as usize / 64] |= 1 << (id % 64);
    }

    /// Removes a component ID from the set.
    pub fn remove(&mut self, id: ComponentId) {
        self.words[id as usize / 64] &= !(1 << (id % 64));
    }

    /// Checks if the set contains a component ID.
    #[inline]
    #[must_use]
    pub const fn contains(&self, id: ComponentId) -> bool {
        (self.words[id as usize / 64] >> (id % 64)) & 1 == 1
    }

    /// Checks if this set is a superset of `other`.
    #[must_use]
    pub fn contains_all(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == *b)
    }

    /// Returns a copy with `id` added.
    #[must_use]
    pub fn with(&self, id: ComponentId) -> Self {
        let mut set = *self;
        set.insert(id);
        set
    }

    /// Returns a copy with `id` removed.
    #[must_use]
    pub fn without(&self, id: ComponentId) -> Self {
        let mut set = *self;
        set.remove(id);
        set
    }

    /// Number of components in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterates over contained IDs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        SetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words[0],
        }
    }
}

/// Iterator over set bits, skipping empty words via `trailing_zeros`.
struct SetIter<'a> {
    words: &'a [u64; WORDS],
    word_idx: usize,
    current: u64,
}

impl Iterator for SetIter<'_> {
    type Item = ComponentId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros();
                self.current &= self.current - 1;
                return Some(self.word_idx as u32 * 64 + bit);
            }
            self.word_idx += 1;
            if self.word_idx >= WORDS {
                return None;
            }
            self.current = self.words[self.word_idx];
        }
    }
}

/// Metadata for a registered component type.
#[derive(Clone, Debug)]
pub struct ComponentInfo {
    id: ComponentId,
    name: &'static str,
    fingerprint: B256,
    default_bytes: Vec<u8>,
}

impl ComponentInfo {
    /// The assigned component ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// The registered name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Schema fingerprint used for restart compatibility checks.
    #[inline]
    #[must_use]
    pub const fn fingerprint(&self) -> B256 {
        self.fingerprint
    }

    /// Encoded default value, used when the component is added to an
    /// existing entity.
    #[must_use]
    pub fn default_bytes(&self) -> &[u8] {
        &self.default_bytes
    }
}

/// Registry assigning stable IDs to component types.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<&'static str, ComponentId>,
    by_type: HashMap<TypeId, ComponentId>,
    frozen: bool,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component type, returning its ID.
    ///
    /// Idempotent when the name is already registered with an identical
    /// fingerprint. Fails with `AlreadyRegistered` on a fingerprint
    /// mismatch, and with `Frozen` once the world has started.
    pub fn register<T: Component>(&mut self) -> EngineResult<ComponentId> {
        let fingerprint = fingerprint_of::<T>()?;
        if let Some(&id) = self.by_name.get(T::NAME) {
            let existing = &self.infos[id as usize - 1];
            if existing.fingerprint != fingerprint {
                return Err(EngineError::AlreadyRegistered(T::NAME.to_string()));
            }
            self.by_type.insert(TypeId::of::<T>(), id);
            return Ok(id);
        }
        if self.frozen {
            return Err(EngineError::Frozen("component"));
        }
        if self.infos.len() + 1 >= COMPONENT_CAP {
            return Err(EngineError::Internal(format!(
                "component capacity {COMPONENT_CAP} exhausted"
            )));
        }

        let id = self.infos.len() as ComponentId + 1;
        self.infos.push(ComponentInfo {
            id,
            name: T::NAME,
            fingerprint,
            default_bytes: serde_json::to_vec(&T::default())?,
        });
        self.by_name.insert(T::NAME, id);
        self.by_type.insert(TypeId::of::<T>(), id);
        Ok(id)
    }

    /// Resolves the ID for a registered component type.
    pub fn id_of<T: Component>(&self) -> EngineResult<ComponentId> {
        self.by_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| EngineError::UnknownComponent(T::NAME.to_string()))
    }

    /// Looks up metadata by name.
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<&ComponentInfo> {
        self.by_name
            .get(name)
            .and_then(|id| self.lookup_by_id(*id))
    }

    /// Looks up metadata by ID.
    #[must_use]
    pub fn lookup_by_id(&self, id: ComponentId) -> Option<&ComponentInfo> {
        if id == 0 {
            return None;
        }
        self.infos.get(id as usize - 1)
    }

    /// Name of a registered component, or `"?"` for an unknown ID.
    #[must_use]
    pub fn name_of(&self, id: ComponentId) -> &'static str {
        self.lookup_by_id(id).map_or("?", ComponentInfo::name)
    }

    /// Blocks further registrations.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Number of registered component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// `(name, fingerprint)` pairs in ID order, for persistence.
    #[must_use]
    pub fn schema(&self) -> Vec<(String, B256)> {
        self.infos
            .iter()
            .map(|i| (i.name.to_string(), i.fingerprint))
            .collect()
    }

    /// Validates a persisted schema against the registered one.
    ///
    /// Registration order pins the dense IDs, so the persisted list must
    /// match by position, name and fingerprint.
    pub fn validate_schema(&self, persisted: &[(String, B256)]) -> EngineResult<()> {
        let current = self.schema();
        if current.len() != persisted.len() {
            return Err(EngineError::SchemaIncompatible(format!(
                "store has {} component kinds, world registered {}",
                persisted.len(),
                current.len()
            )));
        }
        for (idx, ((cur_name, cur_fp), (old_name, old_fp))) in
            current.iter().zip(persisted.iter()).enumerate()
        {
            if cur_name != old_name {
                return Err(EngineError::SchemaIncompatible(format!(
                    "component {} is {cur_name:?}, store has {old_name:?}",
                    idx + 1
                )));
            }
            if cur_fp != old_fp {
                return Err(EngineError::SchemaIncompatible(format!(
                    "component {cur_name:?} changed layout since the store was written"
                )));
            }
        }
        Ok(())
    }
}

/// Computes the schema fingerprint for a component type.
///
/// The fingerprint hashes the JSON encoding of the default value, so field
/// additions, removals and renames all change it.
pub fn fingerprint_of<T: Component>() -> EngineResult<B256> {
    Ok(keccak256(&serde_json::to_vec(&T::default())?))
}

/// A list of component types, resolved to IDs against a registry.
///
/// Implemented for tuples of components; used to build filter sets without
/// component values.
pub trait ComponentList {
    /// Resolves the component IDs for this list.
    fn component_ids(registry: &ComponentRegistry) -> EngineResult<Vec<ComponentId>>;
}

/// A set of component values used to create an entity.
///
/// Implemented for tuples of components, including the one-element tuple
/// `(comp,)` for single-component entities.
pub trait ComponentBundle: ComponentList {
    /// Encodes each component value, paired with its ID.
    fn encode(&self, registry: &ComponentRegistry) -> EngineResult<Vec<(ComponentId, Vec<u8>)>>;
}

macro_rules! impl_bundle {
    ($(($name:ident, $idx:tt)),*) => {
        impl<$($name: Component),*> ComponentList for ($($name,)*) {
            fn component_ids(
                registry: &ComponentRegistry,
            ) -> EngineResult<Vec<ComponentId>> {
                Ok(vec![$(registry.id_of::<$name>()?),*])
            }
        }

        impl<$($name: Component),*> ComponentBundle for ($($name,)*) {
            fn encode(
                &self,
                registry: &ComponentRegistry,
            ) -> EngineResult<Vec<(ComponentId, Vec<u8>)>> {
                Ok(vec![$(
                    (registry.id_of::<$name>()?, serde_json::to_vec(&self.$idx)?)
                ),*])
            }
        }
    };
}

impl ComponentList for () {
    fn component_ids(_registry: &ComponentRegistry) -> EngineResult<Vec<ComponentId>> {
        Ok(Vec::new())
    }
}

impl ComponentBundle for () {
    fn encode(
        &self,
        _registry: &ComponentRegistry,
    ) -> EngineResult<Vec<(ComponentId, Vec<u8>)>> {
        Ok(Vec::new())
    }
}

impl_bundle!((A, 0));
impl_bundle!((A, 0), (B, 1));
impl_bundle!((A, 0), (B, 1), (C, 2));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    struct Energy {
        amt: i64,
        cap: i64,
    }

    impl Component for Energy {
        const NAME: &'static str = "energy";
    }

    // Same name, different layout.
    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    struct AlteredEnergy {
        amt: i64,
        cap: i64,
        extra: i64,
    }

    impl Component for AlteredEnergy {
        const NAME: &'static str = "energy";
    }

    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    struct Ownable {
        owner: String,
    }

    impl Component for Ownable {
        const NAME: &'static str = "ownable";
    }

    #[test]
    fn test_registration_assigns_dense_ids() {
        let mut reg = ComponentRegistry::new();
        assert_eq!(reg.register::<Energy>().unwrap(), 1);
        assert_eq!(reg.register::<Ownable>().unwrap(), 2);
        assert_eq!(reg.lookup_by_name("energy").unwrap().id(), 1);
        assert_eq!(reg.lookup_by_id(2).unwrap().name(), "ownable");
        assert!(reg.lookup_by_id(0).is_none());
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register::<Energy>().unwrap();
        let b = reg.register::<Energy>().unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Energy>().unwrap();
        let err = reg.register::<AlteredEnergy>().unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_frozen_registry_rejects_new_components() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Energy>().unwrap();
        reg.freeze();
        assert!(matches!(
            reg.register::<Ownable>(),
            Err(EngineError::Frozen(_))
        ));
        // Re-registration of an existing component stays idempotent.
        assert_eq!(reg.register::<Energy>().unwrap(), 1);
    }

    #[test]
    fn test_validate_persisted_schema() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Energy>().unwrap();
        reg.register::<Ownable>().unwrap();

        assert!(reg.validate_schema(&reg.schema()).is_ok());

        let mut reordered = reg.schema();
        reordered.swap(0, 1);
        assert!(reg.validate_schema(&reordered).is_err());

        assert!(reg.validate_schema(&reg.schema()[..1]).is_err());
    }

    #[test]
    fn test_component_set_ops() {
        let mut set = ComponentSet::new();
        assert!(set.is_empty());
        set.insert(1);
        set.insert(200);
        set.insert(64);
        assert_eq!(set.len(), 3);
        assert!(set.contains(64));
        assert!(!set.contains(2));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 64, 200]);

        let same = ComponentSet::from_ids([200, 64, 1]);
        assert_eq!(set, same);

        let sub = ComponentSet::from_ids([1, 64]);
        assert!(set.contains_all(&sub));
        assert!(!sub.contains_all(&set));

        set.remove(64);
        assert!(!set.contains(64));
        assert_eq!(set.without(1).with(5), ComponentSet::from_ids([5, 200]));
    }

    #[test]
    fn test_bundle_encoding() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Energy>().unwrap();
        reg.register::<Ownable>().unwrap();

        let bundle = (Energy { amt: 5, cap: 10 }, Ownable { owner: "jeff".into() });
        let encoded = bundle.encode(&reg).unwrap();
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0].0, 1);
        assert_eq!(encoded[1].0, 2);

        let decoded: Energy = serde_json::from_slice(&encoded[0].1).unwrap();
        assert_eq!(decoded.amt, 5);

        let ids = <(Ownable, Energy)>::component_ids(&reg).unwrap();
        assert_eq!(ids, vec![2, 1]);
    }
}
