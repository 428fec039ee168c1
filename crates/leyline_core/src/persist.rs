//! # Persistence Boundary
//!
//! The engine persists through a narrow transactional key/value seam: a
//! tick's commit phase opens one [`StorageTx`], writes the full snapshot,
//! and commits: either everything lands or nothing does. The backend is a
//! black box behind [`Storage`]; [`MemoryStore`] ships for tests and
//! single-process worlds.
//!
//! ## Key layout
//!
//! | Key | Contents |
//! |-----|----------|
//! | `tick` | committed tick counter |
//! | `schema` | component fingerprints + message kind names |
//! | `entities` | entity allocator watermark |
//! | `archetypes` | component set + row-ordered entities per archetype |
//! | `components/<archetype>/<component>` | one encoded column |
//! | `nonces` | last accepted nonce per persona |
//! | `personas` | committed persona bindings |
//! | `receipts` | live receipts with their commit tick |
//! | `queue/intake` | the tick's working set, deleted at commit |

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::ecs::archetype::ArchetypeId;
use crate::ecs::component::ComponentId;
use crate::ecs::entity::EntityId;
use crate::error::{EngineError, EngineResult};

/// Key holding the committed tick counter.
pub const KEY_TICK: &str = "tick";
/// Key holding the schema record.
pub const KEY_SCHEMA: &str = "schema";
/// Key holding the entity allocator record.
pub const KEY_ENTITIES: &str = "entities";
/// Key holding archetype layouts and row order.
pub const KEY_ARCHETYPES: &str = "archetypes";
/// Key holding the nonce table.
pub const KEY_NONCES: &str = "nonces";
/// Key holding persona bindings.
pub const KEY_PERSONAS: &str = "personas";
/// Key holding live receipts.
pub const KEY_RECEIPTS: &str = "receipts";
/// Key holding the in-flight tick's working set.
pub const KEY_INTAKE: &str = "queue/intake";

/// Key of one persisted component column.
#[must_use]
pub fn column_key(archetype: ArchetypeId, component: ComponentId) -> String {
    format!("components/{archetype}/{component}")
}

/// A single write transaction. Writes are staged until `commit`.
pub trait StorageTx {
    /// Stages a write.
    fn put(&mut self, key: &str, value: Vec<u8>);
    /// Stages a deletion.
    fn delete(&mut self, key: &str);
    /// Applies all staged operations atomically.
    fn commit(self: Box<Self>) -> EngineResult<()>;
    /// Discards all staged operations.
    fn rollback(self: Box<Self>);
}

/// Transactional key/value storage with single-writer semantics.
pub trait Storage: Send {
    /// Opens a write transaction. At most one is open at a time.
    fn begin<'a>(&'a self) -> EngineResult<Box<dyn StorageTx + 'a>>;
    /// Reads a key.
    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>>;
}

/// In-memory [`Storage`] backend.
///
/// Clones share the underlying map, so a world can be dropped and a new one
/// opened against the same store, the moral equivalent of restarting
/// against the same database.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

enum Op {
    Put(String, Vec<u8>),
    Delete(String),
}

struct MemoryTx<'a> {
    // Holding the guard for the transaction's lifetime is what enforces
    // single-writer semantics.
    guard: MutexGuard<'a, HashMap<String, Vec<u8>>>,
    staged: Vec<Op>,
}

impl StorageTx for MemoryTx<'_> {
    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.staged.push(Op::Put(key.to_string(), value));
    }

    fn delete(&mut self, key: &str) {
        self.staged.push(Op::Delete(key.to_string()));
    }

    fn commit(mut self: Box<Self>) -> EngineResult<()> {
        let staged = std::mem::take(&mut self.staged);
        for op in staged {
            match op {
                Op::Put(key, value) => {
                    self.guard.insert(key, value);
                }
                Op::Delete(key) => {
                    self.guard.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

impl Storage for MemoryStore {
    fn begin<'a>(&'a self) -> EngineResult<Box<dyn StorageTx + 'a>> {
        Ok(Box::new(MemoryTx {
            guard: self.inner.lock(),
            staged: Vec::new(),
        }))
    }

    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().get(key).cloned())
    }
}

/// Persisted archetype layout and row order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchetypeRecord {
    /// The archetype's stable ID.
    pub id: ArchetypeId,
    /// Component IDs in the archetype's set, ascending.
    pub components: Vec<ComponentId>,
    /// Entities in row order.
    pub entities: Vec<EntityId>,
}

/// Persisted entity allocator state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Next entity ID to allocate.
    pub next_id: u64,
}

/// Persisted schema: what a compatible world must have registered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaRecord {
    /// Component `(name, fingerprint)` pairs in ID order.
    pub components: Vec<(String, B256)>,
    /// Message kind names in ID order.
    pub messages: Vec<String>,
}

/// Reads and decodes a JSON record.
pub fn get_record<T: serde::de::DeserializeOwned>(
    store: &dyn Storage,
    key: &str,
) -> EngineResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
            EngineError::PersistenceFailure(format!("corrupt record at {key:?}: {e}"))
        })?)),
        None => Ok(None),
    }
}

/// Encodes a record for writing.
pub fn encode_record<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| EngineError::PersistenceFailure(format!("encode record: {e}")))
}
