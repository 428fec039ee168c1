//! # Message Registry & Queues
//!
//! Message kinds are registered with typed input/output codecs and get a
//! dense numeric ID. Submitted messages wait in a pending queue partitioned
//! per kind; a tick detaches the whole pending set at intake and systems
//! drain their kind's messages in submission order via
//! [`MessageType::each`].
//!
//! The nonce table lives next to the queue: both are shared between
//! producer threads and the scheduler and are guarded by the same mutex in
//! the world.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

use alloy_primitives::{Address, B256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use leyline_sign::SignedPayload;

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::world::MessageSender;

/// Dense numeric message-kind identifier, assigned at registration.
///
/// IDs start at 1; the built-in persona-claim message is always kind 1.
pub type MessageKindId = u32;

/// Metadata for a registered message kind.
pub struct MessageKindInfo {
    id: MessageKindId,
    name: &'static str,
    evm_supported: bool,
    decode_check: Box<dyn Fn(&[u8]) -> EngineResult<()> + Send + Sync>,
}

impl MessageKindInfo {
    /// The assigned kind ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> MessageKindId {
        self.id
    }

    /// The registered name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// True if messages of this kind may carry an external chain hash.
    #[inline]
    #[must_use]
    pub const fn evm_supported(&self) -> bool {
        self.evm_supported
    }

    /// Checks that `body` decodes as this kind's input type.
    pub fn check_body(&self, body: &[u8]) -> EngineResult<()> {
        (self.decode_check)(body)
    }
}

impl fmt::Debug for MessageKindInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKindInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("evm_supported", &self.evm_supported)
            .finish()
    }
}

/// Registry assigning stable IDs to message kinds.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    kinds: Vec<MessageKindInfo>,
    by_name: HashMap<&'static str, MessageKindId>,
    frozen: bool,
}

impl MessageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a message kind, returning its ID.
    pub fn register<In>(
        &mut self,
        name: &'static str,
        evm_supported: bool,
    ) -> EngineResult<MessageKindId>
    where
        In: DeserializeOwned + 'static,
    {
        if self.by_name.contains_key(name) {
            return Err(EngineError::AlreadyRegistered(name.to_string()));
        }
        if self.frozen {
            return Err(EngineError::Frozen("message"));
        }
        let id = self.kinds.len() as MessageKindId + 1;
        self.kinds.push(MessageKindInfo {
            id,
            name,
            evm_supported,
            decode_check: Box::new(move |body| {
                serde_json::from_slice::<In>(body)
                    .map(|_| ())
                    .map_err(|e| EngineError::Codec(format!("{name} input: {e}")))
            }),
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Looks up a kind by ID.
    #[must_use]
    pub fn get(&self, id: MessageKindId) -> Option<&MessageKindInfo> {
        if id == 0 {
            return None;
        }
        self.kinds.get(id as usize - 1)
    }

    /// Looks up a kind by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&MessageKindInfo> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// Blocks further registrations.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Registered kind names in ID order, for persistence.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.kinds.iter().map(|k| k.name.to_string()).collect()
    }

    /// Validates persisted kind names against the registered ones.
    ///
    /// Replayed queue entries reference kinds by ID, so the persisted list
    /// must match by position.
    pub fn validate_schema(&self, persisted: &[String]) -> EngineResult<()> {
        let current = self.names();
        if current != persisted {
            return Err(EngineError::SchemaIncompatible(format!(
                "message kinds changed since the store was written: store has {persisted:?}, world registered {current:?}"
            )));
        }
        Ok(())
    }
}

/// A message waiting in, or detached from, the queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Kind this message belongs to.
    pub kind: MessageKindId,
    /// Deterministic hash identifying the message.
    pub tx_hash: B256,
    /// The signed envelope as submitted.
    pub payload: SignedPayload,
    /// Encoded input value.
    pub input: Vec<u8>,
    /// Resolved signer address (zero when verification is disabled).
    pub signer: Address,
    /// External chain transaction hash, if any.
    pub evm_tx_hash: Option<String>,
}

/// Per-kind message queue.
///
/// Within a kind, iteration order equals insertion order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageQueue {
    by_kind: BTreeMap<MessageKindId, Vec<QueuedMessage>>,
}

impl MessageQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to its kind's partition.
    pub fn push(&mut self, msg: QueuedMessage) {
        self.by_kind.entry(msg.kind).or_default().push(msg);
    }

    /// Removes and returns all messages of a kind, in submission order.
    pub fn take_all(&mut self, kind: MessageKindId) -> Vec<QueuedMessage> {
        self.by_kind.remove(&kind).unwrap_or_default()
    }

    /// True if a message with this hash is queued.
    #[must_use]
    pub fn contains_hash(&self, tx_hash: B256) -> bool {
        self.by_kind
            .values()
            .any(|msgs| msgs.iter().any(|m| m.tx_hash == tx_hash))
    }

    /// Total queued messages across kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(Vec::is_empty)
    }

    /// Iterates all messages, kinds in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.by_kind.values().flatten()
    }

    /// The per-kind partitions, as handed to the chain adapter.
    #[must_use]
    pub fn by_kind(&self) -> &BTreeMap<MessageKindId, Vec<QueuedMessage>> {
        &self.by_kind
    }
}

/// Last accepted nonce per persona.
///
/// Only the latest nonce is retained; the table is append-only in the sense
/// that accepted nonces only ever increase.
#[derive(Debug, Default)]
pub struct NonceTable {
    last_seen: HashMap<String, u64>,
}

impl NonceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects nonces not strictly greater than the last accepted one.
    pub fn check(&self, persona_tag: &str, nonce: u64) -> EngineResult<()> {
        if let Some(&last_seen) = self.last_seen.get(persona_tag) {
            if nonce <= last_seen {
                return Err(EngineError::StaleNonce {
                    persona_tag: persona_tag.to_string(),
                    got: nonce,
                    last_seen,
                });
            }
        }
        Ok(())
    }

    /// Records an accepted nonce.
    pub fn commit(&mut self, persona_tag: &str, nonce: u64) {
        self.last_seen.insert(persona_tag.to_string(), nonce);
    }

    /// All entries, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.last_seen.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Rebuilds the table from persisted entries.
    pub fn restore(&mut self, entries: BTreeMap<String, u64>) {
        self.last_seen = entries.into_iter().collect();
    }
}

/// A decoded message handed to a system.
#[derive(Clone, Debug)]
pub struct TxData<In> {
    /// Hash identifying the message.
    pub tx_hash: B256,
    /// Decoded input value.
    pub input: In,
    /// Resolved signer address.
    pub signer: Address,
    /// External chain transaction hash, if any.
    pub evm_tx_hash: Option<String>,
}

/// A typed handle to a registered message kind.
///
/// Declare one per kind, register it on the world before
/// `load_game_state`, and use it to enqueue and to drain messages inside
/// systems:
///
/// ```rust,ignore
/// static MOVE_MSG: MessageType<MoveInput, MoveResult> = MessageType::new("move");
///
/// world.register_message(&MOVE_MSG)?;
/// world.register_system(|ctx| {
///     MOVE_MSG.each(ctx, |ctx, tx| {
///         // handle tx.input, mutate entities through ctx
///         Ok(MoveResult { .. })
///     })
/// });
/// ```
pub struct MessageType<In, Out> {
    name: &'static str,
    evm_supported: bool,
    id: OnceLock<MessageKindId>,
    _marker: PhantomData<fn() -> (In, Out)>,
}

impl<In, Out> fmt::Debug for MessageType<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("name", &self.name)
            .field("id", &self.id.get())
            .field("evm_supported", &self.evm_supported)
            .finish()
    }
}

impl<In, Out> MessageType<In, Out>
where
    In: Serialize + DeserializeOwned + Send + Sync + 'static,
    Out: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Declares a message kind.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            evm_supported: false,
            id: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// Declares a message kind whose receipts can be consumed by external
    /// chain transaction hash.
    #[must_use]
    pub const fn with_evm_support(name: &'static str) -> Self {
        Self {
            name,
            evm_supported: true,
            id: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// The declared name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// True if declared with EVM support.
    #[inline]
    #[must_use]
    pub const fn evm_supported(&self) -> bool {
        self.evm_supported
    }

    /// The kind ID assigned at registration.
    pub fn kind_id(&self) -> EngineResult<MessageKindId> {
        self.id.get().copied().ok_or_else(|| {
            EngineError::UnknownMessageKind(format!("{} (not registered)", self.name))
        })
    }

    pub(crate) fn bind(&self, id: MessageKindId) -> EngineResult<()> {
        match self.id.set(id) {
            Ok(()) => Ok(()),
            Err(_) if self.id.get() == Some(&id) => Ok(()),
            Err(_) => Err(EngineError::Internal(format!(
                "message type {:?} already bound to kind {:?}",
                self.name,
                self.id.get()
            ))),
        }
    }

    /// Enqueues a trusted message, bypassing payload verification.
    ///
    /// The signer is resolved from the payload's persona tag if one is
    /// committed; otherwise it is left empty.
    pub fn enqueue(
        &self,
        sender: &MessageSender,
        input: In,
        payload: SignedPayload,
    ) -> EngineResult<B256> {
        sender.enqueue_direct(self.kind_id()?, serde_json::to_vec(&input)?, payload, None)
    }

    /// Enqueues a trusted message tagged with an external chain hash.
    pub fn enqueue_evm(
        &self,
        sender: &MessageSender,
        input: In,
        payload: SignedPayload,
        evm_tx_hash: impl Into<String>,
    ) -> EngineResult<B256> {
        if !self.evm_supported {
            return Err(EngineError::Internal(format!(
                "message kind {:?} was not declared with EVM support",
                self.name
            )));
        }
        sender.enqueue_direct(
            self.kind_id()?,
            serde_json::to_vec(&input)?,
            payload,
            Some(evm_tx_hash.into()),
        )
    }

    /// Drains this kind's messages from the tick and invokes `f` on each,
    /// in submission order.
    ///
    /// The closure outcome is recorded into the message's receipt: the
    /// encoded result on `Ok`, the error text on `Err`. Closure errors do
    /// not abort the tick.
    pub fn each<F, E>(&self, ctx: &mut EngineContext<'_>, mut f: F) -> EngineResult<()>
    where
        F: FnMut(&mut EngineContext<'_>, &TxData<In>) -> Result<Out, E>,
        E: fmt::Display,
    {
        let kind = self.kind_id()?;
        for msg in ctx.take_messages(kind) {
            let input: In = match serde_json::from_slice(&msg.input) {
                Ok(input) => input,
                Err(e) => {
                    ctx.record_error(msg.tx_hash, format!("{} input: {e}", self.name));
                    continue;
                }
            };
            let tx = TxData {
                tx_hash: msg.tx_hash,
                input,
                signer: msg.signer,
                evm_tx_hash: msg.evm_tx_hash.clone(),
            };
            match f(ctx, &tx) {
                Ok(out) => match serde_json::to_vec(&out) {
                    Ok(bytes) => ctx.record_result(msg.tx_hash, bytes),
                    Err(e) => {
                        ctx.record_error(msg.tx_hash, format!("{} result: {e}", self.name));
                    }
                },
                Err(e) => ctx.record_error(msg.tx_hash, e.to_string()),
            }
        }
        Ok(())
    }
}
