//! # World & Tick Scheduler
//!
//! The [`World`] owns every registry and the ECS state, and advances it in
//! atomic ticks. A tick has four ordered phases inside one logical
//! transaction:
//!
//! 1. **Intake**: the pending queues are detached as the tick's working
//!    set (anything enqueued from here on, including by systems mid-tick,
//!    lands in the next tick).
//! 2. **Execute**: registered systems run sequentially in registration
//!    order; system errors are collected, not fatal.
//! 3. **Persona commit**: `create-persona` outcomes are applied.
//! 4. **Commit**: the new state and receipts are persisted in one storage
//!    transaction, the tick counter advances, waiters are signalled, and
//!    committed messages are forwarded to the chain adapter (best-effort).
//!
//! Producers (signed payload submission, direct enqueue) run on arbitrary
//! threads against the shared inbox; everything else is single-writer on
//! the scheduler worker. A persistence failure in phase 4 is fatal: the
//! scheduler marks itself unhealthy, `wait_for_next_tick` starts returning
//! `false`, and the loop shuts down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use leyline_sign::{message_hash, AcceptAllVerifier, SignedPayload, Verifier};

use crate::adapter::{Adapter, TxMap};
use crate::config::WorldConfig;
use crate::context::EngineContext;
use crate::ecs::component::{Component, ComponentId, ComponentList, ComponentRegistry, ComponentSet};
use crate::ecs::world::WorldState;
use crate::error::{EngineError, EngineResult};
use crate::message::{
    MessageKindId, MessageQueue, MessageRegistry, MessageType, NonceTable, QueuedMessage,
};
use crate::persist::{
    column_key, encode_record, get_record, ArchetypeRecord, EntityRecord, SchemaRecord, Storage,
    KEY_ARCHETYPES, KEY_ENTITIES, KEY_INTAKE, KEY_NONCES, KEY_PERSONAS, KEY_RECEIPTS, KEY_SCHEMA,
    KEY_TICK,
};
use crate::persona::{
    CreatePersona, CreatePersonaResult, PersonaQuery, PersonaRegistry, CREATE_PERSONA_NAME,
};
use crate::receipt::{Receipt, ReceiptBuffer, ReceiptStore, StoredReceipt};

/// A registered system: invoked once per tick with the engine context.
pub type System = Box<dyn FnMut(&mut EngineContext<'_>) -> EngineResult<()> + Send>;

/// A registered query handler: read-only context plus raw request bytes.
pub type QueryHandler = Box<dyn Fn(&mut EngineContext<'_>, &[u8]) -> EngineResult<Vec<u8>> + Send>;

/// Producer-facing state shared between threads.
///
/// One mutex guards the pending queue, the nonce table and the persona
/// registry together; they are the only state touched from outside the
/// scheduler worker.
pub(crate) struct Inbox {
    pub queue: MessageQueue,
    pub nonces: NonceTable,
    pub personas: PersonaRegistry,
}

impl Inbox {
    fn new() -> Self {
        Self {
            queue: MessageQueue::new(),
            nonces: NonceTable::new(),
            personas: PersonaRegistry::new(),
        }
    }
}

#[derive(Default)]
struct SignalState {
    tick: u64,
    shutdown: bool,
}

/// Tick-completion signal shared between the scheduler and waiters.
pub(crate) struct TickSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl TickSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(SignalState::default()),
            cond: Condvar::new(),
        }
    }

    fn wait_for_next_tick(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        let seen = state.tick;
        while state.tick == seen && !state.shutdown {
            self.cond.wait(&mut state);
        }
        !state.shutdown
    }

    fn notify_tick(&self, tick: u64) {
        self.state.lock().tick = tick;
        self.cond.notify_all();
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.cond.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

/// Cloneable handle for blocking on tick completion.
#[derive(Clone)]
pub struct TickWaiter {
    signal: Arc<TickSignal>,
}

impl TickWaiter {
    /// Blocks until the next successful commit; returns `false` immediately
    /// and forever once the world has shut down.
    #[must_use]
    pub fn wait_for_next_tick(&self) -> bool {
        self.signal.wait_for_next_tick()
    }
}

/// Cloneable producer handle for submitting messages and reading results.
///
/// Obtain one with [`World::sender`] before handing the world to
/// [`World::start_game_loop`]; the handle stays valid while the loop runs.
#[derive(Clone)]
pub struct MessageSender {
    namespace: String,
    verify_disabled: bool,
    create_persona_kind: MessageKindId,
    inbox: Arc<Mutex<Inbox>>,
    receipts: Arc<Mutex<ReceiptStore>>,
    registry: Arc<RwLock<MessageRegistry>>,
    verifier: Arc<dyn Verifier>,
    current_tick: Arc<AtomicU64>,
}

impl MessageSender {
    /// Validates and enqueues a signed payload submitted as raw bytes.
    ///
    /// Validation order (first failure wins): namespace, persona
    /// resolution, nonce monotonicity, signature. A payload carrying a
    /// `create-persona` message is exempt from persona resolution; its
    /// signature is checked against the signer address it claims. On
    /// success the persona's nonce is atomically advanced and the message
    /// hash returned.
    pub fn enqueue_signed(&self, kind_id: MessageKindId, bytes: &[u8]) -> EngineResult<B256> {
        let payload = SignedPayload::from_bytes(bytes)?;
        self.enqueue_payload(kind_id, payload)
    }

    /// Validates and enqueues an already parsed signed payload.
    pub fn enqueue_payload(
        &self,
        kind_id: MessageKindId,
        payload: SignedPayload,
    ) -> EngineResult<B256> {
        {
            let registry = self.registry.read();
            let info = registry
                .get(kind_id)
                .ok_or_else(|| EngineError::UnknownMessageKind(format!("id {kind_id}")))?;
            info.check_body(&payload.body)?;
        }

        let is_create_persona = kind_id == self.create_persona_kind;
        let current_tick = self.current_tick.load(Ordering::SeqCst);

        let mut inbox = self.inbox.lock();
        let signer = if self.verify_disabled {
            Address::ZERO
        } else {
            if payload.namespace != self.namespace {
                return Err(EngineError::NamespaceMismatch {
                    got: payload.namespace,
                    want: self.namespace.clone(),
                });
            }
            let signer = if is_create_persona {
                let claim: CreatePersona = serde_json::from_slice(&payload.body)?;
                claim.signer_address
            } else {
                inbox
                    .personas
                    .signer_of(&payload.persona_tag, current_tick)
                    .ok_or_else(|| EngineError::UnknownPersona(payload.persona_tag.clone()))?
            };
            inbox.nonces.check(&payload.persona_tag, payload.nonce)?;
            if !self
                .verifier
                .verify(signer, &payload.body, &payload.signature)
            {
                return Err(EngineError::BadSignature(payload.persona_tag.clone()));
            }
            inbox.nonces.commit(&payload.persona_tag, payload.nonce);
            signer
        };

        let input = payload.body.clone();
        self.push_locked(&mut inbox, kind_id, payload, input, signer, None)
    }

    /// Enqueues a trusted message, bypassing verification.
    ///
    /// The signer is resolved from the payload's persona tag when one is
    /// committed, and left empty otherwise.
    pub(crate) fn enqueue_direct(
        &self,
        kind_id: MessageKindId,
        input: Vec<u8>,
        payload: SignedPayload,
        evm_tx_hash: Option<String>,
    ) -> EngineResult<B256> {
        if self.registry.read().get(kind_id).is_none() {
            return Err(EngineError::UnknownMessageKind(format!("id {kind_id}")));
        }
        let current_tick = self.current_tick.load(Ordering::SeqCst);
        let mut inbox = self.inbox.lock();
        let signer = inbox
            .personas
            .signer_of(&payload.persona_tag, current_tick)
            .unwrap_or(Address::ZERO);
        self.push_locked(&mut inbox, kind_id, payload, input, signer, evm_tx_hash)
    }

    fn push_locked(
        &self,
        inbox: &mut Inbox,
        kind: MessageKindId,
        payload: SignedPayload,
        input: Vec<u8>,
        signer: Address,
        evm_tx_hash: Option<String>,
    ) -> EngineResult<B256> {
        let tx_hash = message_hash(kind, &payload);
        if inbox.queue.contains_hash(tx_hash) || self.receipts.lock().contains(tx_hash) {
            return Err(EngineError::DuplicateTxHash(tx_hash.to_string()));
        }
        inbox.queue.push(QueuedMessage {
            kind,
            tx_hash,
            payload,
            input,
            signer,
            evm_tx_hash,
        });
        tracing::debug!(kind, tx_hash = %tx_hash, "message enqueued");
        Ok(tx_hash)
    }

    /// Reads a committed receipt without consuming it.
    #[must_use]
    pub fn read_results(&self, tx_hash: B256) -> Option<Receipt> {
        self.receipts.lock().get(tx_hash)
    }

    /// Consumes the receipt tagged with an external chain transaction
    /// hash. At-most-once: a second call returns `None`.
    #[must_use]
    pub fn consume_evm_result(&self, evm_tx_hash: &str) -> Option<Receipt> {
        self.receipts.lock().consume_evm(evm_tx_hash)
    }
}

/// An authoritative game world: registries, ECS state and the tick
/// scheduler, as a single owned value.
pub struct World {
    config: WorldConfig,
    components: ComponentRegistry,
    messages: Arc<RwLock<MessageRegistry>>,
    systems: Vec<System>,
    queries: HashMap<&'static str, QueryHandler>,
    state: WorldState,
    inbox: Arc<Mutex<Inbox>>,
    receipts: Arc<Mutex<ReceiptStore>>,
    store: Box<dyn Storage>,
    verifier: Arc<dyn Verifier>,
    adapter: Option<Box<dyn Adapter>>,
    signal: Arc<TickSignal>,
    tick_counter: Arc<AtomicU64>,
    create_persona_kind: MessageKindId,
    loaded: bool,
}

impl World {
    /// Creates a world over the given storage backend.
    ///
    /// The built-in `create-persona` message kind is registered here, so it
    /// is always kind 1.
    pub fn new(store: Box<dyn Storage>, config: WorldConfig) -> EngineResult<Self> {
        let mut messages = MessageRegistry::new();
        let create_persona_kind = messages.register::<CreatePersona>(CREATE_PERSONA_NAME, false)?;
        Ok(Self {
            receipts: Arc::new(Mutex::new(ReceiptStore::new(config.receipt_ttl))),
            config,
            components: ComponentRegistry::new(),
            messages: Arc::new(RwLock::new(messages)),
            systems: Vec::new(),
            queries: HashMap::new(),
            state: WorldState::new(),
            inbox: Arc::new(Mutex::new(Inbox::new())),
            store,
            verifier: Arc::new(AcceptAllVerifier),
            adapter: None,
            signal: Arc::new(TickSignal::new()),
            tick_counter: Arc::new(AtomicU64::new(0)),
            create_persona_kind,
            loaded: false,
        })
    }

    /// The world's namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// The current (next-to-execute) tick.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick_counter.load(Ordering::SeqCst)
    }

    /// Kind ID of the built-in `create-persona` message.
    #[must_use]
    pub const fn create_persona_kind(&self) -> MessageKindId {
        self.create_persona_kind
    }

    /// Installs the signature verifier consumed by payload validation.
    pub fn set_verifier(&mut self, verifier: Arc<dyn Verifier>) {
        self.verifier = verifier;
    }

    /// Installs the outbound chain adapter.
    pub fn set_adapter(&mut self, adapter: Box<dyn Adapter>) {
        self.adapter = Some(adapter);
    }

    /// Registers a component type.
    pub fn register_component<T: Component>(&mut self) -> EngineResult<ComponentId> {
        self.components.register::<T>()
    }

    /// The component registry, for metadata lookups by name or ID.
    #[must_use]
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Registers a message kind declared by a [`MessageType`] handle.
    pub fn register_message<In, Out>(
        &mut self,
        message: &MessageType<In, Out>,
    ) -> EngineResult<MessageKindId>
    where
        In: Serialize + DeserializeOwned + Send + Sync + 'static,
        Out: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let id = self
            .messages
            .write()
            .register::<In>(message.name(), message.evm_supported())?;
        message.bind(id)?;
        Ok(id)
    }

    /// Registers a system. Systems run once per tick, in registration
    /// order.
    pub fn register_system<F>(&mut self, system: F)
    where
        F: FnMut(&mut EngineContext<'_>) -> EngineResult<()> + Send + 'static,
    {
        self.systems.push(Box::new(system));
    }

    /// Registers a named query handler. Query handlers always receive a
    /// read-only context.
    pub fn register_query<F>(&mut self, name: &'static str, handler: F) -> EngineResult<()>
    where
        F: Fn(&mut EngineContext<'_>, &[u8]) -> EngineResult<Vec<u8>> + Send + 'static,
    {
        if self.loaded {
            return Err(EngineError::Frozen("query"));
        }
        if self.queries.contains_key(name) {
            return Err(EngineError::AlreadyRegistered(name.to_string()));
        }
        self.queries.insert(name, Box::new(handler));
        Ok(())
    }

    /// Dispatches a registered query against the last committed state.
    pub fn handle_query(&mut self, name: &str, request: &[u8]) -> EngineResult<Vec<u8>> {
        let tick = self.tick_counter.load(Ordering::SeqCst);
        let Self {
            queries,
            state,
            components,
            config,
            ..
        } = self;
        let handler = queries
            .get(name)
            .ok_or_else(|| EngineError::UnknownMessageKind(format!("query {name:?}")))?;
        let mut ctx =
            EngineContext::new(state, components, &config.namespace, tick, None, None, true);
        handler(&mut ctx, request)
    }

    /// Answers a persona-signer query as of `tick`.
    #[must_use]
    pub fn query_persona_signer(&self, persona_tag: &str, tick: i64) -> PersonaQuery {
        let current = self.tick_counter.load(Ordering::SeqCst);
        self.inbox.lock().personas.query(persona_tag, tick, current)
    }

    /// Returns a producer handle for enqueueing messages and reading
    /// receipts, valid across threads and while the game loop runs.
    #[must_use]
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            namespace: self.config.namespace.clone(),
            verify_disabled: self.config.disable_signature_verification,
            create_persona_kind: self.create_persona_kind,
            inbox: self.inbox.clone(),
            receipts: self.receipts.clone(),
            registry: self.messages.clone(),
            verifier: self.verifier.clone(),
            current_tick: self.tick_counter.clone(),
        }
    }

    /// Validates and enqueues a signed payload. See
    /// [`MessageSender::enqueue_signed`].
    pub fn enqueue_signed(&self, kind_id: MessageKindId, bytes: &[u8]) -> EngineResult<B256> {
        self.sender().enqueue_signed(kind_id, bytes)
    }

    /// Reads a committed receipt without consuming it.
    #[must_use]
    pub fn read_results(&self, tx_hash: B256) -> Option<Receipt> {
        self.receipts.lock().get(tx_hash)
    }

    /// Consumes the receipt tagged with an external chain transaction hash.
    #[must_use]
    pub fn consume_evm_result(&self, evm_tx_hash: &str) -> Option<Receipt> {
        self.receipts.lock().consume_evm(evm_tx_hash)
    }

    /// Resolves a tuple of component types to a [`ComponentSet`].
    pub fn component_set<L: ComponentList>(&self) -> EngineResult<ComponentSet> {
        Ok(ComponentSet::from_ids(L::component_ids(&self.components)?))
    }

    /// A mutable context over the world state, outside any tick.
    ///
    /// Intended for engine-owned callers and tests; game logic belongs in
    /// systems.
    pub fn context(&mut self) -> EngineContext<'_> {
        let tick = self.tick_counter.load(Ordering::SeqCst);
        EngineContext::new(
            &mut self.state,
            &self.components,
            &self.config.namespace,
            tick,
            None,
            None,
            false,
        )
    }

    /// Walks the structural ECS invariants. Test-facing.
    pub fn check_integrity(&self) -> EngineResult<()> {
        self.state.check_integrity()
    }

    /// Freezes the registries, validates persisted schemas, restores state
    /// and replays any intake'd-but-uncommitted messages.
    ///
    /// Must be called exactly once, before the first tick.
    pub fn load_game_state(&mut self) -> EngineResult<()> {
        if self.loaded {
            return Err(EngineError::Internal(
                "load_game_state called twice".to_string(),
            ));
        }
        self.components.freeze();
        self.messages.write().freeze();

        let schema = SchemaRecord {
            components: self.components.schema(),
            messages: self.messages.read().names(),
        };
        match get_record::<SchemaRecord>(self.store.as_ref(), KEY_SCHEMA)? {
            Some(persisted) => {
                self.components.validate_schema(&persisted.components)?;
                self.messages.read().validate_schema(&persisted.messages)?;
            }
            None => {
                let mut tx = self.store.begin()?;
                tx.put(KEY_SCHEMA, encode_record(&schema)?);
                tx.commit()
                    .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
            }
        }

        if let Some(tick) = get_record::<u64>(self.store.as_ref(), KEY_TICK)? {
            self.restore_state(tick)?;
        }

        // Crash recovery: an intake snapshot means a tick detached these
        // messages but never committed. Replay them, deduplicating by
        // message hash against the receipt store.
        if let Some(intake) = get_record::<MessageQueue>(self.store.as_ref(), KEY_INTAKE)? {
            let mut inbox = self.inbox.lock();
            let receipts = self.receipts.lock();
            let mut replayed = 0usize;
            for msg in intake.iter() {
                if !receipts.contains(msg.tx_hash) && !inbox.queue.contains_hash(msg.tx_hash) {
                    inbox.queue.push(msg.clone());
                    replayed += 1;
                }
            }
            if replayed > 0 {
                tracing::warn!(replayed, "recovered uncommitted intake messages");
            }
        }

        self.loaded = true;
        Ok(())
    }

    fn restore_state(&mut self, tick: u64) -> EngineResult<()> {
        let entity_record: EntityRecord = get_record(self.store.as_ref(), KEY_ENTITIES)?
            .ok_or_else(|| {
                EngineError::PersistenceFailure("tick present but entities missing".to_string())
            })?;
        let archetype_records: Vec<ArchetypeRecord> =
            get_record(self.store.as_ref(), KEY_ARCHETYPES)?.unwrap_or_default();

        {
            let Self { state, store, .. } = self;
            state.restore(entity_record.next_id, archetype_records, |aid, cid| {
                match store.get(&column_key(aid, cid))? {
                    Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                        EngineError::PersistenceFailure(format!(
                            "corrupt column {aid}/{cid}: {e}"
                        ))
                    })?)),
                    None => Ok(None),
                }
            })?;
        }

        {
            let mut inbox = self.inbox.lock();
            if let Some(nonces) = get_record(self.store.as_ref(), KEY_NONCES)? {
                inbox.nonces.restore(nonces);
            }
            if let Some(personas) = get_record(self.store.as_ref(), KEY_PERSONAS)? {
                inbox.personas.restore(personas);
            }
        }
        if let Some(receipts) = get_record::<Vec<StoredReceipt>>(self.store.as_ref(), KEY_RECEIPTS)?
        {
            self.receipts.lock().restore(receipts);
        }
        self.tick_counter.store(tick, Ordering::SeqCst);
        self.signal.notify_tick(tick);

        tracing::debug!(
            tick,
            entities = self.state.entities().len(),
            archetypes = self.state.archetypes().count(),
            "game state restored"
        );
        Ok(())
    }

    /// Runs one tick. Returns the new tick counter.
    ///
    /// Messages enqueued while the tick runs (including by systems) are
    /// deferred to the next tick: phase 1 detaches the pending queues, so
    /// later submissions land in a fresh pending set.
    pub fn tick(&mut self) -> EngineResult<u64> {
        if !self.loaded {
            return Err(EngineError::Internal(
                "load_game_state must be called before tick".to_string(),
            ));
        }
        let executing = self.tick_counter.load(Ordering::SeqCst);

        // Phase 1: intake.
        let working = {
            let mut inbox = self.inbox.lock();
            std::mem::take(&mut inbox.queue)
        };
        if let Err(error) = self.persist_intake(&working) {
            // The tick never ran; put the working set back and go unhealthy.
            let mut inbox = self.inbox.lock();
            for msg in working.iter() {
                inbox.queue.push(msg.clone());
            }
            drop(inbox);
            self.signal.shutdown();
            return Err(error);
        }
        let tx_map: TxMap = working.by_kind().clone();
        let manifest: Vec<(B256, Option<String>)> = working
            .iter()
            .map(|m| (m.tx_hash, m.evm_tx_hash.clone()))
            .collect();

        // Phase 2: execute.
        let mut queue = working;
        let mut receipts = ReceiptBuffer::new();
        for (tx_hash, evm_tx_hash) in &manifest {
            receipts.ensure(*tx_hash, evm_tx_hash.clone());
        }
        {
            let Self {
                systems,
                state,
                components,
                config,
                ..
            } = self;
            for (index, system) in systems.iter_mut().enumerate() {
                let mut ctx = EngineContext::new(
                    state,
                    components,
                    &config.namespace,
                    executing,
                    Some(&mut queue),
                    Some(&mut receipts),
                    false,
                );
                if let Err(error) = system(&mut ctx) {
                    tracing::warn!(system = index, %error, "system returned an error");
                }
            }
        }

        // Phase 3: persona commit.
        for msg in queue.take_all(self.create_persona_kind) {
            let outcome = serde_json::from_slice::<CreatePersona>(&msg.input)
                .map_err(|e| EngineError::Codec(format!("create-persona input: {e}")))
                .and_then(|claim| {
                    self.inbox
                        .lock()
                        .personas
                        .claim(&claim.persona_tag, claim.signer_address, executing)
                });
            match outcome {
                Ok(()) => {
                    if let Ok(bytes) = serde_json::to_vec(&CreatePersonaResult { success: true }) {
                        receipts.set_result(msg.tx_hash, bytes);
                    }
                }
                Err(error) => receipts.add_error(msg.tx_hash, error.to_string()),
            }
        }

        // Phase 4: commit.
        let committed = executing + 1;
        let (nonce_snapshot, persona_snapshot) = {
            let inbox = self.inbox.lock();
            (inbox.nonces.snapshot(), inbox.personas.snapshot())
        };
        let receipt_snapshot = {
            let mut store = self.receipts.lock();
            store.evict(committed);
            store.commit(executing, receipts.drain());
            store.snapshot()
        };
        if let Err(error) =
            self.persist_commit(committed, &nonce_snapshot, &persona_snapshot, &receipt_snapshot)
        {
            tracing::error!(%error, "tick commit failed; marking scheduler unhealthy");
            self.signal.shutdown();
            return Err(error);
        }
        self.tick_counter.store(committed, Ordering::SeqCst);
        self.signal.notify_tick(committed);
        tracing::debug!(tick = committed, messages = manifest.len(), "tick committed");

        // Forward committed messages to the adapter, best-effort.
        if let Some(adapter) = self.adapter.as_mut() {
            let unix_timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if let Err(error) =
                adapter.submit(&tx_map, &self.config.namespace, executing, unix_timestamp)
            {
                tracing::error!(%error, epoch = executing, "adapter submission failed");
            }
        }

        Ok(committed)
    }

    fn persist_intake(&self, working: &MessageQueue) -> EngineResult<()> {
        let mut tx = self
            .store
            .begin()
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        tx.put(KEY_INTAKE, encode_record(working)?);
        tx.commit()
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }

    fn persist_commit(
        &self,
        committed: u64,
        nonces: &std::collections::BTreeMap<String, u64>,
        personas: &[crate::persona::PersonaRecord],
        receipts: &[StoredReceipt],
    ) -> EngineResult<()> {
        let mut tx = self
            .store
            .begin()
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        tx.put(KEY_TICK, encode_record(&committed)?);
        tx.put(
            KEY_ENTITIES,
            encode_record(&EntityRecord {
                next_id: self.state.entities().next_id(),
            })?,
        );
        tx.put(KEY_ARCHETYPES, encode_record(&self.state.archetype_records())?);
        for arch in self.state.archetypes().iter() {
            for cid in arch.set().iter() {
                let column = arch.column(cid).ok_or_else(|| {
                    EngineError::Internal(format!(
                        "archetype {} lost column {cid}",
                        arch.id()
                    ))
                })?;
                tx.put(&column_key(arch.id(), cid), encode_record(&column.cells())?);
            }
        }
        tx.put(KEY_NONCES, encode_record(nonces)?);
        tx.put(KEY_PERSONAS, encode_record(&personas)?);
        tx.put(KEY_RECEIPTS, encode_record(&receipts)?);
        tx.delete(KEY_INTAKE);
        tx.commit()
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }

    /// Blocks until the next successful commit. See
    /// [`TickWaiter::wait_for_next_tick`].
    #[must_use]
    pub fn wait_for_next_tick(&self) -> bool {
        self.signal.wait_for_next_tick()
    }

    /// A cloneable waiter valid across threads.
    #[must_use]
    pub fn waiter(&self) -> TickWaiter {
        TickWaiter {
            signal: self.signal.clone(),
        }
    }

    /// Marks the world terminally shut down and wakes all waiters with
    /// `false`.
    pub fn shutdown(&self) {
        self.signal.shutdown();
    }

    /// Moves the world onto a worker thread driven by external pulses.
    ///
    /// Each value received on `start_rx` runs one tick; the new tick number
    /// is emitted on `done_tx`. Cancellation (via
    /// [`GameLoopHandle::shutdown`] or dropping the start sender) takes
    /// effect at tick boundaries. A failed tick stops the loop and marks
    /// the world shut down.
    pub fn start_game_loop(
        self,
        start_rx: Receiver<Instant>,
        done_tx: Sender<u64>,
    ) -> EngineResult<GameLoopHandle> {
        if !self.loaded {
            return Err(EngineError::Internal(
                "load_game_state must be called before start_game_loop".to_string(),
            ));
        }
        let signal = self.signal.clone();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let join = std::thread::Builder::new()
            .name("leyline-tick".to_string())
            .spawn(move || {
                let mut world = self;
                loop {
                    if world.signal.is_shutdown() {
                        break;
                    }
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(start_rx) -> pulse => {
                            if pulse.is_err() {
                                break;
                            }
                            match world.tick() {
                                Ok(tick) => {
                                    let _ = done_tx.send(tick);
                                }
                                Err(error) => {
                                    tracing::error!(%error, "tick failed; stopping game loop");
                                    break;
                                }
                            }
                        }
                    }
                }
                world.signal.shutdown();
                world
            })
            .map_err(|e| EngineError::Internal(format!("spawn game loop: {e}")))?;
        Ok(GameLoopHandle {
            signal,
            shutdown_tx,
            join,
        })
    }
}

/// Handle to a running game loop.
pub struct GameLoopHandle {
    signal: Arc<TickSignal>,
    shutdown_tx: Sender<()>,
    join: JoinHandle<World>,
}

impl GameLoopHandle {
    /// Blocks until the next successful commit; `false` after shutdown.
    #[must_use]
    pub fn wait_for_next_tick(&self) -> bool {
        self.signal.wait_for_next_tick()
    }

    /// A cloneable waiter valid across threads.
    #[must_use]
    pub fn waiter(&self) -> TickWaiter {
        TickWaiter {
            signal: self.signal.clone(),
        }
    }

    /// Requests shutdown. Takes effect at the next tick boundary; waiters
    /// are released with `false` immediately.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
        self.signal.shutdown();
    }

    /// Shuts down and returns the world once the loop thread exits.
    pub fn join(self) -> World {
        self.shutdown();
        match self.join.join() {
            Ok(world) => world,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
