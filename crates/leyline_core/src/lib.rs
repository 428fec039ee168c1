//! # Leyline Core Engine
//!
//! An archetype ECS fused with a deterministic tick scheduler, built to
//! back authoritative multiplayer world simulations:
//!
//! - Every mutation flows through the signed message pipeline and is
//!   ordered by the tick scheduler; there are no side doors into state.
//! - Entities sharing a component set live together in archetype columns;
//!   searches match at archetype granularity and cache their matches.
//! - A tick commits atomically through the persistence boundary; receipts
//!   become visible only after the commit.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut world = World::new(Box::new(MemoryStore::new()), WorldConfig::new("my-world"))?;
//! world.register_component::<Health>()?;
//! world.register_message(&ATTACK_MSG)?;
//! world.register_system(|ctx| ATTACK_MSG.each(ctx, handle_attack));
//! world.load_game_state()?;
//! world.tick()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]

pub mod adapter;
pub mod config;
pub mod context;
pub mod ecs;
pub mod error;
pub mod message;
pub mod persist;
pub mod persona;
pub mod receipt;
pub mod world;

pub use adapter::{Adapter, AdapterError, TxMap};
pub use config::WorldConfig;
pub use context::EngineContext;
pub use ecs::{
    ArchetypeId, Component, ComponentBundle, ComponentId, ComponentList, ComponentSet, EntityId,
    Filter, Search,
};
pub use error::{EngineError, EngineResult};
pub use message::{MessageKindId, MessageType, TxData};
pub use persist::{MemoryStore, Storage, StorageTx};
pub use persona::{CreatePersona, CreatePersonaResult, PersonaQuery, PersonaStatus};
pub use receipt::Receipt;
pub use world::{GameLoopHandle, MessageSender, TickWaiter, World};

pub use leyline_sign::{message_hash, AcceptAllVerifier, SignedPayload, Verifier};
