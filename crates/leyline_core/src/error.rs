//! # Engine Error Types
//!
//! All errors that can surface from the engine core. Callers marshalling
//! results onto a network layer use [`EngineError::code`] for the numeric
//! status.

use thiserror::Error;

use crate::ecs::entity::EntityId;

/// Errors that can occur in the engine core.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Payload was signed for a different world.
    #[error("namespace mismatch: payload signed for {got:?}, world is {want:?}")]
    NamespaceMismatch {
        /// Namespace carried by the payload.
        got: String,
        /// Namespace of this world.
        want: String,
    },

    /// Signature did not verify against the persona's signer address.
    #[error("bad signature for persona {0:?}")]
    BadSignature(String),

    /// Nonce is not strictly greater than the last accepted nonce.
    #[error("stale nonce for persona {persona_tag:?}: got {got}, last seen {last_seen}")]
    StaleNonce {
        /// Persona the payload claims.
        persona_tag: String,
        /// Nonce carried by the payload.
        got: u64,
        /// Highest nonce accepted so far.
        last_seen: u64,
    },

    /// Persona tag does not resolve to a committed signer.
    #[error("unknown persona {0:?}")]
    UnknownPersona(String),

    /// Persona tag is already bound to a signer.
    #[error("persona tag {0:?} already claimed")]
    DuplicatePersona(String),

    /// Message kind is not registered.
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(String),

    /// Component is not registered.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// A registration used an existing name with a different schema.
    #[error("{0:?} is already registered with a different schema")]
    AlreadyRegistered(String),

    /// The entity already carries this component.
    #[error("component {component:?} already on entity {entity}")]
    ComponentAlreadyOnEntity {
        /// Component name.
        component: String,
        /// The entity.
        entity: EntityId,
    },

    /// The entity does not carry this component.
    #[error("component {component:?} not on entity {entity}")]
    ComponentNotOnEntity {
        /// Component name.
        component: String,
        /// The entity.
        entity: EntityId,
    },

    /// No live entity with this ID.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// A mutation was attempted through a read-only context.
    #[error("cannot modify state with a read-only context")]
    ReadOnlyContext,

    /// Persisted schema does not match the registered one.
    #[error("persisted schema is incompatible: {0}")]
    SchemaIncompatible(String),

    /// Registration attempted after the world started.
    #[error("{0} registry is frozen; register before load_game_state")]
    Frozen(&'static str),

    /// A message with this hash is already queued or receipted.
    #[error("duplicate transaction hash {0}")]
    DuplicateTxHash(String),

    /// Forwarding committed messages to the chain adapter failed.
    #[error("adapter submission failed: {0}")]
    AdapterFailure(String),

    /// The storage transaction for a tick commit failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Encoding or decoding a component/message payload failed.
    #[error("codec failure: {0}")]
    Codec(String),

    /// Invariant violation inside the engine.
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Numeric status code for network marshalling.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::NamespaceMismatch { .. }
            | Self::BadSignature(_)
            | Self::StaleNonce { .. }
            | Self::UnknownPersona(_)
            | Self::DuplicatePersona(_) => 401,
            Self::ReadOnlyContext => 403,
            Self::UnknownMessageKind(_)
            | Self::UnknownEntity(_)
            | Self::UnknownComponent(_)
            | Self::ComponentNotOnEntity { .. } => 404,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<leyline_sign::SignError> for EngineError {
    fn from(err: leyline_sign::SignError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            EngineError::NamespaceMismatch {
                got: "a".into(),
                want: "b".into()
            }
            .code(),
            401
        );
        assert_eq!(EngineError::BadSignature("p".into()).code(), 401);
        assert_eq!(
            EngineError::StaleNonce {
                persona_tag: "p".into(),
                got: 1,
                last_seen: 1
            }
            .code(),
            401
        );
        assert_eq!(EngineError::UnknownMessageKind("m".into()).code(), 404);
        assert_eq!(EngineError::UnknownEntity(EntityId(7)).code(), 404);
        assert_eq!(EngineError::ReadOnlyContext.code(), 403);
        assert_eq!(EngineError::SchemaIncompatible("x".into()).code(), 500);
        assert_eq!(EngineError::Internal("x".into()).code(), 500);
    }
}
