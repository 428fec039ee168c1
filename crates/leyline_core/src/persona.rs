//! # Persona Registry
//!
//! A persona is a human-readable identity bound to a cryptographic signer
//! address. The binding is itself a message ([`CreatePersona`]) flowing
//! through the normal pipeline, applied at the end of the tick that carries
//! it: queries against earlier ticks report the tag as not yet assigned,
//! and signed payloads can only resolve the signer once the claiming tick
//! has committed. A tag, once committed, is never re-bound.

use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Name of the built-in persona-claim message kind.
pub const CREATE_PERSONA_NAME: &str = "create-persona";

/// Input of the built-in persona-claim message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePersona {
    /// Tag being claimed.
    pub persona_tag: String,
    /// Signer address the tag will be bound to.
    pub signer_address: Address,
}

/// Output of the built-in persona-claim message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePersonaResult {
    /// True if the tag was unclaimed and is now bound.
    pub success: bool,
}

/// A committed persona binding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaRecord {
    /// The claimed tag.
    pub persona_tag: String,
    /// Signer address bound to the tag.
    pub signer_address: Address,
    /// Tick whose system phase carried the claim.
    pub created_at_tick: u64,
    /// First tick at which the binding is visible to payload validation.
    pub committed_at_tick: u64,
}

/// Assignment status reported by a persona query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersonaStatus {
    /// The tag is bound and was bound as of the queried tick.
    Assigned,
    /// Nothing can be said for the queried tick.
    Unknown,
    /// The tag was provably unclaimed as of the queried tick.
    Available,
}

/// Response of a persona-signer query.
#[derive(Clone, Debug)]
pub struct PersonaQuery {
    /// Assignment status as of the queried tick.
    pub status: PersonaStatus,
    /// Bound signer address, when `status` is `Assigned`.
    pub signer_address: Option<Address>,
    /// The tick the query was evaluated against.
    pub tick: i64,
}

/// Maps persona tags to signer addresses.
#[derive(Debug, Default)]
pub struct PersonaRegistry {
    by_tag: HashMap<String, PersonaRecord>,
}

impl PersonaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a tag during tick `current_tick`.
    ///
    /// The binding becomes visible to payload validation one tick later.
    /// Fails with `DuplicatePersona` if the tag is already claimed.
    pub fn claim(
        &mut self,
        persona_tag: &str,
        signer_address: Address,
        current_tick: u64,
    ) -> EngineResult<()> {
        if self.by_tag.contains_key(persona_tag) {
            return Err(EngineError::DuplicatePersona(persona_tag.to_string()));
        }
        self.by_tag.insert(
            persona_tag.to_string(),
            PersonaRecord {
                persona_tag: persona_tag.to_string(),
                signer_address,
                created_at_tick: current_tick,
                committed_at_tick: current_tick + 1,
            },
        );
        Ok(())
    }

    /// Resolves the signer for payload validation.
    ///
    /// Only bindings whose claiming tick has committed are visible.
    #[must_use]
    pub fn signer_of(&self, persona_tag: &str, current_tick: u64) -> Option<Address> {
        self.by_tag
            .get(persona_tag)
            .filter(|r| current_tick >= r.committed_at_tick)
            .map(|r| r.signer_address)
    }

    /// Answers `query_persona_signer(tag, tick)`.
    ///
    /// - `Assigned` when the tag is committed and was created at or before
    ///   the queried tick.
    /// - `Unknown` when the tag exists but the queried tick predates it, or
    ///   when the queried tick has not completed yet (no future claim can
    ///   be ruled out).
    /// - `Available` when the tag is unrecorded and the queried tick lies
    ///   strictly before the current one.
    #[must_use]
    pub fn query(&self, persona_tag: &str, tick: i64, current_tick: u64) -> PersonaQuery {
        if let Some(record) = self.by_tag.get(persona_tag) {
            if current_tick >= record.committed_at_tick && tick >= record.created_at_tick as i64 {
                return PersonaQuery {
                    status: PersonaStatus::Assigned,
                    signer_address: Some(record.signer_address),
                    tick,
                };
            }
            return PersonaQuery {
                status: PersonaStatus::Unknown,
                signer_address: None,
                tick,
            };
        }
        let status = if tick < current_tick as i64 {
            PersonaStatus::Available
        } else {
            PersonaStatus::Unknown
        };
        PersonaQuery {
            status,
            signer_address: None,
            tick,
        }
    }

    /// Number of committed bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// True if no tag is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// All records, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PersonaRecord> {
        let mut out: Vec<_> = self.by_tag.values().cloned().collect();
        out.sort_by_key(|r| r.committed_at_tick);
        out
    }

    /// Rebuilds the registry from persisted records.
    pub fn restore(&mut self, records: Vec<PersonaRecord>) {
        self.by_tag = records
            .into_iter()
            .map(|r| (r.persona_tag.clone(), r))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_resolve_visibility() {
        let mut reg = PersonaRegistry::new();
        let addr = Address::repeat_byte(7);
        reg.claim("CoolMage", addr, 4).unwrap();

        // Not visible during the claiming tick.
        assert_eq!(reg.signer_of("CoolMage", 4), None);
        // Visible from the next tick on.
        assert_eq!(reg.signer_of("CoolMage", 5), Some(addr));
    }

    #[test]
    fn test_tag_cannot_be_rebound() {
        let mut reg = PersonaRegistry::new();
        reg.claim("mage", Address::repeat_byte(1), 0).unwrap();
        let err = reg.claim("mage", Address::repeat_byte(2), 3).unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePersona(_)));
        assert_eq!(reg.signer_of("mage", 10), Some(Address::repeat_byte(1)));
    }

    #[test]
    fn test_query_statuses() {
        let mut reg = PersonaRegistry::new();
        let addr = Address::repeat_byte(9);

        // Unrecorded tag, tick in the past: provably available.
        let q = reg.query("other", -100, 4);
        assert_eq!(q.status, PersonaStatus::Available);

        // Unrecorded tag, tick not completed yet: unknown.
        let q = reg.query("other", 4, 4);
        assert_eq!(q.status, PersonaStatus::Unknown);

        reg.claim("mage", addr, 4).unwrap();

        // Claim carried by tick 4, but tick 4 not committed: unknown.
        let q = reg.query("mage", 4, 4);
        assert_eq!(q.status, PersonaStatus::Unknown);

        // After commit, queries at the claiming tick see the binding.
        let q = reg.query("mage", 4, 5);
        assert_eq!(q.status, PersonaStatus::Assigned);
        assert_eq!(q.signer_address, Some(addr));

        // Queries before the claiming tick report unknown.
        let q = reg.query("mage", 3, 5);
        assert_eq!(q.status, PersonaStatus::Unknown);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut reg = PersonaRegistry::new();
        reg.claim("a", Address::repeat_byte(1), 0).unwrap();
        reg.claim("b", Address::repeat_byte(2), 1).unwrap();

        let mut restored = PersonaRegistry::new();
        restored.restore(reg.snapshot());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.signer_of("b", 2), Some(Address::repeat_byte(2)));
    }
}
