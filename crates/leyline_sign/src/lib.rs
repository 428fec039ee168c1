//! # Signed Payload Envelope
//!
//! Every mutation submitted to a leyline world arrives wrapped in a
//! [`SignedPayload`]: a persona tag, the target world's namespace, a
//! monotonic nonce, a signature over the body, and the opaque message body
//! itself. The namespace binds a payload to exactly one world, which is what
//! prevents cross-world replay of otherwise valid signatures.
//!
//! The actual cryptography lives behind the [`Verifier`] trait. The engine
//! only ever asks "does this signature check out for this address?" and
//! never touches key material.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]

use alloy_primitives::{keccak256, Address, B256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or encoding payload envelopes.
#[derive(Error, Debug)]
pub enum SignError {
    /// The envelope bytes were not a valid JSON payload.
    #[error("malformed signed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A signed mutation envelope.
///
/// The `body` is an opaque byte string: the engine decodes it against the
/// codec of the message kind it was enqueued for. `(persona_tag, namespace,
/// nonce)` must be strictly increasing per persona within a namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    /// Human-readable identity claiming this payload.
    pub persona_tag: String,
    /// Namespace of the world this payload is addressed to.
    pub namespace: String,
    /// Per-persona monotonic nonce.
    pub nonce: u64,
    /// Signature over `body`, verified against the persona's signer address.
    pub signature: Vec<u8>,
    /// Encoded message body.
    pub body: Vec<u8>,
}

impl SignedPayload {
    /// Creates a new envelope.
    #[must_use]
    pub fn new(
        persona_tag: impl Into<String>,
        namespace: impl Into<String>,
        nonce: u64,
        signature: Vec<u8>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            persona_tag: persona_tag.into(),
            namespace: namespace.into(),
            nonce,
            signature,
            body,
        }
    }

    /// Parses an envelope from its JSON wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the envelope to its JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SignError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Computes the deterministic hash identifying a message.
///
/// The hash covers the message kind, the persona tag, the namespace, the
/// nonce, and the body. Two submissions differing in any of these produce
/// different hashes; a byte-identical resubmission produces the same hash,
/// which is what the receipt store uses for replay deduplication.
#[must_use]
pub fn message_hash(kind_id: u32, payload: &SignedPayload) -> B256 {
    let mut buf = Vec::with_capacity(
        4 + 8 + payload.persona_tag.len() + payload.namespace.len() + payload.body.len() + 2,
    );
    buf.extend_from_slice(&kind_id.to_le_bytes());
    buf.extend_from_slice(payload.persona_tag.as_bytes());
    buf.push(0);
    buf.extend_from_slice(payload.namespace.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&payload.nonce.to_le_bytes());
    buf.extend_from_slice(&payload.body);
    keccak256(&buf)
}

/// Signature verification seam.
///
/// The engine consumes this as a black box: implementations may wrap any
/// curve or signing scheme. Returning `false` rejects the payload with a
/// `BadSignature` error before it reaches any queue.
pub trait Verifier: Send + Sync {
    /// Returns `true` if `signature` is valid for `message` under `address`.
    fn verify(&self, address: Address, message: &[u8], signature: &[u8]) -> bool;
}

/// A verifier that accepts every signature.
///
/// Used when signature verification is disabled (test mode) and as the
/// default until a real verifier is installed.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllVerifier;

impl Verifier for AcceptAllVerifier {
    fn verify(&self, _address: Address, _message: &[u8], _signature: &[u8]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let payload = SignedPayload::new("CoolMage", "world-1", 42, vec![1, 2, 3], b"{}".to_vec());
        let bytes = payload.to_bytes().unwrap();
        let parsed = SignedPayload::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_message_hash_is_deterministic() {
        let payload = SignedPayload::new("mage", "ns", 7, vec![], b"body".to_vec());
        assert_eq!(message_hash(3, &payload), message_hash(3, &payload));
    }

    #[test]
    fn test_message_hash_covers_every_field() {
        let base = SignedPayload::new("mage", "ns", 7, vec![], b"body".to_vec());
        let h = message_hash(3, &base);

        let mut other = base.clone();
        other.nonce = 8;
        assert_ne!(message_hash(3, &other), h);

        let mut other = base.clone();
        other.persona_tag = "magf".into();
        assert_ne!(message_hash(3, &other), h);

        let mut other = base.clone();
        other.namespace = "nt".into();
        assert_ne!(message_hash(3, &other), h);

        let mut other = base.clone();
        other.body = b"bodz".to_vec();
        assert_ne!(message_hash(3, &other), h);

        assert_ne!(message_hash(4, &base), h);
    }

    #[test]
    fn test_hash_separates_tag_and_namespace() {
        // "ab" + "c" must not collide with "a" + "bc".
        let left = SignedPayload::new("ab", "c", 0, vec![], vec![]);
        let right = SignedPayload::new("a", "bc", 0, vec![], vec![]);
        assert_ne!(message_hash(1, &left), message_hash(1, &right));
    }

    #[test]
    fn test_accept_all_verifier() {
        let v = AcceptAllVerifier;
        assert!(v.verify(Address::ZERO, b"anything", b"sig"));
    }
}
