//! # Receipt Store
//!
//! Every message processed by a tick produces exactly one receipt: the
//! encoded result of its handler (possibly empty) plus any errors it
//! raised. Receipts become visible only after their tick commits.
//!
//! Receipts tagged with an external chain transaction hash are additionally
//! indexed by that hash so the chain-facing caller can collect them with
//! at-most-once semantics ([`ReceiptStore::consume_evm`]). Untagged
//! receipts are read non-destructively and age out after a configured
//! number of ticks.

use std::collections::HashMap;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// The committed outcome of one message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash identifying the message.
    pub tx_hash: B256,
    /// External chain transaction hash, if the message carried one.
    pub evm_tx_hash: Option<String>,
    /// Encoded handler result; empty when the handler failed or the
    /// message was never picked up by a system.
    pub result: Vec<u8>,
    /// Errors raised while processing the message.
    pub errors: Vec<String>,
}

impl Receipt {
    fn new(tx_hash: B256, evm_tx_hash: Option<String>) -> Self {
        Self {
            tx_hash,
            evm_tx_hash,
            result: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Receipts accumulated during a single tick, before commit.
#[derive(Debug, Default)]
pub struct ReceiptBuffer {
    by_hash: HashMap<B256, Receipt>,
    order: Vec<B256>,
}

impl ReceiptBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarantees a receipt exists for `tx_hash`.
    pub fn ensure(&mut self, tx_hash: B256, evm_tx_hash: Option<String>) {
        if !self.by_hash.contains_key(&tx_hash) {
            self.order.push(tx_hash);
            self.by_hash
                .insert(tx_hash, Receipt::new(tx_hash, evm_tx_hash));
        }
    }

    /// Records the encoded result for a message.
    pub fn set_result(&mut self, tx_hash: B256, result: Vec<u8>) {
        self.ensure(tx_hash, None);
        if let Some(receipt) = self.by_hash.get_mut(&tx_hash) {
            receipt.result = result;
        }
    }

    /// Appends an error to a message's receipt.
    pub fn add_error(&mut self, tx_hash: B256, error: impl Into<String>) {
        self.ensure(tx_hash, None);
        if let Some(receipt) = self.by_hash.get_mut(&tx_hash) {
            receipt.errors.push(error.into());
        }
    }

    /// Drains the buffer in first-touched order.
    pub fn drain(&mut self) -> Vec<Receipt> {
        let mut out = Vec::with_capacity(self.order.len());
        for hash in self.order.drain(..) {
            if let Some(receipt) = self.by_hash.remove(&hash) {
                out.push(receipt);
            }
        }
        out
    }
}

/// A committed receipt together with the tick that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredReceipt {
    /// Tick at which the receipt was committed.
    pub tick: u64,
    /// The receipt itself.
    pub receipt: Receipt,
}

/// Committed receipts, keyed by message hash.
#[derive(Debug)]
pub struct ReceiptStore {
    ttl: u64,
    by_hash: HashMap<B256, StoredReceipt>,
    by_evm: HashMap<String, B256>,
}

impl ReceiptStore {
    /// Creates a store evicting receipts older than `ttl` ticks.
    #[must_use]
    pub fn new(ttl: u64) -> Self {
        Self {
            ttl,
            by_hash: HashMap::new(),
            by_evm: HashMap::new(),
        }
    }

    /// True if a receipt for this hash is live.
    ///
    /// Used by the enqueue path to keep receipt keys unique and to drop
    /// replayed messages during crash recovery.
    #[must_use]
    pub fn contains(&self, tx_hash: B256) -> bool {
        self.by_hash.contains_key(&tx_hash)
    }

    /// Reads a receipt without consuming it.
    #[must_use]
    pub fn get(&self, tx_hash: B256) -> Option<Receipt> {
        self.by_hash.get(&tx_hash).map(|s| s.receipt.clone())
    }

    /// Removes and returns the receipt tagged with an external chain hash.
    ///
    /// At-most-once: a second call for the same hash returns `None`.
    pub fn consume_evm(&mut self, evm_tx_hash: &str) -> Option<Receipt> {
        let tx_hash = self.by_evm.remove(evm_tx_hash)?;
        self.by_hash.remove(&tx_hash).map(|s| s.receipt)
    }

    /// Publishes a tick's receipts.
    pub fn commit(&mut self, tick: u64, receipts: Vec<Receipt>) {
        for receipt in receipts {
            if self.by_hash.contains_key(&receipt.tx_hash) {
                // Enqueue-time dedup should make this unreachable.
                tracing::warn!(tx_hash = %receipt.tx_hash, "dropping receipt with duplicate key");
                continue;
            }
            if let Some(evm) = &receipt.evm_tx_hash {
                self.by_evm.insert(evm.clone(), receipt.tx_hash);
            }
            self.by_hash.insert(receipt.tx_hash, StoredReceipt { tick, receipt });
        }
    }

    /// Evicts receipts older than the TTL, relative to `current_tick`.
    pub fn evict(&mut self, current_tick: u64) {
        let horizon = current_tick.saturating_sub(self.ttl);
        self.by_hash.retain(|_, stored| stored.tick >= horizon);
        let by_hash = &self.by_hash;
        self.by_evm.retain(|_, tx_hash| by_hash.contains_key(tx_hash));
    }

    /// All live receipts, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredReceipt> {
        let mut out: Vec<_> = self.by_hash.values().cloned().collect();
        out.sort_by_key(|s| (s.tick, s.receipt.tx_hash));
        out
    }

    /// Rebuilds the store from persisted receipts.
    pub fn restore(&mut self, receipts: Vec<StoredReceipt>) {
        self.by_hash.clear();
        self.by_evm.clear();
        for stored in receipts {
            if let Some(evm) = &stored.receipt.evm_tx_hash {
                self.by_evm.insert(evm.clone(), stored.receipt.tx_hash);
            }
            self.by_hash.insert(stored.receipt.tx_hash, stored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    #[test]
    fn test_buffer_ensures_one_receipt_per_message() {
        let mut buf = ReceiptBuffer::new();
        buf.ensure(hash(1), Some("0xFoo".into()));
        buf.set_result(hash(1), b"out".to_vec());
        buf.add_error(hash(1), "late failure");
        buf.ensure(hash(1), None);

        let receipts = buf.drain();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].evm_tx_hash.as_deref(), Some("0xFoo"));
        assert_eq!(receipts[0].result, b"out");
        assert_eq!(receipts[0].errors, vec!["late failure".to_string()]);
    }

    #[test]
    fn test_consume_is_at_most_once() {
        let mut store = ReceiptStore::new(10);
        let mut buf = ReceiptBuffer::new();
        buf.ensure(hash(2), Some("0xBar".into()));
        store.commit(0, buf.drain());

        assert!(store.contains(hash(2)));
        assert!(store.consume_evm("0xBar").is_some());
        assert!(store.consume_evm("0xBar").is_none());
        assert!(!store.contains(hash(2)));
    }

    #[test]
    fn test_get_is_non_destructive() {
        let mut store = ReceiptStore::new(10);
        let mut buf = ReceiptBuffer::new();
        buf.set_result(hash(3), b"x".to_vec());
        store.commit(0, buf.drain());

        assert!(store.get(hash(3)).is_some());
        assert!(store.get(hash(3)).is_some());
    }

    #[test]
    fn test_ttl_eviction() {
        let mut store = ReceiptStore::new(2);
        let mut buf = ReceiptBuffer::new();
        buf.ensure(hash(4), Some("0xOld".into()));
        store.commit(0, buf.drain());

        store.evict(2);
        assert!(store.contains(hash(4)));

        store.evict(3);
        assert!(!store.contains(hash(4)));
        assert!(store.consume_evm("0xOld").is_none());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut store = ReceiptStore::new(10);
        let mut buf = ReceiptBuffer::new();
        buf.ensure(hash(5), Some("0xE".into()));
        buf.set_result(hash(6), b"r".to_vec());
        store.commit(3, buf.drain());

        let snapshot = store.snapshot();
        let mut restored = ReceiptStore::new(10);
        restored.restore(snapshot);
        assert_eq!(restored.get(hash(6)).unwrap().result, b"r");
        assert!(restored.consume_evm("0xE").is_some());
    }
}
