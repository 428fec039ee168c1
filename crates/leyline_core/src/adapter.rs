//! # Chain Adapter Seam
//!
//! After a tick commits, its messages are forwarded to an optional adapter
//! that relays them to an external chain. The call is best-effort: a
//! failing adapter is logged and surfaced through telemetry, but the tick
//! stays committed.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::message::{MessageKindId, QueuedMessage};

/// Committed messages of one tick, grouped per kind.
pub type TxMap = BTreeMap<MessageKindId, Vec<QueuedMessage>>;

/// Errors an adapter may report.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The external chain rejected or failed the submission.
    #[error("submission failed: {0}")]
    Submission(String),
}

/// Outbound adapter forwarding committed messages to an external chain.
pub trait Adapter: Send {
    /// Submits one tick's messages.
    ///
    /// `epoch` is the tick that executed the messages and `unix_timestamp`
    /// the wall-clock second of its commit.
    fn submit(
        &mut self,
        txs: &TxMap,
        namespace: &str,
        epoch: u64,
        unix_timestamp: u64,
    ) -> Result<(), AdapterError>;
}
