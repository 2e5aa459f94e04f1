//! Merge-engine seam between the relay and the CRDT implementation.
//!
//! The relay never interprets update payloads. Everything it does with a
//! document — creating it, folding an update into it, serializing it for a
//! snapshot — goes through [`MergeEngine`]. The default engine is
//! [`YrsEngine`], backed by the `yrs` CRDT crate; swapping the replication
//! algorithm means implementing this trait, nothing else.

use yrs::updates::decoder::Decode;
use yrs::{ReadTxn, Transact};

/// Conflict-free merge of opaque update blobs into a document.
///
/// Contract: `apply` must be commutative and idempotent across updates, and
/// `encode` must produce a full-state blob that `apply` accepts as an
/// ordinary update (snapshots are replayed through the same path).
pub trait MergeEngine: Send + Sync + 'static {
    /// Replicated document state owned by one room.
    type Doc: Send + Sync + 'static;

    /// Create an empty document.
    fn new_doc(&self) -> Self::Doc;

    /// Fold an update blob into the document.
    ///
    /// A rejected update must leave the document unchanged.
    fn apply(&self, doc: &mut Self::Doc, update: &[u8]) -> Result<(), MergeError>;

    /// Serialize the document's full current state.
    fn encode(&self, doc: &Self::Doc) -> Vec<u8>;
}

/// Update rejected by the merge engine.
#[derive(Debug, Clone)]
pub enum MergeError {
    /// Payload could not be decoded as an update
    MalformedUpdate(String),
    /// Decoded update could not be integrated
    ApplyFailed(String),
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedUpdate(e) => write!(f, "Malformed update: {e}"),
            Self::ApplyFailed(e) => write!(f, "Update apply failed: {e}"),
        }
    }
}

impl std::error::Error for MergeError {}

/// Default engine: Yrs documents, v1 update encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct YrsEngine;

impl MergeEngine for YrsEngine {
    type Doc = yrs::Doc;

    fn new_doc(&self) -> yrs::Doc {
        yrs::Doc::new()
    }

    fn apply(&self, doc: &mut yrs::Doc, update: &[u8]) -> Result<(), MergeError> {
        let update = yrs::Update::decode_v1(update)
            .map_err(|e| MergeError::MalformedUpdate(e.to_string()))?;
        let mut txn = doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| MergeError::ApplyFailed(e.to_string()))
    }

    fn encode(&self, doc: &yrs::Doc) -> Vec<u8> {
        let txn = doc.transact();
        txn.encode_state_as_update_v1(&yrs::StateVector::default())
    }
}
