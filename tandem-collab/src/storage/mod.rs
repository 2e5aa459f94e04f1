//! Durable snapshot storage, one blob per room.
//!
//! The relay persists each room as a single full-state snapshot keyed by the
//! room name; `save` always overwrites the previous snapshot wholesale.
//! There is no append log — the merge engine's full-state encoding is the
//! unit of durability.
//!
//! [`SnapshotStore`] is the seam the scheduler and registry talk to;
//! [`RocksStore`] is the production implementation (RocksDB, LZ4-compressed
//! snapshots, bincode-encoded per-room metadata).

pub mod rocks;

pub use rocks::{RocksStore, SnapshotMetadata, StoreConfig, StoreError};

/// Durable key-value storage for room snapshots.
///
/// Implementations must be callable from any task; the relay invokes them
/// from per-room scheduler tasks and from registry hydration.
pub trait SnapshotStore: Send + Sync {
    /// Load the persisted snapshot for a room, `None` if the room has never
    /// been saved.
    fn load(&self, room: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Persist a room's full state, replacing any previous snapshot.
    fn save(&self, room: &str, snapshot: &[u8]) -> Result<(), StoreError>;

    /// All room names with a persisted snapshot.
    fn rooms(&self) -> Result<Vec<String>, StoreError>;
}
