//! # tandem-collab — Real-time synchronization for collaborative schedules
//!
//! A WebSocket relay that lets any number of editors in a named room mutate
//! one replicated document and see each other's changes live, with periodic
//! full-state snapshots to RocksDB for durability across restarts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ RelayServer │
//! │ (replica)   │   opaque updates    │             │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ MergeEngine │                     │ RoomRegistry│
//! │ (local doc) │                     │  per-room:  │
//! └─────────────┘                     │  Document   │
//!                                     │  Broadcast  │
//!                                     │  Snapshot   │
//!                                     │  Timer ─────┼──► SnapshotStore
//!                                     └─────────────┘      (RocksDB)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — `/sync` upgrade path, room selection, frame validation
//! - [`engine`] — merge-engine seam; [`YrsEngine`] is the default
//! - [`broadcast`] — per-room fan-out with origin-tagged frames
//! - [`room`] — rooms and the lazily-populated registry
//! - [`saver`] — cancelable per-room snapshot timers
//! - [`storage`] — snapshot store trait and the RocksDB implementation
//! - [`server`] — the relay itself
//! - [`client`] — client-side synchronization stub
//!
//! Updates are opaque to every module except the engine: the relay
//! validates, applies, and forwards byte blobs without ever interpreting
//! them, so the replication algorithm can be swapped behind [`MergeEngine`].

pub mod broadcast;
pub mod client;
pub mod engine;
pub mod protocol;
pub mod room;
pub mod saver;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, ConnInfo, Frame};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use engine::{MergeEngine, MergeError, YrsEngine};
pub use protocol::{ProtocolError, DEFAULT_ROOM, SYNC_PATH};
pub use room::{Room, RoomRegistry};
pub use saver::SnapshotTimer;
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use storage::{RocksStore, SnapshotMetadata, SnapshotStore, StoreConfig, StoreError};
