//! Fan-out of update frames to the other connections in a room.
//!
//! Each room owns one bounded tokio broadcast channel; every connection gets
//! an independent receiver buffering up to `capacity` frames. Frames carry
//! the originating connection id so receivers can drop their own traffic
//! without ever inspecting the opaque payload. A slow peer lags and drops
//! frames on its own receiver only — it cannot stall the sender or the other
//! peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// One relayed frame: the raw update bytes plus the connection that sent it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Connection the update arrived on (receivers skip their own)
    pub origin: Uuid,
    /// Opaque update payload, shared across all receivers
    pub bytes: Arc<Vec<u8>>,
}

/// Identity of one attached connection, for bookkeeping and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    pub conn_id: Uuid,
    /// Remote address (or a test label)
    pub addr: String,
}

impl ConnInfo {
    pub fn new(conn_id: Uuid, addr: impl Into<String>) -> Self {
        Self {
            conn_id,
            addr: addr.into(),
        }
    }
}

/// Snapshot of a group's counters.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_relayed: u64,
    pub active_connections: usize,
}

/// Fan-out group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Frame>,
    conns: Arc<RwLock<HashMap<Uuid, ConnInfo>>>,
    capacity: usize,
    // Atomic so relay() stays lock-free on the hot path
    frames_relayed: AtomicU64,
}

impl BroadcastGroup {
    /// Create a group whose receivers buffer up to `capacity` frames before
    /// lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            conns: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            frames_relayed: AtomicU64::new(0),
        }
    }

    /// Attach a connection; returns its receiver.
    pub async fn attach(&self, info: ConnInfo) -> broadcast::Receiver<Frame> {
        let mut conns = self.conns.write().await;
        conns.insert(info.conn_id, info);
        self.sender.subscribe()
    }

    /// Detach a connection. The room and document are untouched.
    pub async fn detach(&self, conn_id: &Uuid) -> Option<ConnInfo> {
        let mut conns = self.conns.write().await;
        conns.remove(conn_id)
    }

    /// Relay a frame to every receiver. Receivers filter out their own
    /// frames by origin, so the count includes the sender itself.
    pub fn relay(&self, origin: Uuid, bytes: Arc<Vec<u8>>) -> usize {
        let delivered = self.sender.send(Frame { origin, bytes }).unwrap_or(0);
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// Subscribe without registering a connection (snapshot consumers,
    /// tests).
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    pub async fn conn_count(&self) -> usize {
        self.conns.read().await.len()
    }

    pub async fn has_conn(&self, conn_id: &Uuid) -> bool {
        self.conns.read().await.contains_key(conn_id)
    }

    pub async fn conns(&self) -> Vec<ConnInfo> {
        self.conns.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            active_connections: self.conns.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
