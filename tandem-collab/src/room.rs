//! Rooms and the room registry.
//!
//! A room is one named collaboration session: the authoritative document,
//! the broadcast group fanning updates out to its connections, and the
//! snapshot timer keeping it durable. All mutation of a room's document goes
//! through its own mutex, so two rooms never contend with each other — the
//! registry's map is the only structure shared across rooms, and it is only
//! locked for lookup-or-create.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::broadcast::BroadcastGroup;
use crate::engine::{MergeEngine, MergeError};
use crate::saver::SnapshotTimer;
use crate::storage::{SnapshotStore, StoreError};

/// One collaboration session: a document plus its connections.
///
/// Lives from first access until process shutdown. Connections attach and
/// detach freely without affecting the document.
pub struct Room<E: MergeEngine> {
    name: String,
    engine: Arc<E>,
    /// Authoritative document; the mutex serializes all mutation per room
    doc: Mutex<E::Doc>,
    broadcast: BroadcastGroup,
    saver: std::sync::Mutex<Option<SnapshotTimer>>,
}

impl<E: MergeEngine> Room<E> {
    pub fn new(name: impl Into<String>, engine: Arc<E>, broadcast_capacity: usize) -> Self {
        let doc = engine.new_doc();
        Self {
            name: name.into(),
            engine,
            doc: Mutex::new(doc),
            broadcast: BroadcastGroup::new(broadcast_capacity),
            saver: std::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    /// Fold an update into the document. A rejection leaves the document
    /// unchanged and the room alive.
    pub async fn apply(&self, update: &[u8]) -> Result<(), MergeError> {
        let mut doc = self.doc.lock().await;
        self.engine.apply(&mut doc, update)
    }

    /// Encode the document's full current state.
    pub async fn snapshot(&self) -> Vec<u8> {
        let doc = self.doc.lock().await;
        self.engine.encode(&doc)
    }

    /// Serialize the current state and persist it wholesale.
    pub async fn save_to(&self, store: &dyn SnapshotStore) -> Result<(), StoreError> {
        let snapshot = self.snapshot().await;
        store.save(&self.name, &snapshot)
    }

    /// Replay the persisted snapshot, if any, into the fresh document.
    ///
    /// A corrupt snapshot is logged and skipped — the room starts empty
    /// rather than failing the connection that triggered its creation.
    pub async fn hydrate(&self, store: &dyn SnapshotStore) {
        match store.load(&self.name) {
            Ok(Some(snapshot)) => match self.apply(&snapshot).await {
                Ok(()) => log::info!("Room {} hydrated from snapshot", self.name),
                Err(e) => log::error!("Room {} snapshot rejected by merge engine: {e}", self.name),
            },
            Ok(None) => log::debug!("Room {} has no persisted snapshot", self.name),
            Err(e) => log::error!("Room {} snapshot load failed: {e}", self.name),
        }
    }

    /// Hand the room its snapshot timer.
    pub fn attach_saver(&self, timer: SnapshotTimer) {
        let mut saver = self.saver.lock().unwrap_or_else(|e| e.into_inner());
        *saver = Some(timer);
    }

    /// Take the timer back (registry shutdown path).
    pub fn take_saver(&self) -> Option<SnapshotTimer> {
        let mut saver = self.saver.lock().unwrap_or_else(|e| e.into_inner());
        saver.take()
    }
}

/// In-memory map of live rooms, created lazily on first access.
pub struct RoomRegistry<E: MergeEngine> {
    engine: Arc<E>,
    rooms: RwLock<HashMap<String, Arc<Room<E>>>>,
    store: Option<Arc<dyn SnapshotStore>>,
    broadcast_capacity: usize,
    snapshot_interval: Duration,
}

impl<E: MergeEngine> RoomRegistry<E> {
    pub fn new(
        engine: Arc<E>,
        store: Option<Arc<dyn SnapshotStore>>,
        broadcast_capacity: usize,
        snapshot_interval: Duration,
    ) -> Self {
        Self {
            engine,
            rooms: RwLock::new(HashMap::new()),
            store,
            broadcast_capacity,
            snapshot_interval,
        }
    }

    /// Look up a room, creating it on first access.
    ///
    /// Creation hydrates the document from the store and registers the
    /// room's snapshot timer. Safe under concurrent first-access races:
    /// exactly one create wins, later callers observe the created room.
    pub async fn get_or_create(&self, name: &str) -> Arc<Room<E>> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                return room.clone();
            }
        }

        // Slow path: re-check under the write lock
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name) {
            return room.clone();
        }

        let room = Arc::new(Room::new(name, self.engine.clone(), self.broadcast_capacity));
        if let Some(store) = &self.store {
            room.hydrate(store.as_ref()).await;
            room.attach_saver(SnapshotTimer::start(
                &room,
                store.clone(),
                self.snapshot_interval,
            ));
        }
        rooms.insert(name.to_string(), room.clone());
        log::info!("Room {name} created");
        room
    }

    /// Look up an existing room without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<Room<E>>> {
        self.rooms.read().await.get(name).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn room_names(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Cancel every room's snapshot timer and run the final saves, bounded
    /// by `timeout`. Rooms without a store have nothing to flush.
    pub async fn shutdown(&self, timeout: Duration) {
        let timers: Vec<(String, SnapshotTimer)> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .filter_map(|(name, room)| room.take_saver().map(|t| (name.clone(), t)))
                .collect()
        };
        if timers.is_empty() {
            return;
        }

        log::info!("Flushing {} room(s) before shutdown", timers.len());
        let flush = async {
            for (name, timer) in timers {
                timer.shutdown().await;
                log::debug!("Room {name} flushed");
            }
        };
        if tokio::time::timeout(timeout, flush).await.is_err() {
            log::warn!("Shutdown flush timed out after {timeout:?}");
        }
    }
}
