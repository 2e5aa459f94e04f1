//! Per-room snapshot scheduler.
//!
//! Every room with a configured store owns one [`SnapshotTimer`]: a tokio
//! task that serializes the document and saves it wholesale on a fixed
//! interval, independent of connection activity. The timer is cancelable —
//! on shutdown it performs one final save before exiting, so the registry
//! can flush every room deterministically instead of racing a free-running
//! interval.
//!
//! A failed save only delays durability: the error is logged and the next
//! tick retries unconditionally with the live document state.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::MergeEngine;
use crate::room::Room;
use crate::storage::SnapshotStore;

/// Cancelable periodic save task, owned by its room.
pub struct SnapshotTimer {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SnapshotTimer {
    /// Spawn the save loop for `room`.
    ///
    /// The task holds only a weak reference, so it cannot keep a room alive
    /// on its own and exits if the room is dropped.
    pub fn start<E: MergeEngine>(
        room: &Arc<Room<E>>,
        store: Arc<dyn SnapshotStore>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let weak: Weak<Room<E>> = Arc::downgrade(room);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval yields immediately; the first save lands one full
            // interval after startup
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(room) = weak.upgrade() else { break };
                        match room.save_to(store.as_ref()).await {
                            Ok(()) => log::debug!("Snapshot saved for room {}", room.name()),
                            // Next tick retries with the current state
                            Err(e) => log::error!(
                                "Snapshot save failed for room {}: {e}",
                                room.name()
                            ),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if let Some(room) = weak.upgrade() {
                            match room.save_to(store.as_ref()).await {
                                Ok(()) => log::info!(
                                    "Final snapshot saved for room {}",
                                    room.name()
                                ),
                                Err(e) => log::error!(
                                    "Final snapshot save failed for room {}: {e}",
                                    room.name()
                                ),
                            }
                        }
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Cancel the timer and wait for its final save to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }

    /// Cancel without waiting for the final save.
    pub fn cancel(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether the save loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
