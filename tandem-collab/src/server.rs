//! WebSocket relay with room-scoped update routing.
//!
//! Architecture:
//! ```text
//! Editor A ──┐
//!             ├── Room ("sched-101") ── Document (merge engine)
//! Editor B ──┘         │
//!                      ├── BroadcastGroup (fan-out to peers)
//!                      └── SnapshotTimer ── SnapshotStore (RocksDB)
//! ```
//!
//! Each inbound update is validated, folded into the room's document, and
//! only then relayed to every other connection in the room. A connection
//! that sends garbage loses that update, nothing else; a connection whose
//! socket stops accepting writes is evicted without disturbing its peers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::ConnInfo;
use crate::engine::{MergeEngine, YrsEngine};
use crate::protocol;
use crate::room::RoomRegistry;
use crate::storage::{RocksStore, SnapshotStore, StoreConfig, StoreError};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Room used when a client omits the `room` parameter
    pub default_room: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Interval between snapshot saves per room
    pub snapshot_interval: Duration,
    /// Bound on the final flush at shutdown
    pub shutdown_timeout: Duration,
    /// Snapshot storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            default_room: protocol::DEFAULT_ROOM.to_string(),
            broadcast_capacity: 256,
            snapshot_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            storage_path: None,
        }
    }
}

/// Relay-wide counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub updates_applied: u64,
    pub updates_dropped: u64,
    pub frames_rejected: u64,
    pub active_rooms: usize,
}

/// The sync relay.
pub struct RelayServer<E: MergeEngine = YrsEngine> {
    config: RelayConfig,
    registry: Arc<RoomRegistry<E>>,
    stats: Arc<RwLock<RelayStats>>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl RelayServer<YrsEngine> {
    /// Create a relay with the default Yrs engine, opening the snapshot
    /// store if one is configured.
    pub fn new(config: RelayConfig) -> Result<Self, StoreError> {
        let store = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Some(Arc::new(RocksStore::open(store_config)?) as Arc<dyn SnapshotStore>)
            }
            None => None,
        };
        Ok(Self::with_engine(YrsEngine, config, store))
    }

    /// Default configuration, in-memory only.
    pub fn with_defaults() -> Self {
        Self::with_engine(YrsEngine, RelayConfig::default(), None)
    }

    /// Persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let config = RelayConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..RelayConfig::default()
        };
        Self::new(config)
    }
}

impl<E: MergeEngine> RelayServer<E> {
    /// Create a relay over an explicit engine and store (tests, alternative
    /// merge algorithms, alternative persistence backends).
    pub fn with_engine(
        engine: E,
        config: RelayConfig,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let registry = Arc::new(RoomRegistry::new(
            Arc::new(engine),
            store.clone(),
            config.broadcast_capacity,
            config.snapshot_interval,
        ));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(RelayStats::default())),
            store,
        }
    }

    /// Accept connections until the task is dropped or the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Relay listening on {}{}",
            self.config.bind_addr,
            protocol::SYNC_PATH
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, config).await
                {
                    log::debug!("Connection from {addr} ended: {e}");
                }
            });
        }
    }

    /// Cancel every room's snapshot timer and flush, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) {
        self.registry.shutdown(self.config.shutdown_timeout).await;
        log::info!("Relay shut down");
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry<E>>,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Resolve the target room during the upgrade; wrong paths are
        // refused before the WebSocket is established.
        let mut room_name = config.default_room.clone();
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| {
                let uri = req
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                match protocol::room_from_uri(uri, &config.default_room) {
                    Ok(name) => {
                        room_name = name;
                        Ok(resp)
                    }
                    Err(e) => {
                        log::warn!("Rejected upgrade from {addr}: {e}");
                        let mut resp = ErrorResponse::new(Some(e.to_string()));
                        *resp.status_mut() = StatusCode::NOT_FOUND;
                        Err(resp)
                    }
                }
            },
        )
        .await?;

        let room = registry.get_or_create(&room_name).await;
        let room_count = registry.room_count().await;
        drop(registry);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let conn_id = Uuid::new_v4();
        let mut rx = room
            .broadcast()
            .attach(ConnInfo::new(conn_id, addr.to_string()))
            .await;

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
            s.active_rooms = room_count;
        }
        log::info!("Connection {conn_id} from {addr} joined room {}", room.name());

        // Push the room's full current state to the new connection so a
        // late joiner sees edits made since the last snapshot tick. The
        // subscription above predates the snapshot, so anything applied in
        // between arrives again on rx — duplicates are absorbed by the
        // merge engine's idempotence.
        let state = room.snapshot().await;
        if ws_sender.send(Message::Binary(state.into())).await.is_err() {
            log::warn!("Connection {conn_id} dropped during join sync");
        } else {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                {
                                    let mut s = stats.write().await;
                                    s.total_frames += 1;
                                    s.total_bytes += bytes.len() as u64;
                                }

                                if let Err(e) = protocol::validate_update(&bytes) {
                                    log::debug!("Rejected frame from {conn_id}: {e}");
                                    stats.write().await.frames_rejected += 1;
                                    continue;
                                }

                                // Apply before relaying: peers never see an
                                // update the room's document hasn't absorbed
                                match room.apply(&bytes).await {
                                    Ok(()) => {
                                        stats.write().await.updates_applied += 1;
                                        room.broadcast().relay(conn_id, Arc::new(bytes));
                                    }
                                    Err(e @ crate::engine::MergeError::MalformedUpdate(_)) => {
                                        log::warn!(
                                            "Update from {conn_id} dropped in room {}: {e}",
                                            room.name()
                                        );
                                        stats.write().await.updates_dropped += 1;
                                    }
                                    Err(e) => {
                                        // Engine-internal failure: the one
                                        // condition worth alerting on, though
                                        // only this room is affected
                                        log::error!(
                                            "Merge engine failure in room {}: {e}",
                                            room.name()
                                        );
                                        stats.write().await.updates_dropped += 1;
                                    }
                                }
                            }

                            Some(Ok(Message::Text(_))) => {
                                log::debug!("Rejected non-binary frame from {conn_id}");
                                stats.write().await.frames_rejected += 1;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                if ws_sender.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection {conn_id} closed");
                                break;
                            }

                            Some(Err(e)) => {
                                log::warn!("WebSocket error on {conn_id}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    frame = rx.recv() => {
                        match frame {
                            Ok(frame) => {
                                // No self-echo
                                if frame.origin == conn_id {
                                    continue;
                                }
                                if ws_sender
                                    .send(Message::Binary(frame.bytes.to_vec().into()))
                                    .await
                                    .is_err()
                                {
                                    log::warn!("Write failed on {conn_id}; evicting");
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Connection {conn_id} lagged by {n} frames");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        }

        // Detach only — the document belongs to the room, not the connection
        room.broadcast().detach(&conn_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }

        Ok(())
    }

    /// Current relay counters.
    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry<E>> {
        &self.registry
    }

    /// The snapshot store, if persistence is configured.
    pub fn store(&self) -> Option<&Arc<dyn SnapshotStore>> {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.default_room, protocol::DEFAULT_ROOM);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.snapshot_interval, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_relay_creation() {
        let relay = RelayServer::with_defaults();
        assert_eq!(relay.bind_addr(), "127.0.0.1:9090");
        assert!(relay.store().is_none());
    }

    #[test]
    fn test_relay_custom_config() {
        let config = RelayConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            default_room: "lobby".to_string(),
            ..RelayConfig::default()
        };
        let relay = RelayServer::new(config).unwrap();
        assert_eq!(relay.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_relay_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let relay = RelayServer::with_storage("127.0.0.1:0", dir.path().join("db")).unwrap();
        assert!(relay.store().is_some());
    }

    #[tokio::test]
    async fn test_relay_stats_initial() {
        let relay = RelayServer::with_defaults();
        let stats = relay.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.updates_applied, 0);
        assert_eq!(stats.updates_dropped, 0);
        assert_eq!(stats.frames_rejected, 0);
        assert_eq!(stats.active_rooms, 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_rooms() {
        let relay = RelayServer::with_defaults();
        relay.shutdown().await;
    }
}
