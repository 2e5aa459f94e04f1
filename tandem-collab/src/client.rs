//! Client-side synchronization stub.
//!
//! Each editing client keeps a local replica document and one connection to
//! one room. A local mutation is applied to the replica immediately and then
//! sent; an inbound update is applied the moment it arrives — no queuing, no
//! acknowledgments. The relay does not buffer for disconnected clients, so
//! reconnection (and the resync that comes with it via the join-state frame)
//! is the application's responsibility.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::engine::{MergeEngine, YrsEngine};
use crate::protocol::{self, ProtocolError};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// A remote update was applied to the local replica
    RemoteUpdate(Vec<u8>),
}

/// The sync client: one replica, one room, one connection.
pub struct SyncClient<E: MergeEngine = YrsEngine> {
    engine: Arc<E>,
    /// Local replica document
    doc: Arc<Mutex<E::Doc>>,
    room: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncClient<YrsEngine> {
    /// Create a client for `room` against `server_url` (e.g.
    /// `ws://127.0.0.1:9090`) with the default Yrs engine.
    pub fn new(room: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self::with_engine(YrsEngine, room, server_url)
    }
}

impl<E: MergeEngine> SyncClient<E> {
    pub fn with_engine(
        engine: E,
        room: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let engine = Arc::new(engine);
        let doc = Arc::new(Mutex::new(engine.new_doc()));
        Self {
            engine,
            doc,
            room: room.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be taken once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay and spawn the reader/writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!(
            "{}{}?room={}",
            self.server_url,
            protocol::SYNC_PATH,
            self.room
        );
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Handshake(e.to_string()));
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: drain the outgoing channel into the socket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            // Channel gone: close the socket so the relay detaches us
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: apply inbound updates to the replica as they arrive
        let engine = self.engine.clone();
        let doc = self.doc.clone();
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        {
                            let mut doc = doc.lock().await;
                            if let Err(e) = engine.apply(&mut doc, &bytes) {
                                log::warn!("Inbound update dropped: {e}");
                                continue;
                            }
                        }
                        let _ = event_tx.send(SyncEvent::RemoteUpdate(bytes)).await;
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Apply a local update to the replica, then send it to the relay.
    ///
    /// The local apply happens first and unconditionally; if the engine
    /// rejects the update it is not sent (the relay would drop it anyway).
    pub async fn send_update(&self, update: Vec<u8>) -> Result<(), ProtocolError> {
        {
            let mut doc = self.doc.lock().await;
            if let Err(e) = self.engine.apply(&mut doc, &update) {
                log::warn!("Local update rejected by merge engine, not sent: {e}");
                return Ok(());
            }
        }

        match &self.outgoing_tx {
            Some(tx) => tx
                .send(update)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Drop the connection. The local replica is kept; reconnecting is the
    /// application's call.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    /// Encode the replica's full current state.
    pub async fn snapshot(&self) -> Vec<u8> {
        let doc = self.doc.lock().await;
        self.engine.encode(&doc)
    }

    /// Shared handle to the replica document.
    pub fn doc(&self) -> Arc<Mutex<E::Doc>> {
        self.doc.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::{GetString, ReadTxn, Text, Transact, WriteTxn};

    fn text_update(content: &str) -> Vec<u8> {
        let engine = YrsEngine;
        let doc = engine.new_doc();
        {
            let mut txn = doc.transact_mut();
            let text = txn.get_or_insert_text("schedule");
            text.insert(&mut txn, 0, content);
        }
        engine.encode(&doc)
    }

    #[test]
    fn test_client_creation() {
        let client = SyncClient::new("sched-101", "ws://localhost:9090");
        assert_eq!(client.room(), "sched-101");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_initial_state() {
        let client = SyncClient::new("sched-101", "ws://localhost:9090");
        assert_eq!(
            client.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_take_event_rx_once() {
        let mut client = SyncClient::new("r", "ws://localhost:9090");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_applies_locally() {
        let client = SyncClient::new("r", "ws://localhost:9090");

        let err = client.send_update(text_update("local edit")).await;
        assert_eq!(err, Err(ProtocolError::ConnectionClosed));

        // The local replica took the edit even though the send failed
        let doc = client.doc();
        let doc = doc.lock().await;
        let txn = doc.transact();
        let text = txn.get_text("schedule").unwrap();
        assert_eq!(text.get_string(&txn), "local edit");
    }

    #[tokio::test]
    async fn test_rejected_local_update_not_sent() {
        let client = SyncClient::new("r", "ws://localhost:9090");
        // Engine rejects, so the client reports Ok-and-dropped rather than
        // a transport error
        assert!(client.send_update(vec![0xFF, 0xFF, 0xFF]).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server() {
        let mut client = SyncClient::new("r", "ws://127.0.0.1:1");
        let result = client.connect().await;
        assert!(matches!(result, Err(ProtocolError::Handshake(_))));
        assert_eq!(
            client.connection_state().await,
            ConnectionState::Disconnected
        );
    }
}
