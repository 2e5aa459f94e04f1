//! Persistence tests: snapshot roundtrips, save idempotence, and durability
//! across a simulated process restart.
//!
//! Restart tests run in two phases against the same database directory —
//! phase one writes and drops every handle (the crash/stop), phase two
//! reopens and verifies the room hydrates to its persisted state.

use std::sync::Arc;
use std::time::Duration;

use tandem_collab::client::SyncClient;
use tandem_collab::engine::{MergeEngine, YrsEngine};
use tandem_collab::room::RoomRegistry;
use tandem_collab::server::{RelayConfig, RelayServer};
use tandem_collab::storage::{RocksStore, SnapshotStore, StoreConfig};
use tempfile::tempdir;
use yrs::{GetString, ReadTxn, Text, Transact, WriteTxn};

// ─── Helpers ─────────────────────────────────────────────────────────────────

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

fn snapshot_text(snapshot: &[u8]) -> String {
    let engine = YrsEngine;
    let mut doc = engine.new_doc();
    engine.apply(&mut doc, snapshot).unwrap();
    let txn = doc.transact();
    match txn.get_text("schedule") {
        Some(text) => text.get_string(&txn),
        None => String::new(),
    }
}

fn open_store(path: &std::path::Path) -> Arc<dyn SnapshotStore> {
    Arc::new(RocksStore::open(StoreConfig::for_testing(path)).unwrap())
}

fn registry_over(store: Arc<dyn SnapshotStore>, interval: Duration) -> RoomRegistry<YrsEngine> {
    RoomRegistry::new(Arc::new(YrsEngine), Some(store), 64, interval)
}

// ─── Roundtrip ───────────────────────────────────────────────────────────────

#[test]
fn test_document_roundtrip_via_store() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("db"));

    let state = text_update("CS-101 seats=35;");
    store.save("sched-101", &state).unwrap();

    let loaded = store.load("sched-101").unwrap().unwrap();
    assert_eq!(snapshot_text(&loaded), "CS-101 seats=35;");
}

#[test]
fn test_save_is_idempotent() {
    let dir = tempdir().unwrap();
    let store_once = open_store(&dir.path().join("once"));
    let store_twice = open_store(&dir.path().join("twice"));

    let state = text_update("same state");
    store_once.save("r", &state).unwrap();
    store_twice.save("r", &state).unwrap();
    store_twice.save("r", &state).unwrap();

    let once = store_once.load("r").unwrap().unwrap();
    let twice = store_twice.load("r").unwrap().unwrap();
    assert_eq!(
        snapshot_text(&once),
        snapshot_text(&twice),
        "double save/reload must equal single save/reload"
    );
}

#[test]
fn test_save_overwrites_previous_snapshot() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("db"));

    store.save("r", &text_update("old state")).unwrap();
    store.save("r", &text_update("new state")).unwrap();

    let loaded = store.load("r").unwrap().unwrap();
    assert_eq!(snapshot_text(&loaded), "new state");
}

// ─── Restart durability ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_room_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    // Phase 1: apply updates, flush via shutdown, drop everything
    {
        let registry = registry_over(open_store(&db_path), Duration::from_secs(3600));
        let room = registry.get_or_create("sched-101").await;
        room.apply(&text_update("survives restart;")).await.unwrap();
        registry.shutdown(Duration::from_secs(2)).await;
    }

    // Phase 2: fresh process state, same directory
    {
        let registry = registry_over(open_store(&db_path), Duration::from_secs(3600));
        let room = registry.get_or_create("sched-101").await;
        assert_eq!(snapshot_text(&room.snapshot().await), "survives restart;");
        registry.shutdown(Duration::from_secs(2)).await;
    }
}

#[tokio::test]
async fn test_restart_preserves_multiple_rooms() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let registry = registry_over(open_store(&db_path), Duration::from_secs(3600));
        for name in ["sched-101", "sched-202", "sched-303"] {
            let room = registry.get_or_create(name).await;
            room.apply(&text_update(&format!("content of {name};")))
                .await
                .unwrap();
        }
        registry.shutdown(Duration::from_secs(2)).await;
    }

    {
        let store = open_store(&db_path);
        let mut persisted = store.rooms().unwrap();
        persisted.sort();
        assert_eq!(persisted, vec!["sched-101", "sched-202", "sched-303"]);

        let registry = registry_over(store, Duration::from_secs(3600));
        for name in ["sched-101", "sched-202", "sched-303"] {
            let room = registry.get_or_create(name).await;
            assert_eq!(
                snapshot_text(&room.snapshot().await),
                format!("content of {name};")
            );
        }
        registry.shutdown(Duration::from_secs(2)).await;
    }
}

#[tokio::test]
async fn test_updates_after_restart_merge_with_persisted_state() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let registry = registry_over(open_store(&db_path), Duration::from_secs(3600));
        let room = registry.get_or_create("sched-101").await;
        room.apply(&text_update("before;")).await.unwrap();
        registry.shutdown(Duration::from_secs(2)).await;
    }

    {
        let registry = registry_over(open_store(&db_path), Duration::from_secs(3600));
        let room = registry.get_or_create("sched-101").await;
        room.apply(&text_update("after;")).await.unwrap();

        let text = snapshot_text(&room.snapshot().await);
        assert!(text.contains("before;") && text.contains("after;"));
        registry.shutdown(Duration::from_secs(2)).await;
    }
}

// ─── Shutdown flush ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_flushes_before_first_tick() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        // Interval far in the future: only the shutdown flush can persist
        let registry = registry_over(open_store(&db_path), Duration::from_secs(3600));
        let room = registry.get_or_create("sched-101").await;
        room.apply(&text_update("flushed at shutdown")).await.unwrap();
        registry.shutdown(Duration::from_secs(2)).await;
    }

    let store = open_store(&db_path);
    let loaded = store.load("sched-101").unwrap().expect("flush must persist");
    assert_eq!(snapshot_text(&loaded), "flushed at shutdown");
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let dir = tempdir().unwrap();
    let registry = registry_over(open_store(&dir.path().join("db")), Duration::from_secs(3600));
    let _room = registry.get_or_create("r").await;

    registry.shutdown(Duration::from_secs(2)).await;
    // Timers are already taken; a second shutdown has nothing to do
    registry.shutdown(Duration::from_millis(100)).await;
}

// ─── Live-server persistence ─────────────────────────────────────────────────

#[tokio::test]
async fn test_scheduler_persists_while_server_runs() {
    let dir = tempdir().unwrap();
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let server = Arc::new(
        RelayServer::new(RelayConfig {
            bind_addr: format!("127.0.0.1:{port}"),
            snapshot_interval: Duration::from_millis(150),
            storage_path: Some(dir.path().join("db")),
            ..RelayConfig::default()
        })
        .unwrap(),
    );
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = SyncClient::new("sched-101", format!("ws://127.0.0.1:{port}"));
    client.connect().await.unwrap();
    client.send_update(text_update("ticked to disk")).await.unwrap();

    // At least one scheduler tick elapses
    tokio::time::sleep(Duration::from_millis(500)).await;

    let store = server.store().unwrap();
    let persisted = store.load("sched-101").unwrap().expect("tick must persist");
    assert_eq!(snapshot_text(&persisted), "ticked to disk");

    let stats = server.stats().await;
    assert_eq!(stats.updates_applied, 1);
}

#[tokio::test]
async fn test_idle_room_keeps_saving() {
    // Zero connections, zero updates: ticks still write the (empty) state
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("db"));
    let registry = registry_over(store.clone(), Duration::from_millis(100));
    let _room = registry.get_or_create("idle").await;

    tokio::time::sleep(Duration::from_millis(350)).await;

    assert!(store.load("idle").unwrap().is_some());
    registry.shutdown(Duration::from_secs(2)).await;
}
