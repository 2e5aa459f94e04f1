//! Relay entrypoint.
//!
//! Configuration comes from environment variables, with defaults suitable
//! for local development:
//!
//! | Variable               | Default          |                              |
//! |------------------------|------------------|------------------------------|
//! | `TANDEM_BIND`          | `127.0.0.1:9090` | Listen address               |
//! | `TANDEM_DATA`          | (unset)          | Snapshot dir; unset = memory |
//! | `TANDEM_ROOM`          | `default`        | Room for bare `/sync`        |
//! | `TANDEM_SNAPSHOT_SECS` | `30`             | Snapshot interval            |
//! | `TANDEM_SHUTDOWN_SECS` | `5`              | Final-flush bound            |
//!
//! Ctrl-C triggers a graceful shutdown: every room's timer is canceled and
//! its document flushed to the store before the process exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tandem_collab::{RelayConfig, RelayServer};

/// Read a u64 env var, falling back (with a warning) on bad values.
fn env_secs(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(secs) => secs,
            Err(_) => {
                warn!("{name}={raw} is not a number; using {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn config_from_env() -> RelayConfig {
    let mut config = RelayConfig::default();
    if let Ok(bind) = std::env::var("TANDEM_BIND") {
        config.bind_addr = bind;
    }
    if let Ok(room) = std::env::var("TANDEM_ROOM") {
        config.default_room = room;
    }
    config.snapshot_interval = Duration::from_secs(env_secs(
        "TANDEM_SNAPSHOT_SECS",
        config.snapshot_interval.as_secs(),
    ));
    config.shutdown_timeout = Duration::from_secs(env_secs(
        "TANDEM_SHUTDOWN_SECS",
        config.shutdown_timeout.as_secs(),
    ));
    config.storage_path = std::env::var("TANDEM_DATA").ok().map(PathBuf::from);
    config
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = config_from_env();
    if config.storage_path.is_none() {
        warn!("TANDEM_DATA not set; running in-memory, rooms will not survive restarts");
    }

    let server = match RelayServer::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to open snapshot store: {e}");
            std::process::exit(1);
        }
    };

    info!("Starting tandem relay on {}", server.bind_addr());
    let runner = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Relay stopped: {e}");
            }
        })
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }

    runner.abort();
    server.shutdown().await;
}
