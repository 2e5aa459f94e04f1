//! Wire-level contract of the relay.
//!
//! The relay speaks plain binary WebSocket frames: every frame is one opaque
//! update blob, understood only by the merge engine. What this module owns is
//! the thin shell around that — the `/sync` upgrade path, room selection via
//! the `room=<name>` query parameter, and frame validation (binary,
//! non-empty). Anything deeper than that is the engine's business.

/// Well-known WebSocket upgrade path.
pub const SYNC_PATH: &str = "/sync";

/// Room used when a client connects without a `room` parameter.
pub const DEFAULT_ROOM: &str = "default";

/// Protocol errors: handshake and frame validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Upgrade requested on a path other than `/sync`
    InvalidPath(String),
    /// Frame carried no payload
    EmptyFrame,
    /// Frame was not binary
    NonBinaryFrame,
    /// WebSocket handshake failed
    Handshake(String),
    /// Transport closed underneath us
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(p) => write!(f, "Invalid sync path: {p}"),
            Self::EmptyFrame => write!(f, "Empty frame"),
            Self::NonBinaryFrame => write!(f, "Non-binary frame"),
            Self::Handshake(e) => write!(f, "Handshake failed: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Resolve the target room from a request URI.
///
/// Accepts `/sync` and `/sync?<query>`; the first `room=<name>` pair in the
/// query selects the room, anything else falls back to `default_room`.
/// Any other path is rejected.
pub fn room_from_uri(uri: &str, default_room: &str) -> Result<String, ProtocolError> {
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri, None),
    };

    if path != SYNC_PATH {
        return Err(ProtocolError::InvalidPath(path.to_string()));
    }

    let room = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("room="))
        .filter(|name| !name.is_empty())
        .unwrap_or(default_room);

    Ok(room.to_string())
}

/// Validate an inbound update frame: binary frames only, and never empty.
///
/// Validation stops here on purpose — whether the payload is a well-formed
/// update is the merge engine's call.
pub fn validate_update(payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    Ok(())
}
