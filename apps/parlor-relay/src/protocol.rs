//! Wire protocol for the session websocket: JSON text frames, internally
//! tagged by `type`. Signal payloads are opaque to the relay; whatever one
//! participant sends under `payload` is fanned out verbatim to the other.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a participant sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { peer_id: String },
    Signal { payload: Value },
    Ping,
}

/// Frames the relay sends to a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    JoinAck {
        session_id: String,
        peer_id: String,
        role: PeerRole,
    },
    JoinError {
        reason: String,
    },
    PeerJoined {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
    },
    Signal {
        from_peer: String,
        payload: Value,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Negotiation role assigned by arrival order: first in is impolite, the
/// second polite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Impolite,
    Polite,
}

/// Session identifiers are exactly six ASCII digits.
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == 6 && id.bytes().all(|b| b.is_ascii_digit())
}
