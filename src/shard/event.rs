use serde::{Deserialize, Serialize};
use serde_json::Value;

// -----------------------------------------------------------------------------
// ----- ShardEvent ------------------------------------------------------------

/// Everything a connection reports upward, tagged with its shard id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardEvent {
    pub shard_id: u32,
    pub kind: ShardEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ShardEventKind {
    Connecting,

    /// The connection wants to Identify and waits for a handshake grant.
    NeedHandshake,

    Ready {
        session_id: String,
    },

    Resumed,

    /// Opaque application payload.
    Dispatch {
        event: String,
        sequence: u64,
        data: Value,
    },

    Reconnecting {
        delay_ms: u64,
    },

    Disconnected {
        code: Option<u16>,
    },

    /// Recoverable transport or decode problem; the close path follows.
    Error {
        message: String,
    },

    /// Terminal close; no reconnect will follow.
    Fatal {
        code: u16,
        message: String,
    },
}

impl ShardEventKind {
    /// Whether the shard counts as ready after this event, if it changes that.
    pub fn readiness(&self) -> Option<bool> {
        match self {
            ShardEventKind::Ready { .. } | ShardEventKind::Resumed => Some(true),
            ShardEventKind::Reconnecting { .. }
            | ShardEventKind::Disconnected { .. }
            | ShardEventKind::Fatal { .. } => Some(false),
            _ => None,
        }
    }
}
