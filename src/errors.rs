use std::time::Duration;

use thiserror::Error;

use crate::ipc::IpcError;

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    // -- Connection --
    #[error("shard {shard_id} is already connecting")]
    AlreadyConnecting { shard_id: u32 },

    #[error("shard {shard_id}: authentication failed (close code 4004)")]
    AuthenticationFailed { shard_id: u32 },

    #[error("shard {shard_id}: invalid intents (close code 4013)")]
    InvalidIntents { shard_id: u32 },

    #[error("shard {shard_id}: disallowed intents (close code 4014)")]
    DisallowedIntents { shard_id: u32 },

    #[error("shard {shard_id} was disconnected before it became ready")]
    ConnectionClosed { shard_id: u32 },

    #[error("shard {shard_id} is no longer running")]
    ShardGone { shard_id: u32 },

    #[error("shard {shard_id} is not owned by this group")]
    UnknownShard { shard_id: u32 },

    // -- Transport --
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decompression error: {0}")]
    Decompress(String),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    // -- Workers --
    #[error("worker for group {group_id} exited")]
    ProcessExited { group_id: u32 },

    #[error("eval on group {group_id} timed out after {timeout:?}")]
    EvalTimeout { group_id: u32, timeout: Duration },

    #[error("eval failed: {0}")]
    Eval(String),

    #[error("failed to launch worker for group {group_id}: {reason}")]
    Launch { group_id: u32, reason: String },

    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),

    // -- Orchestrator --
    #[error("fleet is already spawned")]
    AlreadySpawned,

    #[error("fleet is not spawned")]
    NotSpawned,

    #[error("no group owns shard {shard_id}")]
    NoOwningGroup { shard_id: u32 },

    #[error("gateway info request failed: {0}")]
    GatewayInfo(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// -----------------------------------------------------------------------------
// ----- GatewayError: Public --------------------------------------------------

impl GatewayError {
    /// Terminal errors are never retried by the reconnect path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::AuthenticationFailed { .. }
                | GatewayError::InvalidIntents { .. }
                | GatewayError::DisallowedIntents { .. }
        )
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
