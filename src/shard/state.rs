use serde::{Deserialize, Serialize};

/// Lifecycle of one shard connection.
///
/// A connection starts `Idle`, moves to `Connecting` (or `Resuming` when it
/// holds a resumable session) when a transport is opened, and only reaches
/// `Ready` after the gateway confirms the session with a `READY` or `RESUMED`
/// dispatch. Every close lands in `Disconnected`, from which the reconnect
/// timer or the operator may call `connect()` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShardStatus {
    /// Created, never connected.
    Idle,

    /// Transport open, waiting for Hello and a handshake grant.
    Connecting,

    /// Transport open, continuing an existing session.
    Resuming,

    /// Session confirmed; dispatches flow.
    Ready,

    /// The operator asked to close; the close handler will not reconnect.
    Disconnecting,

    /// No transport.
    Disconnected,
}

impl ShardStatus {
    /// `connect()` is only accepted from these states.
    pub fn can_connect(self) -> bool {
        matches!(self, ShardStatus::Idle | ShardStatus::Disconnected)
    }
}

/// How the next transport should establish its session. Decided once per
/// reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Send Resume with the stored session id and sequence.
    Resume,

    /// Drop the stored session and go through the handshake queue again.
    Reidentify,

    /// Operator-driven close; never reconnect.
    Shutdown,
}
