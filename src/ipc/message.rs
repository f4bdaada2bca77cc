use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::admin::{AdminCommand, EvalReply};
use crate::group::GroupEvent;

// -----------------------------------------------------------------------------
// ----- IpcMessage ------------------------------------------------------------

/// Every message on the parent/worker channel, encoded as `{op, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "op",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum IpcMessage {
    /// worker -> parent: a group event.
    Dispatch(GroupEvent),

    /// parent -> worker: handshake grant for one shard.
    Handshake { shard_id: u32 },

    /// parent -> worker: raw gateway payload for one shard, or all when `None`.
    Send {
        shard_id: Option<u32>,
        payload: Value,
    },

    /// parent -> worker
    Eval { nonce: u64, command: AdminCommand },

    /// worker -> parent
    EvalResponse {
        nonce: u64,
        result: Result<EvalReply, String>,
    },

    /// parent -> worker: disconnect every shard with `code` and exit.
    Shutdown { code: u16 },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{ShardEvent, ShardEventKind};
    use serde_json::json;

    #[test]
    fn ops_are_camel_case_with_data() {
        let msg = IpcMessage::Handshake { shard_id: 3 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"op": "handshake", "data": {"shardId": 3}})
        );

        let msg = IpcMessage::EvalResponse {
            nonce: 7,
            result: Err("boom".into()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"op": "evalResponse", "data": {"nonce": 7, "result": {"Err": "boom"}}})
        );
    }

    #[test]
    fn dispatch_nests_the_shard_event() {
        let msg = IpcMessage::Dispatch(GroupEvent::Shard(ShardEvent {
            shard_id: 1,
            kind: ShardEventKind::Reconnecting { delay_ms: 1000 },
        }));

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "op": "dispatch",
                "data": {
                    "type": "shard",
                    "shardId": 1,
                    "kind": {"type": "reconnecting", "delayMs": 1000}
                }
            })
        );
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
