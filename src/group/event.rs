use serde::{Deserialize, Serialize};

use crate::shard::ShardEvent;

/// What a group reports upward. One typed stream per group; the worker host
/// serializes it onto the IPC channel unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GroupEvent {
    Shard(ShardEvent),

    /// Every owned shard reported ready. Announced once per group lifetime.
    Ready { group_id: u32 },
}
