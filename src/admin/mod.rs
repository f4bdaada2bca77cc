//! Pre-registered administrative commands a parent can run against a live
//! group. Commands are data; nothing received over IPC is ever executed as code.

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::group::{Group, GroupStats};
use crate::shard::ShardSnapshot;

// -----------------------------------------------------------------------------
// ----- AdminCommand ----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AdminCommand {
    Ping,
    Stats,
    ShardInfo { shard_id: u32 },
    Reconnect { shard_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum EvalReply {
    Pong,
    Stats(GroupStats),
    Shard(ShardSnapshot),
    Ack,
}

// -----------------------------------------------------------------------------
// ----- Execute ---------------------------------------------------------------

pub async fn execute(group: &Group, command: AdminCommand) -> Result<EvalReply, GatewayError> {
    match command {
        AdminCommand::Ping => Ok(EvalReply::Pong),
        AdminCommand::Stats => Ok(EvalReply::Stats(group.snapshot().await)),
        AdminCommand::ShardInfo { shard_id } => {
            group.shard_snapshot(shard_id).await.map(EvalReply::Shard)
        }
        AdminCommand::Reconnect { shard_id } => {
            group.reconnect(shard_id)?;
            Ok(EvalReply::Ack)
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Format ----------------------------------------------------------------

pub fn format_stats(stats: &GroupStats) -> String {
    let counters = &stats.counters;
    let mut out = format!(
        "group={}\nready={}/{}\nconnects={}\nidentifies={}\nresumes={}\nreconnects={}\nzombies={}\ninvalid_sessions={}\ndispatches={}",
        stats.group_id,
        stats.ready,
        stats.shards.len(),
        counters.connects,
        counters.identifies,
        counters.resumes,
        counters.reconnects,
        counters.zombies,
        counters.invalid_sessions,
        counters.dispatches,
    );

    for shard in &stats.shards {
        out.push_str(&format!(
            "\nshard[{}] status={:?} seq={} latency_ms={}",
            shard.shard_id,
            shard.status,
            shard.sequence.map_or_else(|| "-".to_string(), |s| s.to_string()),
            shard.latency_ms.map_or_else(|| "-".to_string(), |l| l.to_string()),
        ));
    }
    out
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
