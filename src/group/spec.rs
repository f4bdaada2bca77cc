use std::ops::Range;

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// ----- GroupSpec -------------------------------------------------------------

/// Which shards a group owns. `shard_end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    pub group_id: u32,
    pub shard_start: u32,
    pub shard_end: u32,
    pub total_shards: u32,
}

impl GroupSpec {
    pub fn new(group_id: u32, shards: Range<u32>, total_shards: u32) -> Self {
        Self {
            group_id,
            shard_start: shards.start,
            shard_end: shards.end,
            total_shards,
        }
    }

    pub fn shards(&self) -> Range<u32> {
        self.shard_start..self.shard_end
    }

    pub fn contains(&self, shard_id: u32) -> bool {
        self.shards().contains(&shard_id)
    }

    pub fn len(&self) -> usize {
        self.shards().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shard_start >= self.shard_end
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
