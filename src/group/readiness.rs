use std::collections::BTreeSet;

use crate::shard::ShardEvent;

// -----------------------------------------------------------------------------
// ----- ReadyTracker ----------------------------------------------------------

/// Per-shard ready flags for one group, with a latch so the group-ready
/// announcement happens only once even if shards later bounce.
#[derive(Debug, Clone)]
pub struct ReadyTracker {
    size: usize,
    ready: BTreeSet<u32>,
    announced: bool,
}

impl ReadyTracker {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ready: BTreeSet::new(),
            announced: false,
        }
    }

    /// Update flags from one shard event. Returns `true` exactly once: the
    /// first time every shard is ready at the same moment.
    pub fn observe(&mut self, event: &ShardEvent) -> bool {
        match event.kind.readiness() {
            Some(true) => {
                self.ready.insert(event.shard_id);
            }
            Some(false) => {
                self.ready.remove(&event.shard_id);
            }
            None => return false,
        }

        if !self.announced && self.is_ready() {
            self.announced = true;
            return true;
        }
        false
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn is_ready(&self) -> bool {
        self.size > 0 && self.ready.len() == self.size
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
