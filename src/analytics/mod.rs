use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// ----- StatsSnapshot ---------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub connects: u64,
    pub identifies: u64,
    pub resumes: u64,
    pub reconnects: u64,
    pub heartbeats: u64,
    pub zombies: u64,
    pub invalid_sessions: u64,
    pub dispatches: u64,
}

// -----------------------------------------------------------------------------
// ----- GatewayStats ----------------------------------------------------------

/// Counters shared by every connection in one group.
#[derive(Debug, Default)]
pub struct GatewayStats {
    connects: AtomicU64,
    identifies: AtomicU64,
    resumes: AtomicU64,
    reconnects: AtomicU64,
    heartbeats: AtomicU64,
    zombies: AtomicU64,
    invalid_sessions: AtomicU64,
    dispatches: AtomicU64,
}

impl GatewayStats {
    pub fn inc_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_identify(&self) {
        self.identifies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resume(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_zombie(&self) {
        self.zombies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalid_session(&self) {
        self.invalid_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            identifies: self.identifies.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            zombies: self.zombies.load(Ordering::Relaxed),
            invalid_sessions: self.invalid_sessions.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
        }
    }
}
