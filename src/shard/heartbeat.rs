use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Consecutive unacknowledged beats before the transport is declared dead.
pub const MAX_MISSED_ACKS: u8 = 2;

// -----------------------------------------------------------------------------
// ----- HeartbeatTracker ------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HeartbeatTracker {
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    misses: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat now.
    Send,

    /// Too many acks missed; terminate the transport.
    Zombied,
}

// -----------------------------------------------------------------------------
// ----- HeartbeatTracker: Public ----------------------------------------------

impl HeartbeatTracker {
    /// Arm for a new transport. Returns the delay before the first beat, a
    /// random fraction of the interval so a fleet does not beat in lockstep.
    pub fn start(&mut self, interval: Duration) -> Duration {
        *self = HeartbeatTracker::default();
        interval.mul_f64(rand::rng().random::<f64>())
    }

    pub fn stop(&mut self) {
        *self = HeartbeatTracker::default();
    }

    /// Called on every scheduled beat.
    pub fn on_tick(&mut self, now: Instant) -> Beat {
        if let Some(sent) = self.last_sent {
            let acked = self.last_ack.is_some_and(|ack| ack >= sent);
            if acked {
                self.misses = 0;
            } else {
                self.misses += 1;
                if self.misses >= MAX_MISSED_ACKS {
                    return Beat::Zombied;
                }
            }
        }

        self.last_sent = Some(now);
        Beat::Send
    }

    /// A beat sent outside the schedule, on the gateway's request.
    pub fn on_forced_send(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    pub fn on_ack(&mut self, now: Instant) {
        self.last_ack = Some(now);
        self.misses = 0;
    }

    pub fn misses(&self) -> u8 {
        self.misses
    }

    /// Round trip of the last acknowledged beat.
    pub fn latency(&self) -> Option<Duration> {
        let (sent, ack) = (self.last_sent?, self.last_ack?);
        (ack >= sent).then(|| ack - sent)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
