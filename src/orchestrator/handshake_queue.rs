//! The fleet-wide handshake budget. The gateway drops the whole fleet if more
//! than `max_concurrency` sessions start within one window, so every Identify
//! in every group passes through the single queue owned by the orchestrator.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const HANDSHAKE_WINDOW: Duration = Duration::from_millis(5000);

// -----------------------------------------------------------------------------
// ----- WindowLimiter ---------------------------------------------------------

/// Sliding window: any span of `window` contains at most `max` grants.
/// Pure bookkeeping; the caller does the sleeping.
#[derive(Debug, Clone)]
pub struct WindowLimiter {
    max: usize,
    window: Duration,
    /// The last `max` grant instants, oldest first.
    grants: VecDeque<Instant>,
}

impl WindowLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        let max = max.max(1) as usize;
        Self {
            max,
            window,
            grants: VecDeque::with_capacity(max),
        }
    }

    /// Reserve the earliest slot at or after `now` and return it.
    pub fn schedule(&mut self, now: Instant) -> Instant {
        let mut at = now;
        if let Some(last) = self.grants.back() {
            at = at.max(*last);
        }
        if self.grants.len() == self.max {
            if let Some(oldest) = self.grants.front() {
                at = at.max(*oldest + self.window);
            }
        }

        self.grants.push_back(at);
        if self.grants.len() > self.max {
            self.grants.pop_front();
        }
        at
    }
}

// -----------------------------------------------------------------------------
// ----- HandshakeQueue --------------------------------------------------------

/// FIFO in front of a `WindowLimiter`. Items come out of the grant channel no
/// faster than the limiter allows, in the order they were pushed.
#[derive(Debug)]
pub struct HandshakeQueue<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for HandshakeQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> HandshakeQueue<T> {
    /// The queue task stops once every `HandshakeQueue` clone is dropped or
    /// `grants` is closed.
    pub fn spawn(max_concurrency: u32, window: Duration, grants: mpsc::UnboundedSender<T>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        tokio::spawn(async move {
            let mut limiter = WindowLimiter::new(max_concurrency, window);

            while let Some(item) = rx.recv().await {
                let at = limiter.schedule(Instant::now());
                tokio::time::sleep_until(at).await;

                if grants.send(item).is_err() {
                    break;
                }
            }
            debug!("handshake queue stopped");
        });

        Self { tx }
    }

    /// Returns `false` when the queue has stopped.
    pub fn push(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
