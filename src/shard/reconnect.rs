use std::time::Duration;

use rand::Rng;

// -----------------------------------------------------------------------------
// ----- ReconnectPolicy -------------------------------------------------------

/// Capped exponential backoff with proportional jitter. The first retry waits
/// exactly `base` (plus jitter).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the computed delay added at random, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ReconnectPolicy: Public -----------------------------------------------

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            max: delay,
            jitter: 0.0,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let delay = self.base.saturating_mul(factor).min(self.max);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        delay + delay.mul_f64(jitter * rand::rng().random::<f64>())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
