//! Wait schedules: retry backoff per failure class and inter-item pacing.
//!
//! ```text
//! transient / parse   base * 2^(attempt-1)   (optionally capped)
//! server overload     fixed long wait        (independent of attempt)
//! permanent           zero                   (never retried)
//! pacing              delay + U[0, jitter]
//! ```

use std::time::Duration;

use crate::config::HarvestConfig;
use crate::error::FailureClass;

/// Pure mapping from (attempt, failure class) to a wait duration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Wait before the first retry of a transient failure.
    pub base: Duration,

    /// Ceiling on the exponential schedule. `None` leaves it uncapped.
    pub cap: Option<Duration>,

    /// Fixed wait after a server-overload response.
    pub overload_wait: Duration,

    /// Minimum pause between items.
    pub pacing_delay: Duration,

    /// Maximum random jitter added on top of `pacing_delay` (uniform [0, jitter]).
    ///
    /// Set to `Duration::ZERO` to disable.
    pub jitter_max: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            base: config.backoff_base,
            cap: config.backoff_cap,
            overload_wait: config.overload_wait,
            pacing_delay: config.inter_item_delay,
            jitter_max: config.jitter_max,
        }
    }

    /// Wait before retrying after the `attempt`-th failure (1-indexed) of `class`.
    ///
    /// - Transient / Parse: `base * 2^(attempt-1)`, `Duration::MAX` on overflow, then capped
    /// - ServerOverload: `overload_wait`
    /// - Permanent: zero
    pub fn wait(&self, attempt: u32, class: FailureClass) -> Duration {
        match class {
            FailureClass::Transient | FailureClass::Parse => self.exponential(attempt),
            FailureClass::ServerOverload => self.overload_wait,
            FailureClass::Permanent => Duration::ZERO,
        }
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let delay = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match self.cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Pause between two items: the fixed delay plus random jitter.
    pub fn pacing(&self) -> Duration {
        if self.jitter_max.is_zero() {
            return self.pacing_delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter_max.as_millis() as u64);
        self.pacing_delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&HarvestConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Jitter from a time-seeded xorshift; pacing needs spread, not crypto.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % (max_ms + 1)
}
