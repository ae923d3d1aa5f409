//! Circuit breaker guarding a degraded upstream server.
//!
//! Counts consecutive *item-level* failures (an item that exhausted its
//! retries), not individual attempts. Reaching the threshold opens the
//! circuit; the engine then sleeps out the cooldown and calls
//! [`CircuitBreaker::complete_cooldown`].
//!
//! # Circuit States
//!
//! ```text
//! CLOSED --[threshold item failures]--> OPEN --[cooldown]--> CLOSED
//!
//! with half-open probing enabled:
//!
//! CLOSED --[threshold]--> OPEN --[cooldown]--> HALF_OPEN --[success]--> CLOSED
//!                          ^                       |
//!                          +-------[failure]-------+
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::HarvestConfig;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Items flow normally.
    Closed,
    /// Too many consecutive failures: the engine must cool down.
    Open,
    /// Cooldown finished; the next item decides whether to close or re-open.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive item failures before opening the circuit.
    pub failure_threshold: u32,

    /// Pause the engine takes while the circuit is open.
    pub cooldown: Duration,

    /// Try one item after the cooldown instead of closing outright.
    pub half_open_trial: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            cooldown: Duration::from_secs(300),
            half_open_trial: false,
        }
    }
}

impl From<&HarvestConfig> for CircuitBreakerConfig {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            failure_threshold: config.breaker_threshold,
            cooldown: config.breaker_cooldown,
            half_open_trial: config.half_open_trial,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    trips: u64,
    last_failure: Option<String>,
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// How many times the circuit has opened during this process.
    pub trips: u64,
    pub last_failure: Option<String>,
}

/// Thread-safe consecutive-failure breaker.
///
/// The counter is process-local and never persisted: a fresh breaker is
/// created for every run, including resumed ones.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trips: 0,
                last_failure: None,
            })),
        }
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned circuit breaker mutex");
            poisoned.into_inner()
        })
    }

    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    pub fn cooldown(&self) -> Duration {
        self.config.cooldown
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock_inner();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            trips: inner.trips,
            last_failure: inner.last_failure.clone(),
        }
    }

    /// An item was extracted.
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen {
            tracing::info!("Circuit breaker closing after successful trial item");
            inner.state = CircuitState::Closed;
        }
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    /// An item exhausted its retries.
    pub fn record_failure(&self, reason: &str) {
        let mut inner = self.lock_inner();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(reason.to_string());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        error = %reason,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    error = %reason,
                    "Circuit breaker trial item failed, returning to open state"
                );
                inner.state = CircuitState::Open;
            }
            CircuitState::Open => {}
        }
    }

    /// The engine finished sleeping out the cooldown.
    ///
    /// Resets the counter to zero and closes the circuit, or moves it to
    /// half-open when probing is enabled.
    pub fn complete_cooldown(&self) {
        let mut inner = self.lock_inner();
        if inner.state != CircuitState::Open {
            return;
        }
        inner.trips += 1;
        inner.consecutive_failures = 0;
        inner.state = if self.config.half_open_trial {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        };
        tracing::info!(state = %inner.state, "Circuit breaker reset after cooldown");
    }
}
