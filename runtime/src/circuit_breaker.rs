//! Circuit breaker for advisory counter reads.
//!
//! Reads may fail open to the durable record. When the counter keeps failing
//! the breaker trips, and readers go straight to the record for a cool-down
//! period instead of paying a backend timeout on every request. After the
//! cool-down a few trial reads decide whether to close it again.
//!
//! Mutations never go through a breaker: they must fail closed.
//!
//! ```rust
//! use stockline_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn demo() {
//! let breaker = CircuitBreaker::new("counter_reads", CircuitBreakerConfig::default());
//! let level = breaker.call(|| async { Ok::<u64, String>(42) }).await;
//! assert_eq!(level.ok(), Some(42));
//! # }
//! ```

use crate::metrics::CircuitBreakerMetrics;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Trip and recovery thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub trip_after: usize,
    /// Time spent open before trial reads are allowed.
    pub cool_down: Duration,
    /// Consecutive trial successes that close it again.
    pub close_after: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip_after: 5,
            cool_down: Duration::from_secs(10),
            close_after: 2,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without reaching the backend.
    Open,
    /// Trial calls pass through.
    HalfOpen,
}

impl BreakerState {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Result of a guarded call that did not produce a value.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// The breaker is open; the backend was not called.
    #[error("circuit open")]
    Open,
    /// The backend was called and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: usize },
    Open { since: Instant },
    HalfOpen { successes: usize },
}

impl Phase {
    const fn state(self) -> BreakerState {
        match self {
            Self::Closed { .. } => BreakerState::Closed,
            Self::Open { .. } => BreakerState::Open,
            Self::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}

/// Shared breaker; clones observe and drive the same state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: Arc<CircuitBreakerConfig>,
    phase: Arc<Mutex<Phase>>,
}

impl CircuitBreaker {
    /// A closed breaker whose metrics are labelled `name`.
    #[must_use]
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        CircuitBreakerMetrics::record_state(name, BreakerState::Closed.gauge_value());
        Self {
            name,
            config: Arc::new(config),
            phase: Arc::new(Mutex::new(Phase::Closed { failures: 0 })),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.lock().state()
    }

    /// Run `operation` unless the breaker is open.
    ///
    /// # Errors
    ///
    /// [`CircuitBreakerError::Open`] without calling `operation` while open,
    /// [`CircuitBreakerError::Inner`] when `operation` fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            CircuitBreakerMetrics::record_rejection(self.name);
            return Err(CircuitBreakerError::Open);
        }
        let outcome = operation().await;
        self.settle(outcome.is_ok());
        outcome.map_err(CircuitBreakerError::Inner)
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut phase = self.lock();
        self.enter(&mut phase, Phase::Closed { failures: 0 });
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> bool {
        let mut phase = self.lock();
        match *phase {
            Phase::Closed { .. } | Phase::HalfOpen { .. } => true,
            Phase::Open { since } if since.elapsed() >= self.config.cool_down => {
                self.enter(&mut phase, Phase::HalfOpen { successes: 0 });
                true
            },
            Phase::Open { .. } => false,
        }
    }

    fn settle(&self, succeeded: bool) {
        let mut phase = self.lock();
        let next = match (*phase, succeeded) {
            (Phase::Closed { .. }, true) => Phase::Closed { failures: 0 },
            (Phase::Closed { failures }, false) if failures + 1 >= self.config.trip_after => {
                Phase::Open {
                    since: Instant::now(),
                }
            },
            (Phase::Closed { failures }, false) => Phase::Closed {
                failures: failures + 1,
            },
            (Phase::HalfOpen { successes }, true) if successes + 1 >= self.config.close_after => {
                Phase::Closed { failures: 0 }
            },
            (Phase::HalfOpen { successes }, true) => Phase::HalfOpen {
                successes: successes + 1,
            },
            (Phase::HalfOpen { .. }, false) => Phase::Open {
                since: Instant::now(),
            },
            // A call admitted before another caller tripped the breaker.
            (Phase::Open { .. }, _) => return,
        };
        self.enter(&mut phase, next);
    }

    fn enter(&self, phase: &mut Phase, next: Phase) {
        let (from, to) = (phase.state(), next.state());
        *phase = next;
        if from != to {
            tracing::info!(breaker = self.name, ?from, ?to, "Circuit breaker state change");
            CircuitBreakerMetrics::record_state(self.name, to.gauge_value());
        }
    }
}
