//! Bounded exponential backoff for transient backend failures.
//!
//! The caller decides what is transient. Contention, lease ownership, and
//! insufficient-value outcomes are answers, not failures, and are returned
//! on the first attempt.
//!
//! ```rust
//! use stockline_runtime::retry::{RetryPolicy, retry_transient};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), String> {
//! let policy = RetryPolicy::new(2, Duration::from_millis(20));
//! let level = retry_transient(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("timeout"),
//! )
//! .await?;
//! assert_eq!(level, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How many times to retry, and how long to back off in between.
///
/// The delay doubles per retry, starting at `base_delay` and capped at
/// `delay_cap`. With jitter each sleep is drawn from half to all of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub delay_cap: Duration,
    /// Randomise each delay.
    pub jitter: bool,
}

/// Two retries from 20ms, capped at 200ms: sized for a shared in-memory store
/// called on the request path.
impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(20))
    }
}

impl RetryPolicy {
    /// Jittered policy with a cap of ten times `base_delay`.
    #[must_use]
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
            delay_cap: base_delay.saturating_mul(10),
            jitter: true,
        }
    }

    /// Never retry.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Same policy with jitter turned off.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Same policy with a different delay cap.
    #[must_use]
    pub const fn capped_at(mut self, cap: Duration) -> Self {
        self.delay_cap = cap;
        self
    }

    /// Nominal (unjittered) delay before retry number `retry`, counting from 0.
    #[must_use]
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.delay_cap, |d| d.min(self.delay_cap))
    }

    /// Total nominal sleep when every retry is used.
    #[must_use]
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.retries).map(|r| self.delay_before(r)).sum()
    }

    fn sleep_for(&self, retry: u32) -> Duration {
        let nominal = self.delay_before(retry);
        if self.jitter && !nominal.is_zero() {
            nominal.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            nominal
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `is_transient`
/// rejects, or the policy runs out of retries.
///
/// # Errors
///
/// The last error `operation` returned.
pub async fn retry_transient<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    RetryMetrics::record_success();
                    tracing::debug!(retries = retry, "Backend recovered");
                }
                return Ok(value);
            },
            Err(err) if is_transient(&err) => err,
            Err(err) => return Err(err),
        };

        if retry >= policy.retries {
            RetryMetrics::record_exhausted();
            tracing::warn!(retries = retry, error = %err, "Backend still failing, giving up");
            return Err(err);
        }

        let pause = policy.sleep_for(retry);
        RetryMetrics::record_attempt();
        tracing::debug!(
            retry,
            pause_ms = pause.as_millis(),
            error = %err,
            "Transient backend error"
        );
        tokio::time::sleep(pause).await;
        retry += 1;
    }
}
