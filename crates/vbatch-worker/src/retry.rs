//! Job retry policy with exponential backoff.
//!
//! [`RetryPolicy::decide`] is a pure function of the attempt count, the
//! attempt budget and the error class. Jitter is applied separately, when
//! the scheduler actually sleeps.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use vbatch_render::ErrorClass;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Queue the job again after `delay`.
    Retry { delay: Duration },
    /// Record the job as failed.
    Fail,
}

/// Configuration for job retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubles each attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Spread delays randomly so retries do not hit the renderer in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with fixed delays, useful in tests.
    pub fn without_jitter(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    /// Decide whether attempt `attempt_count` (1-based) gets another try.
    pub fn decide(&self, attempt_count: u32, max_attempts: u32, class: ErrorClass) -> RetryDecision {
        match class {
            ErrorClass::Permanent => RetryDecision::Fail,
            ErrorClass::Transient if attempt_count < max_attempts => RetryDecision::Retry {
                delay: self.backoff(attempt_count),
            },
            ErrorClass::Transient => RetryDecision::Fail,
        }
    }

    /// `min(base * 2^(attempt - 1), max)` for a 1-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// The delay actually slept for a backoff, with jitter when enabled.
    ///
    /// Jittered delays fall in `[min(base, delay), delay]`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let upper = delay.as_millis() as u64;
        let floor = (self.base_delay.as_millis() as u64).min(upper);
        Duration::from_millis(rand::rng().random_range(floor..=upper))
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Used by background tasks (like the persister) that retry for as long
/// as it takes and should suppress log spam after repeated failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
