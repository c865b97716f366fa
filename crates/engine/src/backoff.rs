//! Retry policy and exponential backoff with jitter.
//!
//! `delay = min(base * 2^attempt + jitter, max)`, where `jitter` is drawn
//! uniformly from `[0, 0.1 * base * 2^attempt)`. `attempt` is zero-based: the
//! first retry waits roughly one base delay.

use std::time::Duration;

use rand::Rng;

/// Fraction of the exponential delay used as the jitter range.
pub const JITTER_FACTOR: f64 = 0.1;

/// Exponents above this already saturate any realistic cap; clamping keeps the
/// float math finite.
const MAX_EXPONENT: u32 = 62;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(1);

/// Retry policy for a single forward operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Base delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Lower bound on any single delay (never above `max_delay`).
    pub min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with exponential backoff and the default floor.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }

    /// Create a policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Total delivery attempts allowed (first attempt plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry following zero-based `attempt`, with random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.clamp(delay(attempt, self.base_delay, self.max_delay))
    }

    /// Same as [`delay_for_attempt`](Self::delay_for_attempt) with an explicit
    /// jitter fraction in `[0, 1)`.
    pub fn delay_for_attempt_with_jitter(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        self.clamp(delay_with_jitter(
            attempt,
            self.base_delay,
            self.max_delay,
            jitter_fraction,
        ))
    }

    /// Sum of the smallest possible delays across all retries (no jitter).
    pub fn min_total_wait(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt_with_jitter(attempt, 0.0))
            .sum()
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.max(self.min_delay.min(self.max_delay))
    }
}

/// Exponential backoff delay for zero-based `attempt`, jitter drawn from the
/// thread-local RNG.
pub fn delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..1.0);
    delay_with_jitter(attempt, base_delay, max_delay, jitter_fraction)
}

/// Deterministic form of [`delay`]: `jitter_fraction` picks the point inside the
/// jitter range (`0.0` = no jitter).
pub fn delay_with_jitter(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
) -> Duration {
    let fraction = if jitter_fraction.is_finite() {
        jitter_fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let exponential = base_delay.as_secs_f64() * 2_f64.powi(attempt.min(MAX_EXPONENT) as i32);
    let jitter = exponential * JITTER_FACTOR * fraction;

    // Cap as a Duration: near Duration::MAX the f64 form of the cap rounds up
    // past what a Duration can hold.
    match Duration::try_from_secs_f64(exponential + jitter) {
        Ok(uncapped) => uncapped.min(max_delay),
        Err(_) => max_delay,
    }
}
