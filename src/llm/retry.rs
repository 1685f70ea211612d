//! Exponential backoff policy shared by every chain.

use std::time::Duration;

use backoff::backoff::Backoff;
use rand::Rng;

/// Defaults: 3 retries (4 attempts), base 1s, max 30s, doubling, with jitter.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY_SECS: u64 = 1;
const DEFAULT_MAX_DELAY_SECS: u64 = 30;
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Jitter scales a delay by a uniform factor in `[0.5, 1.5)`.
const JITTER_LOW: f64 = 0.5;
const JITTER_HIGH: f64 = 1.5;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            backoff_multiplier: DEFAULT_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn single_attempt() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Attempts made before giving up: `max_retries + 1`.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `min(initial_delay * multiplier^attempt, max_delay)`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let secs = if raw.is_finite() { raw.clamp(0.0, max) } else { max };
        Duration::from_secs_f64(secs)
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(JITTER_LOW..JITTER_HIGH);
        base.mul_f64(factor)
    }

    /// Iterator-style view of the delays between attempts.
    ///
    /// Yields `max_retries` delays, then `None`.
    pub fn backoff(&self) -> PolicyBackoff {
        PolicyBackoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// [`Backoff`] implementation driven by a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff for PolicyBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}
