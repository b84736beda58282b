//! Jittered backoff for connection retries
//!
//! Freshly minted database credentials are often rejected for a second or two
//! while the cluster's RBAC layer catches up. This module provides the delay
//! schedule used to wait that out: a geometric ramp capped at a maximum, with
//! every slept delay perturbed by a symmetric random offset so that several
//! backend instances rotating on the same tick do not retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Growth factor applied between consecutive delays
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.6;

/// Configuration for authorization retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of connect attempts (including the first one)
    pub max_attempts: u32,

    /// Initial delay, also slept once before the first attempt
    pub base_delay: Duration,

    /// Maximum delay between attempts (caps geometric growth)
    pub max_delay: Duration,

    /// Half-width of the uniform jitter window applied to every sleep
    pub jitter: Duration,

    /// Multiplier between consecutive delays
    pub growth_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(2000),
            jitter: Duration::from_millis(250),
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl BackoffPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum connect attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set jitter span
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set growth factor
    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// Compute the unjittered delay following `previous`.
    ///
    /// `None` yields the base delay. Otherwise the previous delay is grown,
    /// floored to whole milliseconds and capped at `max_delay`; a product that
    /// floors to zero falls back to the base delay.
    pub fn next_delay(&self, previous: Option<Duration>) -> Duration {
        let Some(previous) = previous else {
            return self.base_delay;
        };

        let grown_ms = (previous.as_millis() as f64 * self.growth_factor).floor() as u64;
        if grown_ms == 0 {
            return self.base_delay;
        }

        Duration::from_millis(grown_ms).min(self.max_delay)
    }

    /// Unjittered delay sequence for the retries of one connect sequence
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_attempts as usize);
        let mut previous = None;
        for _ in 0..self.max_attempts {
            let delay = self.next_delay(previous);
            delays.push(delay);
            previous = Some(delay);
        }
        delays
    }

    /// Apply this policy's jitter to a delay
    pub fn jittered(&self, delay: Duration) -> Duration {
        jittered(delay, self.jitter)
    }
}

/// Perturb `delay` by a uniform offset in `[-span, +span]`, clamped at zero.
pub fn jittered(delay: Duration, span: Duration) -> Duration {
    let span_ms = span.as_millis() as i64;
    if span_ms == 0 {
        return delay;
    }

    let offset = rand::thread_rng().gen_range(-span_ms..=span_ms);
    let millis = (delay.as_millis() as i64 + offset).max(0);
    Duration::from_millis(millis as u64)
}

/// Retry policy presets
pub mod presets {
    use super::*;

    /// Defaults tuned for Couchbase RBAC propagation: ten attempts spanning
    /// roughly 400ms to 2s, enough for the usual 1-3 second lag.
    pub fn couchbase_auth() -> BackoffPolicy {
        BackoffPolicy::default()
    }

    /// Near-immediate retries with no jitter, for tests and local fakes
    pub fn immediate(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_jitter(Duration::ZERO)
    }
}
