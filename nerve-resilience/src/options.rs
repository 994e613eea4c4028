// Wrapper options.
//
// Every options type validates on construction; `Default` values are always
// valid, so a misconfigured wrapper can only come from an explicit `new` call
// that returned an error.

use nerve_core::config::{ensure, Result};
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerOptions {
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreakerOptions {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Result<Self> {
        ensure(failure_threshold > 0, "failure_threshold", "must be at least 1")?;
        ensure(!reset_timeout.is_zero(), "reset_timeout", "must be non-zero")?;
        Ok(Self {
            failure_threshold,
            reset_timeout,
        })
    }

    /// Consecutive failures that trip the circuit
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Time spent open before a trial call is allowed
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(60_000),
        }
    }
}

/// Retry configuration (exponential backoff)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl RetryOptions {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self> {
        ensure(max_attempts > 0, "max_attempts", "must be at least 1")?;
        ensure(
            max_delay >= base_delay,
            "max_delay",
            "must not be shorter than base_delay",
        )?;
        ensure(
            backoff_factor.is_finite() && backoff_factor >= 1.0,
            "backoff_factor",
            format!("must be a finite value >= 1.0, got {backoff_factor}"),
        )?;
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_factor,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Delay slept after failed attempt number `attempt` (1-based):
    /// `min(base_delay * backoff_factor^(attempt - 1), max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let capped = nanos.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
        }
    }
}

/// Bulkhead configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BulkheadOptions {
    max_concurrency: usize,
    timeout: Duration,
}

impl BulkheadOptions {
    pub fn new(max_concurrency: usize, timeout: Duration) -> Result<Self> {
        ensure(max_concurrency > 0, "max_concurrency", "must be at least 1")?;
        ensure(!timeout.is_zero(), "timeout", "must be non-zero")?;
        Ok(Self {
            max_concurrency,
            timeout,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Timeout applied to each admitted operation
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for BulkheadOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            timeout: Duration::from_millis(5000),
        }
    }
}
