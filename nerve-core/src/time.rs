//! Controllable Time Source
//!
//! The engine never reads the system clock directly. It asks a `TimeProvider`,
//! which lets tests and simulations:
//! - pin "now" to a fixed instant
//! - advance time past retention or reset windows without sleeping

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time provider trait
///
/// Abstraction over time sources that allows mocking for testing.
pub trait TimeProvider: Send + Sync {
    /// Current unix time in milliseconds
    fn now_millis(&self) -> u64;

    /// Current unix time in whole seconds
    fn now_secs(&self) -> i64 {
        (self.now_millis() / 1000) as i64
    }

    /// Advance time by a duration (mock providers only)
    fn advance(&self, _duration: Duration) {}
}

/// Real time provider using the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Mock time provider for tests and simulation
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone, Default)]
pub struct MockTimeProvider {
    millis: Arc<AtomicU64>,
}

impl MockTimeProvider {
    /// Create a mock clock starting at the unix epoch
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock clock starting at `secs` unix seconds
    pub fn at_secs(secs: u64) -> Self {
        Self::at_millis(secs * 1000)
    }

    /// Create a mock clock starting at `millis` unix milliseconds
    pub fn at_millis(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Jump to an absolute instant
    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Jump to an absolute instant in seconds
    pub fn set_secs(&self, secs: u64) {
        self.set_millis(secs * 1000);
    }
}

impl TimeProvider for MockTimeProvider {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

/// Shared handle to a time provider
#[derive(Clone)]
pub struct Clock {
    provider: Arc<dyn TimeProvider>,
}

impl Clock {
    /// Clock backed by the system time
    pub fn real() -> Self {
        Self {
            provider: Arc::new(RealTimeProvider),
        }
    }

    /// Clock backed by the given mock; the caller keeps a clone to drive it
    pub fn with_mock(mock: MockTimeProvider) -> Self {
        Self {
            provider: Arc::new(mock),
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.provider.now_millis()
    }

    pub fn now_secs(&self) -> i64 {
        self.provider.now_secs()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::real()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("now_millis", &self.now_millis())
            .finish()
    }
}
