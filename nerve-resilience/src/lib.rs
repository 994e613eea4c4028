//! Nerve Resilience Toolkit
//!
//! Composable wrappers that protect any async operation from cascading failure:
//!
//! - **Timeout**: run the operation in its own task and abandon it after a deadline
//! - **Retry**: exponential backoff up to a maximum number of attempts
//! - **Circuit Breaker**: stop invoking an operation that keeps failing
//! - **Bulkhead**: cap per-resource concurrency, failing fast when full
//! - **Comprehensive protection**: retry( circuit_breaker( timeout( op )))
//!
//! Every wrapper returns a `ResilienceResult`; nothing is re-raised. Circuit and
//! bulkhead state lives in an injected [`ResilienceRegistry`].
//!
//! ```rust,no_run
//! use nerve_resilience::{
//!     with_comprehensive_protection, CircuitBreakerOptions, ResilienceRegistry, RetryOptions,
//! };
//! use std::time::Duration;
//!
//! # async fn example() {
//! let registry = ResilienceRegistry::new();
//! let result = with_comprehensive_protection(
//!     &registry,
//!     "metrics-push",
//!     &CircuitBreakerOptions::default(),
//!     &RetryOptions::default(),
//!     Duration::from_secs(2),
//!     || async { Ok::<_, std::io::Error>("pushed") },
//! )
//! .await;
//! # let _ = result;
//! # }
//! ```

mod bulkhead;
mod circuit_breaker;
mod options;
mod protection;
mod registry;
mod retry;
mod timeout;

pub use bulkhead::with_bulkhead;
pub use circuit_breaker::with_circuit_breaker;
pub use options::{BulkheadOptions, CircuitBreakerOptions, RetryOptions};
pub use protection::{with_comprehensive_protection, Resilience};
pub use registry::{BulkheadPermit, CircuitSnapshot, CircuitState, ResilienceRegistry};
pub use retry::with_retry;
pub use timeout::with_timeout;

use std::time::Duration;
use thiserror::Error;

/// Outcome of a protected call that did not produce a value
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The circuit is open; the operation was not invoked
    #[error("Circuit `{circuit_id}` is open")]
    CircuitOpen { circuit_id: String },

    /// The bulkhead is full; the operation was not invoked
    #[error("Resource `{resource_id}` is unavailable")]
    ResourceUnavailable { resource_id: String },

    /// The operation was abandoned after the deadline
    #[error("Operation timed out after {after:?}")]
    Timeout { after: Duration },

    /// All attempts failed; carries the final failure
    #[error("Max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded {
        attempts: u32,
        last_error: Box<ResilienceError<E>>,
    },

    /// The operation returned an error
    #[error("Operation failed: {0}")]
    OperationFailed(E),

    /// The operation panicked or was cancelled
    #[error("Operation exited abnormally: {0}")]
    OperationExited(String),
}

impl<E> ResilienceError<E> {
    /// Short machine-readable tag for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::CircuitOpen { .. } => "circuit_open",
            ResilienceError::ResourceUnavailable { .. } => "resource_unavailable",
            ResilienceError::Timeout { .. } => "timeout",
            ResilienceError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            ResilienceError::OperationFailed(_) => "operation_failed",
            ResilienceError::OperationExited(_) => "operation_exited",
        }
    }

    /// Whether the operation was rejected without being invoked
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. } | ResilienceError::ResourceUnavailable { .. }
        )
    }

    /// The innermost failure, unwrapping `MaxRetriesExceeded`
    pub fn root(&self) -> &ResilienceError<E> {
        match self {
            ResilienceError::MaxRetriesExceeded { last_error, .. } => last_error.root(),
            other => other,
        }
    }

    /// The operation's own error, if that is what ultimately failed
    pub fn operation_error(&self) -> Option<&E> {
        match self.root() {
            ResilienceError::OperationFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for protected operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
