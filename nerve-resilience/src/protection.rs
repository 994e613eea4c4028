use crate::bulkhead::with_bulkhead;
use crate::circuit_breaker::guarded;
use crate::options::{BulkheadOptions, CircuitBreakerOptions, RetryOptions};
use crate::registry::ResilienceRegistry;
use crate::retry::retry_loop;
use crate::timeout::with_timeout;
use crate::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// retry( circuit_breaker( timeout( operation )))
///
/// Each attempt is circuit-checked and time-bounded on its own. Once the
/// circuit is open the remaining attempts are skipped without backoff and
/// `CircuitOpen` is returned.
pub async fn with_comprehensive_protection<F, Fut, T, E>(
    registry: &ResilienceRegistry,
    circuit_id: &str,
    circuit_options: &CircuitBreakerOptions,
    retry_options: &RetryOptions,
    timeout: Duration,
    mut operation: F,
) -> ResilienceResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    retry_loop(
        retry_options,
        |e| !matches!(e, ResilienceError::CircuitOpen { .. }),
        || {
            let attempt = operation();
            guarded(registry, circuit_id, circuit_options, async move {
                with_timeout(timeout, attempt).await
            })
        },
    )
    .await
}

/// Resilience toolkit bound to one shared registry.
///
/// Cheap to clone; clones share circuit and bulkhead state.
#[derive(Debug, Clone, Default)]
pub struct Resilience {
    registry: Arc<ResilienceRegistry>,
}

impl Resilience {
    /// Toolkit with a fresh, private registry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    /// circuit_breaker( bulkhead( timeout( operation )))
    ///
    /// For callbacks that must neither pile up nor keep running against a
    /// broken dependency. The same `id` names both the circuit and the
    /// bulkhead resource. A full bulkhead does not count against the circuit.
    pub async fn isolate<F, T, E>(
        &self,
        id: &str,
        circuit_options: &CircuitBreakerOptions,
        bulkhead_options: &BulkheadOptions,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let registry = &self.registry;
        guarded(
            registry,
            id,
            circuit_options,
            with_bulkhead(registry, id, bulkhead_options, operation),
        )
        .await
    }
}
