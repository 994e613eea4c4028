use crate::options::CircuitBreakerOptions;
use crate::registry::{Admission, ResilienceRegistry};
use crate::{ResilienceError, ResilienceResult};
use std::future::Future;
use tracing::debug;

/// Run `operation` through the circuit identified by `circuit_id`.
///
/// - closed: the operation runs; failures count toward `failure_threshold`
/// - open: `CircuitOpen` is returned and the operation is not invoked
/// - half-open: one trial call runs; success closes, failure re-opens
pub async fn with_circuit_breaker<Fut, T, E>(
    registry: &ResilienceRegistry,
    circuit_id: &str,
    options: &CircuitBreakerOptions,
    operation: Fut,
) -> ResilienceResult<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    guarded(registry, circuit_id, options, async move {
        operation.await.map_err(ResilienceError::OperationFailed)
    })
    .await
}

/// Circuit breaker over an already-classified outcome.
///
/// Any `Err` counts as a failure, including timeouts and exits of the
/// wrapped call. Rejections from an inner guard (a full bulkhead) never
/// invoked the operation and are not counted.
pub(crate) async fn guarded<Fut, T, E>(
    registry: &ResilienceRegistry,
    circuit_id: &str,
    options: &CircuitBreakerOptions,
    operation: Fut,
) -> ResilienceResult<T, E>
where
    Fut: Future<Output = ResilienceResult<T, E>>,
{
    let Some(admission) = registry.admit(circuit_id) else {
        debug!(circuit = circuit_id, "Circuit open, rejecting call");
        return Err(ResilienceError::CircuitOpen {
            circuit_id: circuit_id.to_string(),
        });
    };

    let mut call = CircuitCall {
        registry,
        circuit_id,
        trial: admission == Admission::Trial,
        settled: false,
    };

    let result = operation.await;
    let rejected = matches!(&result, Err(e) if e.is_rejection());
    match &result {
        Ok(_) => registry.record_success(circuit_id),
        Err(_) if rejected => {}
        Err(_) => registry.record_failure(circuit_id, options),
    }
    // a rejected trial leaves the slot to the drop guard
    call.settled = !rejected;
    result
}

/// Frees the half-open trial slot if the caller's future is dropped mid-call
struct CircuitCall<'a> {
    registry: &'a ResilienceRegistry,
    circuit_id: &'a str,
    trial: bool,
    settled: bool,
}

impl Drop for CircuitCall<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.registry.abandon_trial(self.circuit_id);
        }
    }
}
