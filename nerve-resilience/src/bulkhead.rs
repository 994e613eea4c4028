use crate::options::BulkheadOptions;
use crate::registry::ResilienceRegistry;
use crate::timeout::with_timeout;
use crate::{ResilienceError, ResilienceResult};
use std::future::Future;
use tracing::debug;

/// Run `operation` if `resource_id` has a free slot, under `options.timeout()`.
///
/// A full bulkhead returns `ResourceUnavailable` at once; there is no queue.
/// The slot is released on every exit path, including cancellation of the
/// returned future.
pub async fn with_bulkhead<F, T, E>(
    registry: &ResilienceRegistry,
    resource_id: &str,
    options: &BulkheadOptions,
    operation: F,
) -> ResilienceResult<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let Some(_permit) = registry.try_acquire(resource_id, options.max_concurrency()) else {
        debug!(
            resource = resource_id,
            max_concurrency = options.max_concurrency(),
            "Bulkhead full, rejecting call"
        );
        return Err(ResilienceError::ResourceUnavailable {
            resource_id: resource_id.to_string(),
        });
    };

    with_timeout(options.timeout(), operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_releases_slot_after_error() {
        let registry = ResilienceRegistry::new();
        let opts = BulkheadOptions::new(1, Duration::from_secs(1)).unwrap();

        let result = with_bulkhead(&registry, "db", &opts, async { Err::<(), _>("fail") }).await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed("fail"))));
        assert_eq!(registry.bulkhead_in_flight("db"), 0);

        let result = with_bulkhead(&registry, "db", &opts, async { Ok::<_, String>(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_releases_slot_after_timeout() {
        let registry = ResilienceRegistry::new();
        let opts = BulkheadOptions::new(1, Duration::from_millis(50)).unwrap();

        let result = with_bulkhead(&registry, "slow", &opts, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        })
        .await;

        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
        assert_eq!(registry.bulkhead_in_flight("slow"), 0);
    }
}
