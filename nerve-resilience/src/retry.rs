use crate::options::RetryOptions;
use crate::{ResilienceError, ResilienceResult};
use std::future::Future;
use tracing::{debug, warn};

/// Invoke `operation` until it succeeds or `max_attempts` is exhausted.
///
/// Between attempts the caller sleeps `options.delay_for(attempt)`. After the
/// last failure the result is `MaxRetriesExceeded` carrying that failure.
pub async fn with_retry<F, Fut, T, E>(
    options: &RetryOptions,
    mut operation: F,
) -> ResilienceResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_loop(
        options,
        |_| true,
        || {
            let fut = operation();
            async move { fut.await.map_err(ResilienceError::OperationFailed) }
        },
    )
    .await
}

/// Retry loop over already-classified outcomes.
///
/// Failures for which `should_retry` returns false end the loop immediately
/// and are returned as-is, without sleeping.
pub(crate) async fn retry_loop<F, Fut, T, E, P>(
    options: &RetryOptions,
    should_retry: P,
    mut operation: F,
) -> ResilienceResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ResilienceResult<T, E>>,
    P: Fn(&ResilienceError<E>) -> bool,
{
    let max_attempts = options.max_attempts();
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !should_retry(&error) {
            debug!(attempt, kind = error.kind(), "Failure is not retryable");
            return Err(error);
        }

        if attempt >= max_attempts {
            warn!(attempts = attempt, kind = error.kind(), "Max retries exceeded");
            return Err(ResilienceError::MaxRetriesExceeded {
                attempts: attempt,
                last_error: Box::new(error),
            });
        }

        let delay = options.delay_for(attempt);
        debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            kind = error.kind(),
            "Attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
