use crate::{ResilienceError, ResilienceResult};
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::warn;

/// Run `operation` in its own task and wait at most `timeout` for it.
///
/// On expiry the task is aborted and `Timeout` is returned. Abort is
/// best-effort: the task stops at its next await point, so work it does
/// between awaits may still run to completion after the caller has moved on.
/// A panic inside the operation is reported as `OperationExited`.
pub async fn with_timeout<F, T, E>(timeout: Duration, operation: F) -> ResilienceResult<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut task = tokio::spawn(operation);

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(ResilienceError::OperationFailed(e)),
        Ok(Err(join_error)) => Err(ResilienceError::OperationExited(describe(join_error))),
        Err(_) => {
            task.abort();
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out, abandoning task"
            );
            Err(ResilienceError::Timeout { after: timeout })
        }
    }
}

fn describe(error: JoinError) -> String {
    if error.is_cancelled() {
        return "task cancelled".to_string();
    }
    match error.try_into_panic() {
        Ok(payload) => panic_message(payload),
        Err(other) => other.to_string(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
