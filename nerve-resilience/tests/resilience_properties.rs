//! Resilience Toolkit Behavior Tests
//!
//! Circuit lifecycle, retry schedule, bulkhead fail-fast and the composed
//! protection order.

use nerve_resilience::{
    with_bulkhead, with_circuit_breaker, with_comprehensive_protection, with_retry,
    BulkheadOptions, CircuitBreakerOptions, CircuitState, ResilienceError, ResilienceRegistry,
    RetryOptions,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

// -----------------------------------------------------------------------------
// Circuit breaker lifecycle
// -----------------------------------------------------------------------------

#[test_log::test(tokio::test(start_paused = true))]
async fn test_circuit_breaker_lifecycle() {
    let registry = ResilienceRegistry::new();
    let options = CircuitBreakerOptions::new(3, Duration::from_secs(60)).unwrap();
    let invocations = AtomicU32::new(0);

    for _ in 0..3 {
        let result = with_circuit_breaker(&registry, "payments", &options, async {
            invocations.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("gateway down"))
        })
        .await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed(_))));
    }
    assert_eq!(registry.circuit_state("payments"), CircuitState::Open);

    // 4th call: rejected without running the operation
    let result = with_circuit_breaker(&registry, "payments", &options, async {
        invocations.fetch_add(1, Ordering::SeqCst);
        Ok::<_, anyhow::Error>(())
    })
    .await;
    match result {
        Err(ResilienceError::CircuitOpen { circuit_id }) => assert_eq!(circuit_id, "payments"),
        other => panic!("expected circuit_open, got {other:?}"),
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(registry.circuit_state("payments"), CircuitState::HalfOpen);

    let result = with_circuit_breaker(&registry, "payments", &options, async {
        invocations.fetch_add(1, Ordering::SeqCst);
        Ok::<_, anyhow::Error>("charged")
    })
    .await;
    assert_eq!(result.unwrap(), "charged");
    assert_eq!(invocations.load(Ordering::SeqCst), 4);

    let snapshot = registry.circuit_snapshot("payments");
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_with_fresh_timer() {
    let registry = ResilienceRegistry::new();
    let options = CircuitBreakerOptions::new(1, Duration::from_secs(30)).unwrap();

    let _ = with_circuit_breaker(&registry, "dns", &options, async { Err::<(), _>("nxdomain") })
        .await;
    assert_eq!(registry.circuit_state("dns"), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    let result =
        with_circuit_breaker(&registry, "dns", &options, async { Err::<(), _>("nxdomain") }).await;
    assert!(matches!(result, Err(ResilienceError::OperationFailed(_))));
    assert_eq!(registry.circuit_state("dns"), CircuitState::Open);

    // the timer restarted at the failed trial
    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(registry.circuit_state("dns"), CircuitState::Open);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(registry.circuit_state("dns"), CircuitState::HalfOpen);
}

#[tokio::test]
async fn test_circuits_are_independent() {
    let registry = ResilienceRegistry::new();
    let options = CircuitBreakerOptions::new(1, Duration::from_secs(60)).unwrap();

    let _ = with_circuit_breaker(&registry, "a", &options, async { Err::<(), _>("x") }).await;

    assert_eq!(registry.circuit_state("a"), CircuitState::Open);
    assert_eq!(registry.circuit_state("b"), CircuitState::Closed);
    let result = with_circuit_breaker(&registry, "b", &options, async { Ok::<_, String>(1) }).await;
    assert_eq!(result.unwrap(), 1);
}

// -----------------------------------------------------------------------------
// Retry
// -----------------------------------------------------------------------------

#[test_log::test(tokio::test(start_paused = true))]
async fn test_retry_succeeds_on_third_attempt() {
    let options =
        RetryOptions::new(5, Duration::from_millis(1000), Duration::from_secs(10), 2.0).unwrap();
    let attempts = AtomicU32::new(0);
    let start = Instant::now();

    let result = with_retry(&options, || {
        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 3 {
                Err(format!("attempt {n} failed"))
            } else {
                Ok(n)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // exactly two sleeps: 1000ms then 2000ms
    assert_eq!(start.elapsed(), Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn test_retry_respects_max_delay() {
    let options =
        RetryOptions::new(4, Duration::from_millis(500), Duration::from_millis(800), 3.0).unwrap();
    let start = Instant::now();

    let result = with_retry(&options, || async { Err::<(), _>("still down") }).await;

    // 500 + 800 + 800
    assert_eq!(start.elapsed(), Duration::from_millis(2100));
    match result {
        Err(ResilienceError::MaxRetriesExceeded { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("expected max_retries_exceeded, got {other:?}"),
    }
}

// -----------------------------------------------------------------------------
// Bulkhead
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_bulkhead_fails_fast_when_full() {
    let registry = Arc::new(ResilienceRegistry::new());
    let options = BulkheadOptions::new(1, Duration::from_secs(5)).unwrap();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let first = {
        let registry = registry.clone();
        tokio::spawn(async move {
            with_bulkhead(&registry, "model", &options, async move {
                let _ = release_rx.await;
                Ok::<_, String>("first")
            })
            .await
        })
    };

    while registry.bulkhead_in_flight("model") == 0 {
        tokio::task::yield_now().await;
    }

    let started = std::time::Instant::now();
    let second = with_bulkhead(&registry, "model", &options, async { Ok::<_, String>("second") })
        .await;
    assert!(started.elapsed() < Duration::from_millis(100));
    match second {
        Err(ResilienceError::ResourceUnavailable { resource_id }) => {
            assert_eq!(resource_id, "model")
        }
        other => panic!("expected resource_unavailable, got {other:?}"),
    }

    release_tx.send(()).unwrap();
    assert_eq!(first.await.unwrap().unwrap(), "first");
    assert_eq!(registry.bulkhead_in_flight("model"), 0);
}

#[tokio::test]
async fn test_bulkhead_never_exceeds_max_concurrency() {
    let registry = Arc::new(ResilienceRegistry::new());
    let options = BulkheadOptions::new(3, Duration::from_secs(5)).unwrap();
    let peak = Arc::new(AtomicU32::new(0));
    let active = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let registry = registry.clone();
        let peak = peak.clone();
        let active = active.clone();
        handles.push(tokio::spawn(async move {
            with_bulkhead(&registry, "pool", &options, async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }

    assert!(accepted >= 1);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(registry.bulkhead_in_flight("pool"), 0);
}

// -----------------------------------------------------------------------------
// Comprehensive protection
// -----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_tripped_circuit_short_circuits_retries() {
    let registry = ResilienceRegistry::new();
    let circuit = CircuitBreakerOptions::new(2, Duration::from_secs(60)).unwrap();
    let retry =
        RetryOptions::new(10, Duration::from_millis(100), Duration::from_secs(1), 2.0).unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let result = with_comprehensive_protection(
        &registry,
        "queue",
        &circuit,
        &retry,
        Duration::from_secs(1),
        || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("publish failed")
            }
        },
    )
    .await;

    // two real failures trip the circuit, the third attempt is rejected
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    // backoff only between the first three attempts: 100ms + 200ms
    assert_eq!(start.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_each_attempt_is_time_bounded() {
    let registry = ResilienceRegistry::new();
    let retry =
        RetryOptions::new(3, Duration::from_millis(10), Duration::from_millis(10), 1.0).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let result = with_comprehensive_protection(
        &registry,
        "slow-api",
        &CircuitBreakerOptions::default(),
        &retry,
        Duration::from_millis(50),
        || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                Ok::<_, String>(n)
            }
        },
    )
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(
        registry.circuit_snapshot("slow-api").state,
        CircuitState::Closed
    );
    assert_eq!(registry.circuit_snapshot("slow-api").failure_count, 0);
}
