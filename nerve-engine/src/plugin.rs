//! Protected analysis plugins
//!
//! An [`AnalysisPlugin`] consumes the stream of accepted events. Each call runs
//! isolated behind a circuit breaker and a bulkhead (both named
//! `plugin:<name>`) with a timeout, so a slow or failing plugin can neither
//! stall the aggregator nor pile up work. Failures are logged and counted.

use crate::aggregator::AggregatorHandle;
use async_trait::async_trait;
use nerve_event::Event;
use nerve_resilience::{BulkheadOptions, CircuitBreakerOptions, Resilience, ResilienceError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error reported by a plugin
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Analysis failed: {0}")]
    Failed(String),
}

/// Consumer of accepted events
#[async_trait]
pub trait AnalysisPlugin: Send + Sync {
    /// Plugin name; also names its circuit and bulkhead
    fn name(&self) -> &str;

    /// Cheap pre-filter evaluated before spawning an analysis
    fn interested_in(&self, _event: &Event) -> bool {
        true
    }

    async fn analyze(&self, event: Arc<Event>) -> Result<(), PluginError>;
}

/// Protection applied to every plugin call
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginRunnerConfig {
    pub circuit: CircuitBreakerOptions,
    pub bulkhead: BulkheadOptions,
}

/// Per-plugin counters (atomic for lock-free access)
#[derive(Debug, Default)]
pub struct PluginStats {
    analyzed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    lagged: AtomicU64,
}

impl PluginStats {
    pub fn snapshot(&self) -> PluginStatsSnapshot {
        PluginStatsSnapshot {
            analyzed: self.analyzed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of plugin counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginStatsSnapshot {
    /// Calls that completed successfully
    pub analyzed: u64,
    /// Calls that failed, timed out or panicked
    pub failed: u64,
    /// Calls refused by an open circuit or a full bulkhead
    pub rejected: u64,
    /// Events skipped because the subscription fell behind
    pub lagged: u64,
}

/// Background task feeding one plugin
pub struct PluginRunner {
    id: String,
    stats: Arc<PluginStats>,
    task: JoinHandle<()>,
}

impl PluginRunner {
    /// Subscribe `plugin` to the aggregator's accepted events.
    ///
    /// The runner holds no handle of its own: it ends once the aggregator
    /// loop exits.
    pub fn spawn(
        handle: &AggregatorHandle,
        plugin: Arc<dyn AnalysisPlugin>,
        resilience: Resilience,
        config: PluginRunnerConfig,
    ) -> Self {
        let id = format!("plugin:{}", plugin.name());
        let stats = Arc::new(PluginStats::default());
        let mut events = handle.subscribe();
        let mut stopped = handle.stopped();

        let task = tokio::spawn({
            let id = id.clone();
            let stats = Arc::clone(&stats);
            async move {
                info!(plugin = %id, "Plugin runner started");
                loop {
                    let received = tokio::select! {
                        biased;
                        received = events.recv() => received,
                        _ = stopped.changed() => break,
                    };

                    match received {
                        Ok(event) => {
                            if !plugin.interested_in(&event) {
                                continue;
                            }
                            tokio::spawn(analyze(
                                Arc::clone(&plugin),
                                event,
                                resilience.clone(),
                                config,
                                id.clone(),
                                Arc::clone(&stats),
                            ));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(plugin = %id, skipped, "Plugin subscription lagged");
                            stats.lagged.fetch_add(skipped, Ordering::Relaxed);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                info!(plugin = %id, "Plugin runner stopped");
            }
        });

        Self { id, stats, task }
    }

    /// Circuit and bulkhead id of this plugin
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stats(&self) -> PluginStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the runner has stopped consuming events
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop consuming events; analyses already in flight run to completion
    pub fn stop(self) {
        self.task.abort();
    }
}

async fn analyze(
    plugin: Arc<dyn AnalysisPlugin>,
    event: Arc<Event>,
    resilience: Resilience,
    config: PluginRunnerConfig,
    id: String,
    stats: Arc<PluginStats>,
) {
    let event_id = event.id.clone();
    let outcome = resilience
        .isolate(&id, &config.circuit, &config.bulkhead, async move {
            plugin.analyze(event).await
        })
        .await;

    match outcome {
        Ok(()) => {
            stats.analyzed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) if e.is_rejection() => {
            debug!(plugin = %id, event_id = %event_id, reason = e.kind(), "Plugin call rejected");
            stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            let error = match &e {
                ResilienceError::OperationFailed(inner) => inner.to_string(),
                other => other.to_string(),
            };
            warn!(
                plugin = %id,
                event_id = %event_id,
                kind = e.kind(),
                %error,
                "Plugin call failed"
            );
            stats.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
