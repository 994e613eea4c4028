//! Nerve Event Aggregation Engine
//!
//! Ingests a high-rate stream of heterogeneous events into bounded, time
//! bucketed memory and answers on demand:
//!
//! - **Window aggregates**: count/avg/sum/min/max/percentiles over recent buckets
//! - **Correlations**: pairwise temporal co-occurrence strength between types
//! - **Composites**: hierarchical parents and fused summaries, re-ingested as events
//! - **Stream statistics**: throughput, drops and backpressure state
//!
//! Under sustained load above the configured threshold, events are shed with a
//! fixed probability. Expired buckets are swept periodically.
//!
//! ```rust,no_run
//! use nerve_engine::{AggregateQuery, Aggregator, AggregatorConfig};
//! use nerve_event::Event;
//!
//! # async fn example() -> Result<(), nerve_engine::AggregatorError> {
//! let aggregator = Aggregator::spawn(AggregatorConfig::default())?;
//! let handle = aggregator.handle();
//!
//! // Stamped from the aggregator's clock since no timestamp is set
//! handle
//!     .add_built(Event::builder().event_type("cpu").value(0.7))
//!     .await?;
//! let aggregates = handle
//!     .window_aggregates(AggregateQuery::new().event_type("cpu"))
//!     .await?;
//! println!("avg cpu: {:?}", aggregates.avg());
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod aggregator;
pub mod config;
pub mod correlation;
pub mod fusion;
pub mod plugin;
pub mod state;
pub mod stats;
pub mod window;

pub use aggregate::{AggregateQuery, AggregateValue, Aggregation, Percentiles, WindowAggregates};
pub use aggregator::{Aggregator, AggregatorError, AggregatorHandle};
pub use config::AggregatorConfig;
pub use correlation::CorrelationReport;
pub use fusion::{FusionSummary, FusionType};
pub use plugin::{
    AnalysisPlugin, PluginError, PluginRunner, PluginRunnerConfig, PluginStatsSnapshot,
};
pub use state::{AggregatorState, CleanupReport, HierarchicalEvent, IngestOutcome};
pub use stats::StreamStats;
