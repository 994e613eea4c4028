//! Aggregation state
//!
//! `AggregatorState` owns every index the engine keeps and implements all of
//! its operations synchronously. It is driven by the actor in
//! [`crate::aggregator`], but can be used directly where a single owner is
//! already guaranteed (benchmarks, replay tools).

use crate::aggregate::{self, AggregateQuery, WindowAggregates};
use crate::config::AggregatorConfig;
use crate::correlation::{self, CorrelationCacheEntry, CorrelationKey, CorrelationReport};
use crate::fusion::{FusionSummary, FusionType};
use crate::stats::{BackpressureState, StreamStatistics, StreamStats};
use crate::window::WindowIndex;
use ahash::AHashMap;
use nerve_core::config::ConfigError;
use nerve_core::{Clock, RandomSource, StdRandom};
use nerve_event::{Event, EventBuilder, Metadata};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Outcome of submitting an event
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Stored (subject to bucket capacity) and counted
    Accepted(Arc<Event>),
    /// Shed by backpressure
    Dropped,
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }
}

/// A composite parent with the children it was built from
#[derive(Debug, Clone)]
pub struct HierarchicalEvent {
    pub parent: Arc<Event>,
    pub children: Vec<Event>,
}

/// Removal counts of one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub windows_removed: usize,
    pub correlations_removed: usize,
    pub hierarchies_removed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.windows_removed + self.correlations_removed + self.hierarchies_removed
    }
}

pub struct AggregatorState {
    config: AggregatorConfig,
    clock: Clock,
    random: Box<dyn RandomSource>,
    windows: WindowIndex,
    hierarchy: AHashMap<String, HierarchicalEvent>,
    correlation_cache: AHashMap<CorrelationKey, CorrelationCacheEntry>,
    stats: StreamStatistics,
    backpressure: BackpressureState,
    // Bumped on every accepted ingestion and every sweep that removes
    // something; invalidates cached correlations
    generation: u64,
}

impl AggregatorState {
    /// State on the system clock with an entropy-seeded random source
    pub fn new(config: AggregatorConfig) -> Result<Self, ConfigError> {
        Self::with_sources(config, Clock::real(), Box::new(StdRandom::from_entropy()))
    }

    /// State with explicit time and randomness
    pub fn with_sources(
        config: AggregatorConfig,
        clock: Clock,
        random: Box<dyn RandomSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            windows: WindowIndex::new(config.window_bucket_secs, config.max_events_per_bucket),
            backpressure: BackpressureState::new(config.backpressure_threshold),
            hierarchy: AHashMap::default(),
            correlation_cache: AHashMap::default(),
            stats: StreamStatistics::default(),
            generation: 0,
            config,
            clock,
            random,
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Submit an event, shedding it with the configured probability while
    /// backpressure is engaged
    pub fn add_event(&mut self, event: Event) -> IngestOutcome {
        if self.backpressure.enabled
            && self.random.next_f64() < self.config.backpressure_drop_probability
        {
            self.stats.record_drop();
            debug!(
                event_type = %event.event_type,
                load = self.backpressure.current_load,
                "Dropped event under backpressure"
            );
            return IngestOutcome::Dropped;
        }

        IngestOutcome::Accepted(self.ingest(event))
    }

    /// Build and submit an event, stamping it from the engine clock when the
    /// builder carries no timestamp
    pub fn add_built(&mut self, builder: EventBuilder) -> IngestOutcome {
        let event = builder.build_at(self.clock.now_secs());
        self.add_event(event)
    }

    // Ingestion path without load shedding
    fn ingest(&mut self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);
        let now_millis = self.clock.now_millis();

        if !self.windows.insert(Arc::clone(&event)) {
            trace!(event_type = %event.event_type, "Window bucket full, event counted only");
        }
        self.stats.record(Arc::clone(&event), now_millis);
        self.generation += 1;

        let load = self.stats.events_per_second();
        if self.backpressure.update(load) {
            if self.backpressure.enabled {
                warn!(
                    load,
                    threshold = self.backpressure.threshold,
                    "Backpressure engaged"
                );
            } else {
                info!(load, "Backpressure released");
            }
        }

        event
    }

    /// Aggregate every bucket starting at or after `now - window_size_secs`
    pub fn window_aggregates(&self, query: &AggregateQuery) -> WindowAggregates {
        let cutoff = self.cutoff(query.window_size_secs);
        let events: Vec<Arc<Event>> = self
            .windows
            .select(query.event_type.as_deref(), cutoff)
            .cloned()
            .collect();

        aggregate::compute(&events, &query.aggregations)
    }

    /// Pairwise temporal correlation between the given types
    pub fn correlated_events(
        &mut self,
        event_types: &[String],
        time_window_secs: u64,
    ) -> CorrelationReport {
        let now = self.clock.now_secs();
        let key = CorrelationKey::new(event_types, time_window_secs);

        if let Some(entry) = self.correlation_cache.get(&key) {
            if entry.timestamp == now && entry.generation == self.generation {
                trace!(types = ?key.event_types, "Correlation cache hit");
                return entry.report.clone();
            }
        }

        let cutoff = self.cutoff(time_window_secs);
        let timestamps: Vec<Vec<i64>> = key
            .event_types
            .iter()
            .map(|t| {
                self.windows
                    .select(Some(t.as_str()), cutoff)
                    .map(|e| e.timestamp)
                    .collect()
            })
            .collect();

        let event_counts = key
            .event_types
            .iter()
            .zip(&timestamps)
            .map(|(t, ts)| (t.clone(), ts.len()))
            .collect();

        let mut correlations = BTreeMap::new();
        for (i, first) in key.event_types.iter().enumerate() {
            for (j, second) in key.event_types.iter().enumerate().skip(i + 1) {
                let strength = correlation::strength(
                    &timestamps[i],
                    &timestamps[j],
                    self.config.correlation_window_secs,
                );
                correlations.insert((first.clone(), second.clone()), strength);
            }
        }

        let report = CorrelationReport {
            event_counts,
            correlations,
            time_window_secs,
        };
        debug!(
            types = ?key.event_types,
            pairs = report.correlations.len(),
            "Computed correlations"
        );

        self.correlation_cache.insert(
            key,
            CorrelationCacheEntry {
                timestamp: now,
                generation: self.generation,
                report: report.clone(),
            },
        );
        report
    }

    /// Build a parent event over `children`, register it and ingest it
    pub fn create_hierarchical_event(
        &mut self,
        parent_type: &str,
        children: Vec<Event>,
        metadata: Metadata,
    ) -> Arc<Event> {
        let now = self.clock.now_secs();

        let mut child_types: Vec<&str> = Vec::new();
        for child in &children {
            if !child_types.contains(&child.event_type.as_str()) {
                child_types.push(&child.event_type);
            }
        }

        let parent = Event::builder()
            .event_type(parent_type)
            .timestamp(now)
            .extend_metadata(metadata)
            .metadata("childCount", json!(children.len()))
            .metadata("childTypes", json!(child_types))
            .hierarchical(true)
            .build_at(now);

        let parent = self.ingest(parent);
        debug!(
            parent_id = %parent.id,
            children = children.len(),
            "Registered hierarchical event"
        );
        self.hierarchy.insert(
            parent.id.clone(),
            HierarchicalEvent {
                parent: Arc::clone(&parent),
                children,
            },
        );
        parent
    }

    /// Collapse `events` into one fused event and ingest it
    pub fn fuse_events(&mut self, events: &[Event], fusion_type: FusionType) -> Arc<Event> {
        let fused = FusionSummary::compute(events, fusion_type).into_event(self.clock.now_secs());
        debug!(
            fusion_type = %fusion_type,
            sources = events.len(),
            "Fused events"
        );
        self.ingest(fused)
    }

    pub fn hierarchy(&self, parent_id: &str) -> Option<&HierarchicalEvent> {
        self.hierarchy.get(parent_id)
    }

    /// Drop buckets, cached correlations and hierarchies older than the retention horizon
    pub fn cleanup(&mut self) -> CleanupReport {
        let cutoff = self.cutoff(self.config.retention_secs);

        let windows_removed = self.windows.remove_older_than(cutoff);

        let before = self.correlation_cache.len();
        self.correlation_cache
            .retain(|_, entry| entry.timestamp >= cutoff);
        let correlations_removed = before - self.correlation_cache.len();

        let before = self.hierarchy.len();
        self.hierarchy
            .retain(|_, entry| entry.parent.timestamp >= cutoff);
        let hierarchies_removed = before - self.hierarchy.len();

        let report = CleanupReport {
            windows_removed,
            correlations_removed,
            hierarchies_removed,
        };
        if report.total() > 0 {
            self.generation += 1;
            info!(
                windows = windows_removed,
                correlations = correlations_removed,
                hierarchies = hierarchies_removed,
                "Cleanup removed expired entries"
            );
        }
        report
    }

    pub fn stream_stats(&self) -> StreamStats {
        StreamStats {
            total_events: self.stats.total_events(),
            events_by_type: self.stats.events_by_type(),
            events_per_second: self.stats.events_per_second(),
            dropped_events: self.stats.dropped_events(),
            window_count: self.windows.len(),
            hierarchical_count: self.hierarchy.len(),
            backpressure_active: self.backpressure.enabled,
            current_load: self.backpressure.current_load,
            backpressure_threshold: self.backpressure.threshold,
        }
    }

    fn cutoff(&self, secs: u64) -> i64 {
        self.clock
            .now_secs()
            .saturating_sub(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

impl std::fmt::Debug for AggregatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorState")
            .field("config", &self.config)
            .field("windows", &self.windows.len())
            .field("hierarchy", &self.hierarchy.len())
            .field("correlation_cache", &self.correlation_cache.len())
            .field("generation", &self.generation)
            .finish()
    }
}
