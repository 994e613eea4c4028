// Stream statistics and backpressure
//
// The ingestion rate is the length of a sliding queue holding every event
// accepted during the last second. Backpressure is engaged while that rate
// exceeds the threshold; it is recomputed on every accepted ingestion.

use ahash::AHashMap;
use nerve_event::Event;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

const RATE_WINDOW_MS: u64 = 1000;

/// Running ingestion counters
#[derive(Debug, Default)]
pub struct StreamStatistics {
    total_events: u64,
    dropped_events: u64,
    events_by_type: AHashMap<String, u64>,
    recent: VecDeque<(u64, Arc<Event>)>,
}

impl StreamStatistics {
    /// Count an accepted event received at `now_millis`
    pub fn record(&mut self, event: Arc<Event>, now_millis: u64) {
        self.total_events += 1;
        *self
            .events_by_type
            .entry(event.event_type.clone())
            .or_insert(0) += 1;

        let horizon = now_millis.saturating_sub(RATE_WINDOW_MS);
        while self
            .recent
            .front()
            .is_some_and(|(received_at, _)| *received_at < horizon)
        {
            self.recent.pop_front();
        }
        self.recent.push_back((now_millis, event));
    }

    pub fn record_drop(&mut self) {
        self.dropped_events += 1;
    }

    /// Events accepted during the last second (as of the last ingestion)
    pub fn events_per_second(&self) -> usize {
        self.recent.len()
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    pub fn events_by_type(&self) -> BTreeMap<String, u64> {
        self.events_by_type
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// Load-shedding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackpressureState {
    pub enabled: bool,
    pub threshold: usize,
    pub current_load: usize,
}

impl BackpressureState {
    pub fn new(threshold: usize) -> Self {
        Self {
            enabled: false,
            threshold,
            current_load: 0,
        }
    }

    /// Returns true if the enabled flag flipped
    pub fn update(&mut self, current_load: usize) -> bool {
        let was_enabled = self.enabled;
        self.current_load = current_load;
        self.enabled = current_load > self.threshold;
        was_enabled != self.enabled
    }
}

/// Snapshot returned by `stream_stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub events_per_second: usize,
    pub dropped_events: u64,
    pub window_count: usize,
    pub hierarchical_count: usize,
    pub backpressure_active: bool,
    pub current_load: usize,
    pub backpressure_threshold: usize,
}
