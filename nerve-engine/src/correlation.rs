//! Cross-type temporal correlation
//!
//! For a pair of event types, the strength is the share of the first type's
//! events that have a counterpart of the second type within the correlation
//! window, normalized by the smaller of the two populations and clamped to
//! `[0, 1]`.

use std::collections::BTreeMap;

/// Result of a correlation request
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationReport {
    /// Events per requested type inside the time window
    pub event_counts: BTreeMap<String, usize>,
    /// Strength per `(type1, type2)` with `type1 < type2`
    pub correlations: BTreeMap<(String, String), f64>,
    /// Time window the report covers, in seconds
    pub time_window_secs: u64,
}

impl CorrelationReport {
    /// Strength between two types regardless of argument order
    pub fn strength(&self, a: &str, b: &str) -> Option<f64> {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.correlations.get(&key).copied()
    }
}

/// Cache key: the de-duplicated, sorted type list plus the time window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub event_types: Vec<String>,
    pub time_window_secs: u64,
}

impl CorrelationKey {
    pub fn new(event_types: &[String], time_window_secs: u64) -> Self {
        let mut event_types = event_types.to_vec();
        event_types.sort();
        event_types.dedup();
        Self {
            event_types,
            time_window_secs,
        }
    }
}

/// Cached report with the instant and ingestion generation it was computed at
#[derive(Debug, Clone)]
pub struct CorrelationCacheEntry {
    pub timestamp: i64,
    pub generation: u64,
    pub report: CorrelationReport,
}

/// Correlation strength between two timestamp populations
pub fn strength(first: &[i64], second: &[i64], window_secs: u64) -> f64 {
    if first.is_empty() || second.is_empty() {
        return 0.0;
    }

    let mut sorted = second.to_vec();
    sorted.sort_unstable();
    let window = i64::try_from(window_secs).unwrap_or(i64::MAX);

    let correlated = first
        .iter()
        .filter(|&&t| {
            let lower = t.saturating_sub(window);
            let idx = sorted.partition_point(|&s| s < lower);
            sorted
                .get(idx)
                .is_some_and(|&s| s <= t.saturating_add(window))
        })
        .count();

    let denominator = first.len().min(second.len());
    (correlated as f64 / denominator as f64).min(1.0)
}
