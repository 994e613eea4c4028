//! Window aggregations
//!
//! Pure functions over a candidate event list. Sparse or non-numeric input
//! degrades to zero/`None` defaults rather than failing.

use nerve_event::Event;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A statistic that can be requested over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Avg,
    Sum,
    Min,
    Max,
    Percentiles,
}

/// p50/p90/p95/p99 of the sorted numeric values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Computed value of one aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregateValue {
    Count(usize),
    Number(Option<f64>),
    Percentiles(Option<Percentiles>),
}

/// Parameters of a window aggregation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    /// Restrict to one event type; `None` aggregates across all types
    pub event_type: Option<String>,
    /// Buckets starting at or after `now - window_size_secs` are included
    pub window_size_secs: u64,
    pub aggregations: SmallVec<[Aggregation; 6]>,
}

impl Default for AggregateQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            window_size_secs: 60,
            aggregations: smallvec![Aggregation::Count, Aggregation::Avg],
        }
    }
}

impl AggregateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn window_size_secs(mut self, secs: u64) -> Self {
        self.window_size_secs = secs;
        self
    }

    pub fn aggregations(mut self, aggregations: &[Aggregation]) -> Self {
        self.aggregations = aggregations.iter().copied().collect();
        self
    }
}

/// Result of a window aggregation, keyed by requested aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WindowAggregates {
    values: BTreeMap<Aggregation, AggregateValue>,
}

impl WindowAggregates {
    pub fn get(&self, aggregation: Aggregation) -> Option<&AggregateValue> {
        self.values.get(&aggregation)
    }

    pub fn count(&self) -> Option<usize> {
        match self.values.get(&Aggregation::Count) {
            Some(AggregateValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn avg(&self) -> Option<f64> {
        self.number(Aggregation::Avg)
    }

    pub fn sum(&self) -> Option<f64> {
        self.number(Aggregation::Sum)
    }

    pub fn min(&self) -> Option<f64> {
        self.number(Aggregation::Min)
    }

    pub fn max(&self) -> Option<f64> {
        self.number(Aggregation::Max)
    }

    pub fn percentiles(&self) -> Option<Percentiles> {
        match self.values.get(&Aggregation::Percentiles) {
            Some(AggregateValue::Percentiles(p)) => *p,
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Aggregation, &AggregateValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn number(&self, aggregation: Aggregation) -> Option<f64> {
        match self.values.get(&aggregation) {
            Some(AggregateValue::Number(v)) => *v,
            _ => None,
        }
    }
}

/// Compute the requested aggregations over `events`
pub fn compute(events: &[Arc<Event>], aggregations: &[Aggregation]) -> WindowAggregates {
    let values: Vec<f64> = events.iter().filter_map(|e| e.numeric_value()).collect();
    let mut result = WindowAggregates::default();

    for aggregation in aggregations {
        let value = match aggregation {
            Aggregation::Count => AggregateValue::Count(events.len()),
            Aggregation::Avg => AggregateValue::Number(Some(mean(&values))),
            Aggregation::Sum => AggregateValue::Number(Some(values.iter().sum())),
            Aggregation::Min => AggregateValue::Number(values.iter().copied().reduce(f64::min)),
            Aggregation::Max => AggregateValue::Number(values.iter().copied().reduce(f64::max)),
            Aggregation::Percentiles => AggregateValue::Percentiles(percentiles(&values)),
        };
        result.values.insert(*aggregation, value);
    }

    result
}

/// Arithmetic mean, 0 for no values
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Nearest-rank percentiles using `index = round(p * (n - 1))` on sorted values
pub fn percentiles(values: &[f64]) -> Option<Percentiles> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let at = |p: f64| {
        let index = (p * (sorted.len() - 1) as f64).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    };

    Some(Percentiles {
        p50: at(0.50),
        p90: at(0.90),
        p95: at(0.95),
        p99: at(0.99),
    })
}
