//! Event fusion
//!
//! Collapses a set of events into one composite event using a statistical,
//! temporal or categorical summary.

use crate::aggregate::mean;
use nerve_event::{Event, Metadata};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Summarization rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionType {
    Statistical,
    Temporal,
    Categorical,
}

impl FusionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionType::Statistical => "statistical",
            FusionType::Temporal => "temporal",
            FusionType::Categorical => "categorical",
        }
    }

    /// Type of the fused event, e.g. `fused_temporal`
    pub fn event_type(&self) -> String {
        format!("fused_{}", self.as_str())
    }
}

impl fmt::Display for FusionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown fusion type: {0}")]
pub struct UnknownFusionType(String);

impl FromStr for FusionType {
    type Err = UnknownFusionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "statistical" => Ok(FusionType::Statistical),
            "temporal" => Ok(FusionType::Temporal),
            "categorical" => Ok(FusionType::Categorical),
            other => Err(UnknownFusionType(other.to_string())),
        }
    }
}

/// Typed summary carried by a fused event
#[derive(Debug, Clone, PartialEq)]
pub enum FusionSummary {
    Statistical {
        avg: f64,
        min: Option<f64>,
        max: Option<f64>,
        count: usize,
    },
    Temporal {
        time_span: i64,
        event_rate: f64,
        source_events: usize,
    },
    Categorical {
        categories: BTreeMap<String, usize>,
        source_events: usize,
    },
}

impl FusionSummary {
    /// Summarize `events` with the given rule
    pub fn compute(events: &[Event], fusion_type: FusionType) -> Self {
        match fusion_type {
            FusionType::Statistical => {
                let values: Vec<f64> = events.iter().filter_map(Event::numeric_value).collect();
                FusionSummary::Statistical {
                    avg: mean(&values),
                    min: values.iter().copied().reduce(f64::min),
                    max: values.iter().copied().reduce(f64::max),
                    count: values.len(),
                }
            }
            FusionType::Temporal => {
                let first = events.iter().map(|e| e.timestamp).min();
                let last = events.iter().map(|e| e.timestamp).max();
                let time_span = match (first, last) {
                    (Some(first), Some(last)) => last.saturating_sub(first),
                    _ => 0,
                };
                FusionSummary::Temporal {
                    time_span,
                    event_rate: events.len() as f64 / time_span.max(1) as f64,
                    source_events: events.len(),
                }
            }
            FusionType::Categorical => {
                let mut categories = BTreeMap::new();
                for event in events {
                    *categories.entry(event.event_type.clone()).or_insert(0) += 1;
                }
                FusionSummary::Categorical {
                    categories,
                    source_events: events.len(),
                }
            }
        }
    }

    pub fn fusion_type(&self) -> FusionType {
        match self {
            FusionSummary::Statistical { .. } => FusionType::Statistical,
            FusionSummary::Temporal { .. } => FusionType::Temporal,
            FusionSummary::Categorical { .. } => FusionType::Categorical,
        }
    }

    /// Metadata entries written onto the fused event
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("fusionType".into(), json!(self.fusion_type().as_str()));
        match self {
            FusionSummary::Statistical {
                avg,
                min,
                max,
                count,
            } => {
                metadata.insert("avg".into(), json!(avg));
                metadata.insert("min".into(), json!(min));
                metadata.insert("max".into(), json!(max));
                metadata.insert("count".into(), json!(count));
            }
            FusionSummary::Temporal {
                time_span,
                event_rate,
                source_events,
            } => {
                metadata.insert("timeSpan".into(), json!(time_span));
                metadata.insert("eventRate".into(), json!(event_rate));
                metadata.insert("sourceEvents".into(), json!(source_events));
            }
            FusionSummary::Categorical {
                categories,
                source_events,
            } => {
                metadata.insert("categories".into(), json!(categories));
                metadata.insert("sourceEvents".into(), json!(source_events));
            }
        }
        metadata
    }

    /// Build the composite event stamped at `now_secs`
    pub fn into_event(self, now_secs: i64) -> Event {
        let mut builder = Event::builder()
            .event_type(self.fusion_type().event_type())
            .timestamp(now_secs)
            .extend_metadata(self.to_metadata());
        if let FusionSummary::Statistical { avg, count, .. } = self {
            if count > 0 {
                builder = builder.value(avg);
            }
        }
        builder.build_at(now_secs)
    }
}
