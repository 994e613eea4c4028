// Time window index
//
// Events are bucketed by (event_type, window_start) with fixed-width buckets.
// A bucket stores at most `max_events` events: once full, later events for the
// same bucket are not stored (bounded insert, never eviction).

use ahash::AHashMap;
use nerve_event::Event;
use std::sync::Arc;

/// Start of the bucket containing `timestamp`
pub fn window_start(timestamp: i64, bucket_secs: u32) -> i64 {
    let bucket = i64::from(bucket_secs.max(1));
    // rem_euclid is non-negative and at most the distance to i64::MIN
    timestamp - timestamp.rem_euclid(bucket)
}

/// Bucket key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub event_type: String,
    pub window_start: i64,
}

/// Events of one type within one bucket
#[derive(Debug, Default)]
pub struct TimeWindow {
    events: Vec<Arc<Event>>,
}

impl TimeWindow {
    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// All live buckets
#[derive(Debug)]
pub struct WindowIndex {
    bucket_secs: u32,
    max_events: usize,
    windows: AHashMap<WindowKey, TimeWindow>,
}

impl WindowIndex {
    pub fn new(bucket_secs: u32, max_events: usize) -> Self {
        Self {
            bucket_secs,
            max_events,
            windows: AHashMap::default(),
        }
    }

    /// Insert an event into its bucket.
    ///
    /// Returns false when the bucket was already full.
    pub fn insert(&mut self, event: Arc<Event>) -> bool {
        let key = WindowKey {
            event_type: event.event_type.clone(),
            window_start: window_start(event.timestamp, self.bucket_secs),
        };
        let window = self.windows.entry(key).or_default();
        if window.events.len() >= self.max_events {
            return false;
        }
        window.events.push(event);
        true
    }

    /// Events from buckets with `window_start >= cutoff`, optionally of one type
    pub fn select<'a>(
        &'a self,
        event_type: Option<&'a str>,
        cutoff: i64,
    ) -> impl Iterator<Item = &'a Arc<Event>> + 'a {
        self.windows
            .iter()
            .filter(move |(key, _)| {
                key.window_start >= cutoff
                    && event_type.map_or(true, |t| key.event_type == t)
            })
            .flat_map(|(_, window)| window.events.iter())
    }

    pub fn get(&self, key: &WindowKey) -> Option<&TimeWindow> {
        self.windows.get(key)
    }

    /// Drop buckets starting before `cutoff`; returns how many were removed
    pub fn remove_older_than(&mut self, cutoff: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|key, _| key.window_start >= cutoff);
        before - self.windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
