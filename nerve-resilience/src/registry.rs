// ResilienceRegistry - shared circuit breaker and bulkhead state
//
// The registry is the only mutable state shared across unrelated callers.
// It is an explicit object (wrap it in an `Arc` and inject it) rather than a
// process-wide global, so tests can build isolated instances.
//
// Circuit transitions out of `Open` are evaluated lazily: a circuit whose reset
// timeout has elapsed reports `HalfOpen` on the next access.

use crate::options::CircuitBreakerOptions;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without invoking the operation
    Open,
    /// A single trial call decides whether to close or re-open
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub circuit_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

#[derive(Debug)]
struct CircuitEntry {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    reset_timeout: Duration,
    trial_in_flight: bool,
}

impl CircuitEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            reset_timeout: Duration::ZERO,
            trial_in_flight: false,
        }
    }

    /// Apply the pending open -> half_open transition if its timer elapsed
    fn refresh(&mut self, circuit_id: &str) {
        if self.state != CircuitState::Open {
            return;
        }
        let elapsed = self
            .opened_at
            .map(|opened| opened.elapsed() >= self.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            self.state = CircuitState::HalfOpen;
            self.trial_in_flight = false;
            info!(circuit = circuit_id, "Circuit half-open, allowing trial call");
        }
    }

    fn open(&mut self, circuit_id: &str, reset_timeout: Duration) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.reset_timeout = reset_timeout;
        self.trial_in_flight = false;
        warn!(
            circuit = circuit_id,
            failures = self.failure_count,
            reset_timeout_ms = reset_timeout.as_millis() as u64,
            "Circuit opened"
        );
    }

    fn is_idle(&self) -> bool {
        self.state == CircuitState::Closed && self.failure_count == 0
    }
}

/// How a call was admitted through a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Closed,
    Trial,
}

/// Shared registry of circuit breakers and bulkheads keyed by identifier
#[derive(Debug, Default)]
pub struct ResilienceRegistry {
    circuits: Mutex<AHashMap<String, CircuitEntry>>,
    bulkheads: Mutex<AHashMap<String, usize>>,
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a circuit (`Closed` if never used)
    pub fn circuit_state(&self, circuit_id: &str) -> CircuitState {
        self.circuit_snapshot(circuit_id).state
    }

    /// State and failure count of a circuit
    pub fn circuit_snapshot(&self, circuit_id: &str) -> CircuitSnapshot {
        let mut circuits = self.circuits.lock();
        match circuits.get_mut(circuit_id) {
            Some(entry) => {
                entry.refresh(circuit_id);
                CircuitSnapshot {
                    circuit_id: circuit_id.to_string(),
                    state: entry.state,
                    failure_count: entry.failure_count,
                }
            }
            None => CircuitSnapshot {
                circuit_id: circuit_id.to_string(),
                state: CircuitState::Closed,
                failure_count: 0,
            },
        }
    }

    /// Snapshots of every known circuit
    pub fn circuits(&self) -> Vec<CircuitSnapshot> {
        let mut circuits = self.circuits.lock();
        let mut snapshots: Vec<_> = circuits
            .iter_mut()
            .map(|(id, entry)| {
                entry.refresh(id);
                CircuitSnapshot {
                    circuit_id: id.clone(),
                    state: entry.state,
                    failure_count: entry.failure_count,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.circuit_id.cmp(&b.circuit_id));
        snapshots
    }

    /// Operations currently admitted through a bulkhead
    pub fn bulkhead_in_flight(&self, resource_id: &str) -> usize {
        self.bulkheads.lock().get(resource_id).copied().unwrap_or(0)
    }

    /// Number of tracked circuits and bulkheads
    pub fn len(&self) -> usize {
        self.circuits.lock().len() + self.bulkheads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop circuits that are closed with no recorded failures.
    ///
    /// Such entries are indistinguishable from never-used ones, so removing
    /// them bounds registry growth for one-off identifiers. Returns the number
    /// of entries removed.
    pub fn prune_idle(&self) -> usize {
        let mut circuits = self.circuits.lock();
        let before = circuits.len();
        circuits.retain(|_, entry| !entry.is_idle() || entry.trial_in_flight);
        let removed = before - circuits.len();
        if removed > 0 {
            debug!(removed, "Pruned idle circuits");
        }
        removed
    }

    /// Decide whether a call may pass the circuit.
    ///
    /// Returns `None` when the call must be rejected.
    pub(crate) fn admit(&self, circuit_id: &str) -> Option<Admission> {
        let mut circuits = self.circuits.lock();
        let entry = circuits
            .entry(circuit_id.to_string())
            .or_insert_with(CircuitEntry::new);
        entry.refresh(circuit_id);

        match entry.state {
            CircuitState::Closed => Some(Admission::Closed),
            CircuitState::Open => None,
            CircuitState::HalfOpen if entry.trial_in_flight => None,
            CircuitState::HalfOpen => {
                entry.trial_in_flight = true;
                Some(Admission::Trial)
            }
        }
    }

    pub(crate) fn record_success(&self, circuit_id: &str) {
        let mut circuits = self.circuits.lock();
        let Some(entry) = circuits.get_mut(circuit_id) else {
            return;
        };
        match entry.state {
            CircuitState::Closed => entry.failure_count = 0,
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Closed;
                entry.failure_count = 0;
                entry.opened_at = None;
                entry.trial_in_flight = false;
                info!(circuit = circuit_id, "Circuit closed after successful trial");
            }
            // a call admitted before the circuit tripped; the open timer stands
            CircuitState::Open => {}
        }
    }

    pub(crate) fn record_failure(&self, circuit_id: &str, options: &CircuitBreakerOptions) {
        let mut circuits = self.circuits.lock();
        let entry = circuits
            .entry(circuit_id.to_string())
            .or_insert_with(CircuitEntry::new);
        entry.failure_count = entry.failure_count.saturating_add(1);

        match entry.state {
            CircuitState::Closed => {
                debug!(
                    circuit = circuit_id,
                    failures = entry.failure_count,
                    threshold = options.failure_threshold(),
                    "Circuit recorded failure"
                );
                if entry.failure_count >= options.failure_threshold() {
                    entry.open(circuit_id, options.reset_timeout());
                }
            }
            CircuitState::HalfOpen => entry.open(circuit_id, options.reset_timeout()),
            CircuitState::Open => {}
        }
    }

    /// Release a trial slot whose call never reported an outcome
    pub(crate) fn abandon_trial(&self, circuit_id: &str) {
        if let Some(entry) = self.circuits.lock().get_mut(circuit_id) {
            if entry.state == CircuitState::HalfOpen {
                entry.trial_in_flight = false;
            }
        }
    }

    /// Take a bulkhead slot if fewer than `max_concurrency` are in use
    pub(crate) fn try_acquire(
        &self,
        resource_id: &str,
        max_concurrency: usize,
    ) -> Option<BulkheadPermit<'_>> {
        let mut bulkheads = self.bulkheads.lock();
        let count = bulkheads.entry(resource_id.to_string()).or_insert(0);
        if *count >= max_concurrency {
            return None;
        }
        *count += 1;
        Some(BulkheadPermit {
            registry: self,
            resource_id: resource_id.to_string(),
        })
    }

    fn release(&self, resource_id: &str) {
        let mut bulkheads = self.bulkheads.lock();
        if let Some(count) = bulkheads.get_mut(resource_id) {
            *count = count.saturating_sub(1);
            // an empty bulkhead carries no state worth keeping
            if *count == 0 {
                bulkheads.remove(resource_id);
            }
        }
    }
}

/// A held bulkhead slot, returned to the registry on drop
#[derive(Debug)]
pub struct BulkheadPermit<'a> {
    registry: &'a ResilienceRegistry,
    resource_id: String,
}

impl Drop for BulkheadPermit<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.resource_id);
    }
}
