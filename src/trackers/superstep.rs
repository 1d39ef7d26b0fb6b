use crate::clock::{Clock, SystemClock};
use crate::history::History;
use crate::serializer::SafeSerializer;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Error raised by a node inside a superstep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperstepError {
    pub node: String,
    pub error_type: String,
    pub error_message: String,
}

/// One synchronous execution round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Superstep {
    /// 1-based, monotonic within a run
    pub number: u64,
    pub nodes_executed: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub errors: Vec<SuperstepError>,
    pub state_before_bytes: Option<usize>,
    pub state_after_bytes: Option<usize>,
}

impl Superstep {
    pub fn is_sealed(&self) -> bool {
        self.end_time.is_some()
    }

    /// `None` while the superstep is still active
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperstepStats {
    pub total_supersteps: usize,
    pub total_nodes_executed: usize,
    pub avg_nodes_per_superstep: f64,
    pub total_errors: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
}

#[derive(Debug, Default)]
struct Inner {
    counter: u64,
    active: Option<Superstep>,
    history: History<Superstep>,
}

/// Tracks `Idle -> Active -> Idle` superstep rounds for the current run
pub struct SuperstepTracker {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl SuperstepTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Clear counter, active superstep and history for a new run
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counter = 0;
        inner.active = None;
        inner.history.clear();
    }

    /// Open the next superstep. An already active superstep is abandoned, not
    /// sealed; callers end supersteps explicitly.
    pub fn start_superstep(&self, state_before: Option<&Value>) -> Superstep {
        let state_before_bytes = state_before.map(SafeSerializer::estimate_size);
        let start_time = self.clock.now();

        let mut inner = self.inner.lock();
        inner.counter += 1;
        let superstep = Superstep {
            number: inner.counter,
            nodes_executed: Vec::new(),
            start_time,
            end_time: None,
            errors: Vec::new(),
            state_before_bytes,
            state_after_bytes: None,
        };

        if let Some(abandoned) = inner.active.replace(superstep.clone()) {
            warn!(
                abandoned = abandoned.number,
                started = superstep.number,
                "Superstep started while another was active; previous superstep was never ended"
            );
        }

        debug!(superstep = superstep.number, "Superstep started");
        superstep
    }

    /// No-op when no superstep is active
    pub fn record_node_execution(&self, node: &str) {
        let mut inner = self.inner.lock();
        if let Some(active) = inner.active.as_mut() {
            active.nodes_executed.push(node.to_string());
        }
    }

    /// No-op when no superstep is active
    pub fn record_error(&self, node: &str, error_type: &str, error_message: &str) {
        let mut inner = self.inner.lock();
        if let Some(active) = inner.active.as_mut() {
            active.errors.push(SuperstepError {
                node: node.to_string(),
                error_type: error_type.to_string(),
                error_message: error_message.to_string(),
            });
        }
    }

    /// Record an error using the error's type name as `error_type`
    pub fn record_error_from<E: std::fmt::Display + ?Sized>(&self, node: &str, error: &E) {
        self.record_error(node, short_type_name::<E>(), &error.to_string());
    }

    /// Seal and archive the active superstep; `None` (and no history change)
    /// when nothing is active
    pub fn end_superstep(&self, state_after: Option<&Value>) -> Option<Superstep> {
        let state_after_bytes = state_after.map(SafeSerializer::estimate_size);
        let end_time = self.clock.now();

        let mut inner = self.inner.lock();
        let mut superstep = inner.active.take()?;
        superstep.end_time = Some(end_time);
        superstep.state_after_bytes = state_after_bytes;
        inner.history.push(superstep.clone());

        debug!(
            superstep = superstep.number,
            nodes = superstep.nodes_executed.len(),
            errors = superstep.errors.len(),
            "Superstep ended"
        );
        Some(superstep)
    }

    pub fn current_superstep(&self) -> Option<Superstep> {
        self.inner.lock().active.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// Whether `node` already ran in the active superstep
    pub fn active_contains(&self, node: &str) -> bool {
        self.inner
            .lock()
            .active
            .as_ref()
            .is_some_and(|s| s.nodes_executed.iter().any(|n| n == node))
    }

    pub fn history(&self) -> Vec<Superstep> {
        self.inner.lock().history.to_vec()
    }

    /// `None` when no superstep has been sealed
    pub fn stats(&self) -> Option<SuperstepStats> {
        let inner = self.inner.lock();
        if inner.history.is_empty() {
            return None;
        }

        let total_supersteps = inner.history.len();
        let total_nodes_executed: usize =
            inner.history.iter().map(|s| s.nodes_executed.len()).sum();
        let total_errors: usize = inner.history.iter().map(|s| s.errors.len()).sum();
        let durations: Vec<i64> = inner.history.iter().filter_map(Superstep::duration_ms).collect();
        let avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };

        Some(SuperstepStats {
            total_supersteps,
            total_nodes_executed,
            avg_nodes_per_superstep: total_nodes_executed as f64 / total_supersteps as f64,
            total_errors,
            avg_duration_ms,
            max_duration_ms: durations.into_iter().max().unwrap_or(0),
        })
    }
}

impl Default for SuperstepTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SuperstepTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SuperstepTracker")
            .field("counter", &inner.counter)
            .field("active", &inner.active.as_ref().map(|s| s.number))
            .field("history", &inner.history.len())
            .finish()
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_supersteps_are_numbered_from_one() {
        let tracker = SuperstepTracker::new();
        for expected in 1..=3 {
            let step = tracker.start_superstep(None);
            assert_eq!(step.number, expected);
            tracker.record_node_execution("worker");
            tracker.end_superstep(None);
        }
        let numbers: Vec<u64> = tracker.history().iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_end_without_active_returns_none() {
        let tracker = SuperstepTracker::new();
        assert!(tracker.end_superstep(None).is_none());
        assert!(tracker.history().is_empty());
        assert!(tracker.stats().is_none());
    }

    #[test]
    fn test_records_without_active_are_noops() {
        let tracker = SuperstepTracker::new();
        tracker.record_node_execution("orphan");
        tracker.record_error("orphan", "ValueError", "boom");
        assert!(tracker.current_superstep().is_none());
    }

    #[test]
    fn test_stats_and_duration() {
        let clock = Arc::new(ManualClock::starting_now());
        let tracker = SuperstepTracker::with_clock(clock.clone());

        tracker.start_superstep(Some(&json!({"x": 1})));
        tracker.record_node_execution("a");
        tracker.record_node_execution("b");
        clock.advance(Duration::milliseconds(40));
        let first = tracker.end_superstep(Some(&json!({"x": 2}))).unwrap();
        assert_eq!(first.duration_ms(), Some(40));

        tracker.start_superstep(None);
        tracker.record_node_execution("c");
        tracker.record_error("c", "Timeout", "llm timed out");
        clock.advance(Duration::milliseconds(20));
        tracker.end_superstep(None);

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.total_supersteps, 2);
        assert_eq!(stats.total_nodes_executed, 3);
        assert!((stats.avg_nodes_per_superstep - 1.5).abs() < f64::EPSILON);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.max_duration_ms, 40);
    }

    #[test]
    fn test_start_while_active_abandons_previous() {
        let tracker = SuperstepTracker::new();
        tracker.start_superstep(None);
        let second = tracker.start_superstep(None);
        assert_eq!(second.number, 2);
        assert_eq!(tracker.end_superstep(None).unwrap().number, 2);
        assert_eq!(tracker.history().len(), 1);
    }

    #[test]
    fn test_record_error_from_uses_type_name() {
        let tracker = SuperstepTracker::new();
        tracker.start_superstep(None);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        tracker.record_error_from("saver", &err);
        let step = tracker.end_superstep(None).unwrap();
        assert_eq!(step.errors[0].error_type, "Error");
        assert_eq!(step.errors[0].error_message, "disk");
    }
}
