use crate::clock::{Clock, SystemClock};
use crate::history::History;
use crate::serializer::SafeSerializer;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// One before/after pair of workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Monotonic per run, survives ring-buffer eviction
    pub sequence: u64,
    pub node: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub before: String,
    pub after: String,
    pub before_size_bytes: usize,
    pub after_size_bytes: usize,
    /// Top-level keys present in both snapshots with different values.
    /// `"$"` when the snapshots are not both objects and differ.
    pub changed_keys: Vec<String>,
    pub added_keys: Vec<String>,
    pub removed_keys: Vec<String>,
}

impl StateTransition {
    pub fn has_changes(&self) -> bool {
        !(self.changed_keys.is_empty() && self.added_keys.is_empty() && self.removed_keys.is_empty())
    }
}

/// Best-effort snapshot footprint since the last reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub peak_bytes: usize,
    pub current_bytes: usize,
    pub average_bytes: f64,
    pub samples: usize,
}

#[derive(Debug)]
struct Inner {
    history: History<StateTransition>,
    sequence: u64,
    peak_bytes: usize,
    current_bytes: usize,
    total_bytes: u128,
    samples: usize,
}

/// Ring buffer of state transitions for the current run
pub struct StateTransitionTracker {
    inner: Mutex<Inner>,
    enable_memory_tracking: bool,
    serializer: SafeSerializer,
    clock: Arc<dyn Clock>,
}

impl StateTransitionTracker {
    pub fn new(max_history: usize, enable_memory_tracking: bool) -> Self {
        Self::with_clock(
            max_history,
            enable_memory_tracking,
            SafeSerializer::default(),
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        max_history: usize,
        enable_memory_tracking: bool,
        serializer: SafeSerializer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                history: History::bounded(max_history),
                sequence: 0,
                peak_bytes: 0,
                current_bytes: 0,
                total_bytes: 0,
                samples: 0,
            }),
            enable_memory_tracking,
            serializer,
            clock,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.history.clear();
        inner.sequence = 0;
        inner.peak_bytes = 0;
        inner.current_bytes = 0;
        inner.total_bytes = 0;
        inner.samples = 0;
    }

    /// Append a transition, evicting the oldest beyond `max_history`
    pub fn record_transition(
        &self,
        before: &Value,
        after: &Value,
        node: Option<&str>,
    ) -> StateTransition {
        let (changed_keys, added_keys, removed_keys) = diff_keys(before, after);
        let before_size_bytes = SafeSerializer::estimate_size(before);
        let after_size_bytes = SafeSerializer::estimate_size(after);
        let before_text = self.serializer.serialize(before);
        let after_text = self.serializer.serialize(after);
        let timestamp = self.clock.now();

        let mut inner = self.inner.lock();
        inner.sequence += 1;
        let transition = StateTransition {
            sequence: inner.sequence,
            node: node.map(str::to_string),
            timestamp,
            before: before_text,
            after: after_text,
            before_size_bytes,
            after_size_bytes,
            changed_keys,
            added_keys,
            removed_keys,
        };

        if self.enable_memory_tracking {
            inner.current_bytes = after_size_bytes;
            inner.peak_bytes = inner.peak_bytes.max(before_size_bytes).max(after_size_bytes);
            inner.total_bytes += after_size_bytes as u128;
            inner.samples += 1;
        }

        inner.history.push(transition.clone());

        debug!(
            sequence = transition.sequence,
            node = ?transition.node,
            changed = transition.changed_keys.len(),
            added = transition.added_keys.len(),
            removed = transition.removed_keys.len(),
            "State transition recorded"
        );

        transition
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.lock().history.to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().history.is_empty()
    }

    /// Total transitions recorded this run, including evicted ones
    pub fn total_recorded(&self) -> u64 {
        self.inner.lock().sequence
    }

    /// `None` when memory tracking is disabled or nothing was sampled
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        if !self.enable_memory_tracking {
            return None;
        }
        let inner = self.inner.lock();
        if inner.samples == 0 {
            return None;
        }
        Some(MemoryStats {
            peak_bytes: inner.peak_bytes,
            current_bytes: inner.current_bytes,
            average_bytes: inner.total_bytes as f64 / inner.samples as f64,
            samples: inner.samples,
        })
    }
}

impl std::fmt::Debug for StateTransitionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTransitionTracker")
            .field("enable_memory_tracking", &self.enable_memory_tracking)
            .field("len", &self.len())
            .finish()
    }
}

fn diff_keys(before: &Value, after: &Value) -> (Vec<String>, Vec<String>, Vec<String>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let mut changed = Vec::new();
            let mut added = Vec::new();
            for (key, value) in a {
                match b.get(key) {
                    Some(previous) if previous != value => changed.push(key.clone()),
                    Some(_) => {}
                    None => added.push(key.clone()),
                }
            }
            let removed = b
                .keys()
                .filter(|key| !a.contains_key(*key))
                .cloned()
                .collect();
            (changed, added, removed)
        }
        _ if before != after => (vec!["$".to_string()], Vec::new(), Vec::new()),
        _ => (Vec::new(), Vec::new(), Vec::new()),
    }
}
