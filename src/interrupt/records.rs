use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A suspension of one thread's execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRecord {
    pub interrupt_id: String,
    pub thread_id: String,
    pub node_name: String,
    pub reason: String,
    pub is_intentional: bool,
    pub timestamp: DateTime<Utc>,
    pub state_snapshot: Option<String>,
    /// Trace/span of the observation active when execution halted
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

/// A continuation of a thread, correlated with its interrupt when one was pending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub resume_id: String,
    pub thread_id: String,
    pub resume_input: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Only set when `from_interrupt`; never negative
    pub wait_duration_seconds: Option<f64>,
    pub from_interrupt: bool,
    pub interrupt_id: Option<String>,
    pub previous_trace_id: Option<String>,
    pub previous_span_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    /// Free-form: "approved", "rejected", "modified", ...
    pub decision: String,
    pub thread_id: Option<String>,
    pub approver_id: Option<String>,
    pub feedback: Option<String>,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptStats {
    pub total_interrupts: usize,
    pub intentional_interrupts: usize,
    pub error_interrupts: usize,
    pub pending_interrupts: usize,
    pub total_resumes: usize,
    pub correlated_resumes: usize,
    /// Resumes with no pending interrupt (first start or lost correlation)
    pub orphaned_resumes: usize,
    pub avg_wait_duration_seconds: Option<f64>,
    pub max_wait_duration_seconds: Option<f64>,
    pub total_human_decisions: usize,
    pub decisions_by_type: BTreeMap<String, usize>,
}
