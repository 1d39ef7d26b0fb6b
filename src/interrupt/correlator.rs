use super::records::{HumanDecision, InterruptRecord, InterruptStats, ResumeRecord};
use crate::clock::{seconds_between, Clock, SystemClock};
use crate::config::TracerConfig;
use crate::constants::interrupt as keys;
use crate::history::History;
use crate::logging::log_interrupt_operation;
use crate::observation::{
    NoopSink, Observation, ObservationKind, ObservationRecord, ObservationSink,
    ObservationStatus,
};
use crate::serializer::SafeSerializer;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Inner {
    /// At most one unresolved suspension per thread; most recent wins
    pending: HashMap<String, InterruptRecord>,
    interrupts: History<InterruptRecord>,
    resumes: History<ResumeRecord>,
    decisions: History<HumanDecision>,
}

/// Links an interrupt to its eventual resume on the same thread.
///
/// The resume may come much later, in another process, or never. A resume with
/// nothing pending is reported as data (`from_interrupt == false`), never as an
/// error, and an intentional interrupt always leaves the observation successful.
pub struct InterruptResumeCorrelator {
    inner: Mutex<Inner>,
    serializer: SafeSerializer,
    capture_state_snapshots: bool,
    sink: Arc<dyn ObservationSink>,
    clock: Arc<dyn Clock>,
}

impl InterruptResumeCorrelator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::from_config(&TracerConfig::default(), Arc::new(NoopSink), clock)
    }

    pub fn from_config(
        config: &TracerConfig,
        sink: Arc<dyn ObservationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                interrupts: History::new(config.max_event_history),
                resumes: History::new(config.max_event_history),
                decisions: History::new(config.max_event_history),
            }),
            serializer: SafeSerializer::new(config.max_serialized_length),
            capture_state_snapshots: config.capture_state_snapshots,
            sink,
            clock,
        }
    }

    /// Record a suspension of `thread_id` at `node_name`.
    ///
    /// An active `observation` has its trace/span ids captured and, for an
    /// intentional interrupt, its status set to success.
    pub fn on_interrupt(
        &self,
        thread_id: &str,
        node_name: &str,
        reason: &str,
        state: Option<&Value>,
        observation: Option<&dyn Observation>,
        is_intentional: bool,
    ) -> InterruptRecord {
        let observation = observation.filter(|obs| obs.is_active());
        let (trace_id, span_id) = match observation {
            Some(obs) => (obs.trace_id(), obs.span_id()),
            None => (None, None),
        };

        let record = InterruptRecord {
            interrupt_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            node_name: node_name.to_string(),
            reason: reason.to_string(),
            is_intentional,
            timestamp: self.clock.now(),
            state_snapshot: state
                .filter(|_| self.capture_state_snapshots)
                .map(|s| self.serializer.serialize(s)),
            trace_id,
            span_id,
        };

        {
            let mut inner = self.inner.lock();
            if let Some(replaced) = inner.pending.insert(thread_id.to_string(), record.clone()) {
                debug!(
                    thread_id = %thread_id,
                    replaced = %replaced.interrupt_id,
                    "Pending interrupt replaced by a newer interrupt"
                );
            }
            inner.interrupts.push(record.clone());
        }

        if is_intentional {
            info!(thread_id = %thread_id, node = %node_name, reason = %reason, "Execution interrupted");
        } else {
            warn!(thread_id = %thread_id, node = %node_name, reason = %reason, "Execution interrupted unintentionally");
        }
        log_interrupt_operation(
            "interrupt",
            Some(thread_id),
            Some(node_name),
            if is_intentional { "success" } else { "error" },
            None,
            Some(reason),
        );

        if let Some(obs) = observation {
            obs.set_attribute(keys::INTERRUPT_ID, record.interrupt_id.as_str().into());
            obs.set_attribute(keys::THREAD_ID, thread_id.into());
            obs.set_attribute(keys::NODE, node_name.into());
            obs.set_attribute(keys::REASON, reason.into());
            obs.set_attribute(keys::IS_INTENTIONAL, is_intentional.into());
            if is_intentional {
                obs.set_status(ObservationStatus::Success, None);
            } else {
                obs.set_status(ObservationStatus::Error, Some(reason));
            }
        }

        self.sink.emit(interrupt_record(&record));
        record
    }

    /// Record a continuation of `thread_id`, consuming its pending interrupt if any
    pub fn on_resume(
        &self,
        thread_id: &str,
        resume_input: Option<&Value>,
        observation: Option<&dyn Observation>,
    ) -> ResumeRecord {
        let timestamp = self.clock.now();
        let resume_input = resume_input.map(|input| self.serializer.serialize(input));

        let record = {
            let mut inner = self.inner.lock();
            let matched = inner.pending.remove(thread_id);
            let record = match matched {
                Some(interrupt) => ResumeRecord {
                    resume_id: Uuid::new_v4().to_string(),
                    thread_id: thread_id.to_string(),
                    resume_input,
                    timestamp,
                    wait_duration_seconds: Some(seconds_between(interrupt.timestamp, timestamp).max(0.0)),
                    from_interrupt: true,
                    interrupt_id: Some(interrupt.interrupt_id),
                    previous_trace_id: interrupt.trace_id,
                    previous_span_id: interrupt.span_id,
                },
                None => ResumeRecord {
                    resume_id: Uuid::new_v4().to_string(),
                    thread_id: thread_id.to_string(),
                    resume_input,
                    timestamp,
                    wait_duration_seconds: None,
                    from_interrupt: false,
                    interrupt_id: None,
                    previous_trace_id: None,
                    previous_span_id: None,
                },
            };
            inner.resumes.push(record.clone());
            record
        };

        if record.from_interrupt {
            info!(
                thread_id = %thread_id,
                interrupt_id = ?record.interrupt_id,
                wait_duration_seconds = ?record.wait_duration_seconds,
                "Execution resumed from interrupt"
            );
        } else {
            info!(thread_id = %thread_id, "Execution resumed without a pending interrupt");
        }
        log_interrupt_operation(
            "resume",
            Some(thread_id),
            None,
            "success",
            record.wait_duration_seconds,
            None,
        );

        if let Some(obs) = observation.filter(|obs| obs.is_active()) {
            obs.set_attribute(keys::RESUME_ID, record.resume_id.as_str().into());
            obs.set_attribute(keys::THREAD_ID, thread_id.into());
            obs.set_attribute(keys::FROM_INTERRUPT, record.from_interrupt.into());
            if let Some(id) = &record.interrupt_id {
                obs.set_attribute(keys::INTERRUPT_ID, id.into());
            }
            if let Some(wait) = record.wait_duration_seconds {
                obs.set_attribute(keys::WAIT_DURATION_SECONDS, wait.into());
            }
            if let Some(trace_id) = &record.previous_trace_id {
                obs.set_attribute(keys::PREVIOUS_TRACE_ID, trace_id.into());
            }
            if let Some(span_id) = &record.previous_span_id {
                obs.set_attribute(keys::PREVIOUS_SPAN_ID, span_id.into());
            }
            obs.set_status(ObservationStatus::Success, None);
        }

        let trace_context = observation
            .filter(|obs| obs.is_active())
            .map(|obs| (obs.trace_id(), obs.span_id()))
            .unwrap_or((None, None));
        self.sink.emit(resume_record(&record, trace_context));
        record
    }

    /// Record a human decision; independent of interrupt/resume pairing
    pub fn record_human_decision(
        &self,
        decision: &str,
        thread_id: Option<&str>,
        approver_id: Option<&str>,
        feedback: Option<&str>,
        metadata: Option<Map<String, Value>>,
        observation: Option<&dyn Observation>,
    ) -> HumanDecision {
        let record = HumanDecision {
            decision: decision.to_string(),
            thread_id: thread_id.map(str::to_string),
            approver_id: approver_id.map(str::to_string),
            feedback: feedback.map(|f| self.serializer.truncate(f)),
            metadata: metadata.unwrap_or_default(),
            timestamp: self.clock.now(),
        };
        self.inner.lock().decisions.push(record.clone());

        info!(decision = %decision, thread_id = ?thread_id, approver_id = ?approver_id, "Human decision recorded");

        if let Some(obs) = observation.filter(|obs| obs.is_active()) {
            obs.set_attribute(keys::DECISION, decision.into());
            if let Some(thread_id) = thread_id {
                obs.set_attribute(keys::THREAD_ID, thread_id.into());
            }
            if let Some(approver) = approver_id {
                obs.set_attribute(keys::APPROVER_ID, approver.into());
            }
            if let Some(feedback) = &record.feedback {
                obs.set_attribute(keys::FEEDBACK, feedback.into());
            }
        }

        let mut emitted = ObservationRecord::new(
            ObservationKind::HumanDecision,
            "human_decision",
            record.timestamp,
        )
        .with_attribute(keys::DECISION, decision)
        .with_optional_attribute(keys::THREAD_ID, thread_id)
        .with_optional_attribute(keys::APPROVER_ID, approver_id)
        .with_optional_attribute(keys::FEEDBACK, record.feedback.clone());
        for (key, value) in &record.metadata {
            emitted = emitted.with_metadata(key, value.clone());
        }
        self.sink.emit(emitted);
        record
    }

    /// Snapshot of unresolved suspensions, keyed by thread id
    pub fn pending_interrupts(&self) -> BTreeMap<String, InterruptRecord> {
        self.inner
            .lock()
            .pending
            .iter()
            .map(|(thread_id, record)| (thread_id.clone(), record.clone()))
            .collect()
    }

    pub fn get_interrupt(&self, thread_id: &str) -> Option<InterruptRecord> {
        self.inner.lock().pending.get(thread_id).cloned()
    }

    pub fn interrupt_history(&self) -> Vec<InterruptRecord> {
        self.inner.lock().interrupts.to_vec()
    }

    pub fn resume_history(&self) -> Vec<ResumeRecord> {
        self.inner.lock().resumes.to_vec()
    }

    pub fn human_decisions(&self) -> Vec<HumanDecision> {
        self.inner.lock().decisions.to_vec()
    }

    pub fn decisions_for_thread(&self, thread_id: &str) -> Vec<HumanDecision> {
        self.inner
            .lock()
            .decisions
            .iter()
            .filter(|d| d.thread_id.as_deref() == Some(thread_id))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> InterruptStats {
        let inner = self.inner.lock();

        let intentional = inner.interrupts.iter().filter(|i| i.is_intentional).count();
        let waits: Vec<f64> = inner
            .resumes
            .iter()
            .filter_map(|r| r.wait_duration_seconds)
            .collect();
        let correlated = inner.resumes.iter().filter(|r| r.from_interrupt).count();

        let mut decisions_by_type = BTreeMap::new();
        for decision in inner.decisions.iter() {
            *decisions_by_type.entry(decision.decision.clone()).or_insert(0) += 1;
        }

        InterruptStats {
            total_interrupts: inner.interrupts.len(),
            intentional_interrupts: intentional,
            error_interrupts: inner.interrupts.len() - intentional,
            pending_interrupts: inner.pending.len(),
            total_resumes: inner.resumes.len(),
            correlated_resumes: correlated,
            orphaned_resumes: inner.resumes.len() - correlated,
            avg_wait_duration_seconds: (!waits.is_empty())
                .then(|| waits.iter().sum::<f64>() / waits.len() as f64),
            max_wait_duration_seconds: waits.iter().copied().reduce(f64::max),
            total_human_decisions: inner.decisions.len(),
            decisions_by_type,
        }
    }

    /// Clear histories; in-flight suspensions stay pending
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.interrupts.clear();
        inner.resumes.clear();
        inner.decisions.clear();
    }

    /// Clear everything, including pending interrupts
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.interrupts.clear();
        inner.resumes.clear();
        inner.decisions.clear();
    }
}

impl Default for InterruptResumeCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptResumeCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("InterruptResumeCorrelator")
            .field("pending", &inner.pending.len())
            .field("interrupts", &inner.interrupts.len())
            .field("resumes", &inner.resumes.len())
            .field("decisions", &inner.decisions.len())
            .finish()
    }
}

fn interrupt_record(record: &InterruptRecord) -> ObservationRecord {
    let emitted = ObservationRecord::new(
        ObservationKind::Interrupt,
        format!("interrupt.{}", record.node_name),
        record.timestamp,
    )
    .with_trace_context(record.trace_id.clone(), record.span_id.clone())
    .with_attribute(keys::INTERRUPT_ID, &record.interrupt_id)
    .with_attribute(keys::THREAD_ID, &record.thread_id)
    .with_attribute(keys::NODE, &record.node_name)
    .with_attribute(keys::REASON, &record.reason)
    .with_attribute(keys::IS_INTENTIONAL, record.is_intentional)
    .with_optional_attribute(keys::STATE, record.state_snapshot.clone());

    if record.is_intentional {
        emitted
    } else {
        emitted.with_error(record.reason.clone())
    }
}

fn resume_record(
    record: &ResumeRecord,
    (trace_id, span_id): (Option<String>, Option<String>),
) -> ObservationRecord {
    let mut emitted = ObservationRecord::new(ObservationKind::Resume, "resume", record.timestamp)
        .with_trace_context(trace_id, span_id)
        .with_attribute(keys::RESUME_ID, &record.resume_id)
        .with_attribute(keys::THREAD_ID, &record.thread_id)
        .with_attribute(keys::FROM_INTERRUPT, record.from_interrupt)
        .with_optional_attribute(keys::INTERRUPT_ID, record.interrupt_id.clone())
        .with_optional_attribute(keys::WAIT_DURATION_SECONDS, record.wait_duration_seconds)
        .with_optional_attribute(keys::PREVIOUS_TRACE_ID, record.previous_trace_id.clone())
        .with_optional_attribute(keys::PREVIOUS_SPAN_ID, record.previous_span_id.clone())
        .with_optional_attribute(keys::RESUME_INPUT, record.resume_input.clone());
    if let Some(previous) = &record.previous_trace_id {
        emitted = emitted.with_metadata(
            "links",
            serde_json::json!([{
                "trace_id": previous,
                "span_id": record.previous_span_id,
            }]),
        );
    }
    emitted
}
