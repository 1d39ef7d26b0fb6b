//! Caller-supplied observation handles.
//!
//! An [`Observation`] is the host's "current span": the correlator reads its
//! trace/span identifiers and writes correlation attributes and status onto it.
//! Handles are shared between the host and the engine, so every method takes
//! `&self` and implementations use interior mutability.

use super::record::{AttributeValue, ObservationStatus};
use opentelemetry::global::BoxedSpan;
use opentelemetry::trace::{Span, Status, Tracer};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Host trace/span context the engine can read from and annotate
pub trait Observation: Send + Sync {
    /// Whether the span is live and can accept annotations
    fn is_active(&self) -> bool;

    /// Trace identifier (hex), if known
    fn trace_id(&self) -> Option<String>;

    /// Span identifier (hex), if known
    fn span_id(&self) -> Option<String>;

    fn set_attribute(&self, key: &str, value: AttributeValue);

    fn set_status(&self, status: ObservationStatus, message: Option<&str>);
}

/// In-memory observation handle with generated W3C-sized identifiers
#[derive(Debug)]
pub struct RecordingObservation {
    name: String,
    trace_id: String,
    span_id: String,
    active: AtomicBool,
    attributes: Mutex<BTreeMap<String, AttributeValue>>,
    status: Mutex<Option<(ObservationStatus, Option<String>)>>,
}

impl RecordingObservation {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_ids(
            name,
            Uuid::new_v4().simple().to_string(),
            Uuid::new_v4().simple().to_string()[..16].to_string(),
        )
    }

    pub fn with_ids(
        name: impl Into<String>,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            active: AtomicBool::new(true),
            attributes: Mutex::new(BTreeMap::new()),
            status: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the span; later annotations are ignored by the engine
    pub fn end(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.attributes.lock().get(key).cloned()
    }

    pub fn attributes(&self) -> BTreeMap<String, AttributeValue> {
        self.attributes.lock().clone()
    }

    pub fn status(&self) -> Option<ObservationStatus> {
        self.status.lock().as_ref().map(|(status, _)| *status)
    }

    pub fn status_message(&self) -> Option<String> {
        self.status.lock().as_ref().and_then(|(_, message)| message.clone())
    }
}

impl Observation for RecordingObservation {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn trace_id(&self) -> Option<String> {
        Some(self.trace_id.clone())
    }

    fn span_id(&self) -> Option<String> {
        Some(self.span_id.clone())
    }

    fn set_attribute(&self, key: &str, value: AttributeValue) {
        self.attributes.lock().insert(key.to_string(), value);
    }

    fn set_status(&self, status: ObservationStatus, message: Option<&str>) {
        *self.status.lock() = Some((status, message.map(str::to_string)));
    }
}

/// Adapter over an OpenTelemetry span
pub struct OtelObservation {
    span: Mutex<BoxedSpan>,
}

impl OtelObservation {
    /// Start a span on the global tracer provider
    pub fn start(name: impl Into<String>) -> Self {
        let tracer = opentelemetry::global::tracer("graph-trace-core");
        Self::from_span(tracer.start(name.into()))
    }

    pub fn from_span(span: BoxedSpan) -> Self {
        Self {
            span: Mutex::new(span),
        }
    }

    pub fn end(&self) {
        self.span.lock().end();
    }
}

impl std::fmt::Debug for OtelObservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelObservation")
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .finish()
    }
}

impl Observation for OtelObservation {
    fn is_active(&self) -> bool {
        self.span.lock().span_context().is_valid()
    }

    fn trace_id(&self) -> Option<String> {
        let span = self.span.lock();
        let context = span.span_context();
        context
            .is_valid()
            .then(|| context.trace_id().to_string())
    }

    fn span_id(&self) -> Option<String> {
        let span = self.span.lock();
        let context = span.span_context();
        context.is_valid().then(|| context.span_id().to_string())
    }

    fn set_attribute(&self, key: &str, value: AttributeValue) {
        let kv = match value {
            AttributeValue::Bool(b) => KeyValue::new(key.to_string(), b),
            AttributeValue::Int(i) => KeyValue::new(key.to_string(), i),
            AttributeValue::Float(f) => KeyValue::new(key.to_string(), f),
            AttributeValue::String(s) => KeyValue::new(key.to_string(), s),
        };
        self.span.lock().set_attribute(kv);
    }

    fn set_status(&self, status: ObservationStatus, message: Option<&str>) {
        let otel_status = match status {
            ObservationStatus::Success => Status::Ok,
            ObservationStatus::Error => Status::error(message.unwrap_or("error").to_string()),
        };
        self.span.lock().set_status(otel_status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observation_ids() {
        let obs = RecordingObservation::new("graph.invoke");
        assert_eq!(obs.trace_id().unwrap().len(), 32);
        assert_eq!(obs.span_id().unwrap().len(), 16);
        assert!(obs.is_active());
        obs.end();
        assert!(!obs.is_active());
    }

    #[test]
    fn test_recording_observation_annotations() {
        let obs = RecordingObservation::new("approval");
        obs.set_attribute("decision", "approved".into());
        obs.set_status(ObservationStatus::Success, None);
        assert_eq!(obs.attribute("decision"), Some(AttributeValue::from("approved")));
        assert_eq!(obs.status(), Some(ObservationStatus::Success));
        assert!(obs.status_message().is_none());
    }

    #[test]
    fn test_otel_observation_without_provider_is_inactive() {
        let obs = OtelObservation::start("noop");
        assert!(!obs.is_active());
        assert!(obs.trace_id().is_none());
        obs.set_attribute("k", AttributeValue::Int(1));
        obs.set_status(ObservationStatus::Success, None);
        obs.end();
    }
}
