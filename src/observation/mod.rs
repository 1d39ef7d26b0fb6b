//! # Observation Records
//!
//! The structured output contract of the engine. Every tracked operation
//! produces an [`ObservationRecord`] delivered to an [`ObservationSink`], and
//! interrupt/resume/decision calls may additionally annotate a caller-supplied
//! [`Observation`] (the host's current trace/span context).
//!
//! Transport of the records to a telemetry backend belongs to the host; the
//! sinks here only fan records out in-process.

pub mod handle;
pub mod publisher;
pub mod record;

pub use handle::{Observation, OtelObservation, RecordingObservation};
pub use publisher::{CollectingSink, NoopSink, ObservationPublisher, ObservationSink};
pub use record::{AttributeValue, ObservationKind, ObservationRecord, ObservationStatus};
