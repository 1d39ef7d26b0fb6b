#![allow(clippy::doc_markdown)] // Allow technical terms like LangGraph, OpenTelemetry in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Graph Trace Core
//!
//! Execution tracing and correlation for stateful, interruptible graph
//! workflows (LangGraph-style state graphs).
//!
//! ## Overview
//!
//! A graph workflow runs as a sequence of supersteps; each node receives the
//! shared state and returns a partial update that reducers merge back in. Runs
//! may suspend for human input and resume later from a durable checkpoint,
//! possibly in another process. This crate observes all of that without ever
//! changing what the host sees: wrapped callables return the host's own
//! results and errors untouched, and tracking failures never fail the workflow.
//!
//! ## Module Organization
//!
//! - [`execution`] - the [`ExecutionTracer`] engine root and run/node wrappers
//! - [`topology`] - static graph shape capture and rendering
//! - [`trackers`] - state transitions, reducer attribution, supersteps, cost
//! - [`checkpoint`] - traced checkpoint backends
//! - [`interrupt`] - interrupt/resume correlation and human decisions
//! - [`multi_agent`] - agent messages, conversations and supervisor routing
//! - [`observation`] - observation handles, records and sinks
//! - [`serializer`] - bounded, never-failing value rendering
//! - [`config`] - layered configuration
//! - [`logging`] - structured `tracing` setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graph_trace_core::{ExecutionTracer, RunnableConfig};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tracer = Arc::new(ExecutionTracer::builder().build()?);
//! tracer.register_reducer("messages", "add_messages");
//!
//! let agent = tracer.wrap_node(
//!     "agent",
//!     |state: &Value| -> Result<Value, String> {
//!         Ok(json!({"messages": [state["question"].clone()]}))
//!     },
//!     true,
//! );
//! let invoke = tracer.wrap_invoke(|input: Value, _config: &RunnableConfig| agent(&input));
//!
//! invoke(json!({"question": "hi", "messages": []}), &RunnableConfig::for_thread("t-1"))?;
//! println!("{:#?}", tracer.summary());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod history;
pub mod interrupt;
pub mod logging;
pub mod multi_agent;
pub mod observation;
pub mod serializer;
pub mod topology;
pub mod trackers;

pub use checkpoint::{
    CheckpointOperation, CheckpointOperationKind, CheckpointSaver, CheckpointStats,
    CheckpointTracer, CheckpointTuple, InMemoryCheckpointSaver, RunnableConfig,
    TracedCheckpointSaver,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TracerConfig;
pub use error::{Result, TracerError};
pub use execution::{
    ExecutionMode, ExecutionRun, ExecutionSummary, ExecutionTracer, ExecutionTracerBuilder,
    NodeStats,
};
pub use interrupt::{HumanDecision, InterruptRecord, InterruptResumeCorrelator, InterruptStats, ResumeRecord};
pub use multi_agent::{AgentMessage, MultiAgentCorrelator, MultiAgentStats, SupervisorDecision};
pub use observation::{
    AttributeValue, CollectingSink, NoopSink, Observation, ObservationKind, ObservationPublisher,
    ObservationRecord, ObservationSink, ObservationStatus, RecordingObservation,
};
pub use serializer::SafeSerializer;
pub use topology::{ConditionalEdge, GraphIntrospectable, GraphTopology, TopologyRecorder, TopologyStats};
pub use trackers::{
    CostAccumulator, ModelPricing, PricingTable, ReducerAttributor, StateTransitionTracker,
    SuperstepTracker,
};
