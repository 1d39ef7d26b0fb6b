//! # Graph Execution Tracing
//!
//! [`ExecutionTracer`] is the engine root. It owns every tracker, captures the
//! compiled graph's topology, and returns wrappers around the host's invoke,
//! stream and node callables:
//!
//! - `wrap_invoke` / `wrap_ainvoke` - one [`ExecutionRun`] per call
//! - `wrap_stream` / `wrap_astream` - lazy chunk sequences, closed on
//!   exhaustion, error or drop
//! - `wrap_node` / `wrap_async_node` - state transitions, reducer attribution,
//!   supersteps and token cost per node execution
//!
//! Results and errors always pass through unchanged.

pub mod run;
pub mod stream;
pub mod tracer;
pub mod usage;

pub use run::{ExecutionMode, ExecutionRun, NodeStats};
pub use stream::{TracedRunIter, TracedRunStream};
pub use tracer::{ExecutionSummary, ExecutionTracer, ExecutionTracerBuilder};
pub use usage::{extract_usage, UsageMetadata};
