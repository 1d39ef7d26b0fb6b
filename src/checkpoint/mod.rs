//! # Checkpoint Tracing
//!
//! [`CheckpointSaver`] is the contract a durable checkpoint backend implements.
//! [`CheckpointTracer::wrap_saver`] returns a [`TracedCheckpointSaver`] exposing
//! the same contract; every call through it becomes one [`CheckpointOperation`]
//! with timing, size and outcome.
//!
//! List operations stay lazy: the operation is finalized when the caller
//! exhausts the iterator or stream, hits an error item, or drops it. An async
//! call whose future is dropped mid-flight is recorded as cancelled.

pub mod saver;
pub mod tracer;

pub use saver::{
    CheckpointIter, CheckpointSaver, CheckpointStream, CheckpointTuple, InMemoryCheckpointSaver,
    RunnableConfig,
};
pub use tracer::{
    CheckpointOperation, CheckpointOperationKind, CheckpointStats, CheckpointTracer,
    TracedCheckpointIter, TracedCheckpointSaver, TracedCheckpointStream,
};
