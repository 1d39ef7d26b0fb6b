//! Timing, size and outcome metrics around checkpoint backend calls.

use super::saver::{CheckpointIter, CheckpointSaver, CheckpointStream, CheckpointTuple, RunnableConfig};
use crate::clock::{Clock, SystemClock};
use crate::constants::checkpoint as keys;
use crate::history::History;
use crate::observation::{NoopSink, ObservationKind, ObservationRecord, ObservationSink};
use crate::serializer::SafeSerializer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::{debug, error};

/// Error message recorded when a traced future is dropped before completing
pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointOperationKind {
    Save,
    Load,
    List,
}

impl fmt::Display for CheckpointOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Save => write!(f, "save"),
            Self::Load => write!(f, "load"),
            Self::List => write!(f, "list"),
        }
    }
}

/// One physical backend call; never mutated after completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointOperation {
    pub operation: CheckpointOperationKind,
    pub thread_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
    pub size_bytes: Option<usize>,
    pub success: bool,
    pub error: Option<String>,
    /// Load only: whether a checkpoint was returned
    pub found: Option<bool>,
    /// List only: items yielded before the sequence finished
    pub count: Option<usize>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub total_operations: usize,
    pub failed_operations: usize,
    pub save_count: usize,
    pub save_success_count: usize,
    pub load_count: usize,
    pub load_success_count: usize,
    pub load_hit_count: usize,
    pub list_count: usize,
    pub list_success_count: usize,
    pub average_save_duration_ms: f64,
    pub average_load_duration_ms: f64,
    pub average_list_duration_ms: f64,
    /// Mean size of saved checkpoints
    pub avg_checkpoint_size_bytes: f64,
    pub total_checkpoint_size_bytes: u64,
}

/// Records checkpoint operations and emits one observation record per call
pub struct CheckpointTracer {
    operations: Mutex<History<CheckpointOperation>>,
    sink: Arc<dyn ObservationSink>,
    clock: Arc<dyn Clock>,
}

impl CheckpointTracer {
    pub fn new() -> Self {
        Self::with_sink(None, Arc::new(NoopSink), Arc::new(SystemClock))
    }

    pub fn with_sink(
        max_history: Option<usize>,
        sink: Arc<dyn ObservationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            operations: Mutex::new(History::new(max_history)),
            sink,
            clock,
        }
    }

    /// Wrap a backend so every call through it is traced
    pub fn wrap_saver<S: CheckpointSaver>(self: &Arc<Self>, saver: S) -> TracedCheckpointSaver<S> {
        TracedCheckpointSaver {
            inner: saver,
            tracer: Arc::clone(self),
        }
    }

    /// Append a completed operation and emit its record
    pub fn record_operation(&self, operation: CheckpointOperation) {
        match &operation.error {
            Some(message) => error!(
                operation = %operation.operation,
                thread_id = ?operation.thread_id,
                error = %message,
                "Checkpoint operation failed"
            ),
            None => debug!(
                operation = %operation.operation,
                thread_id = ?operation.thread_id,
                duration_ms = operation.duration_ms,
                size_bytes = ?operation.size_bytes,
                "Checkpoint operation recorded"
            ),
        }

        let record = to_record(&operation);
        self.operations.lock().push(operation);
        self.sink.emit(record);
    }

    pub fn operations(&self) -> Vec<CheckpointOperation> {
        self.operations.lock().to_vec()
    }

    pub fn operations_for_thread(&self, thread_id: &str) -> Vec<CheckpointOperation> {
        self.operations
            .lock()
            .iter()
            .filter(|op| op.thread_id.as_deref() == Some(thread_id))
            .cloned()
            .collect()
    }

    /// `None` when no operation has been recorded
    pub fn get_stats(&self) -> Option<CheckpointStats> {
        let operations = self.operations.lock();
        if operations.is_empty() {
            return None;
        }

        use CheckpointOperationKind::{List, Load, Save};
        let count = |kind| of_kind(&operations, kind).count();
        let successes = |kind| of_kind(&operations, kind).filter(|op| op.success).count();
        let avg_duration = |kind| mean(of_kind(&operations, kind).map(|op| op.duration_ms));

        let sizes: Vec<usize> = of_kind(&operations, Save)
            .filter_map(|op| op.size_bytes)
            .collect();
        let total_size: u64 = sizes.iter().map(|s| *s as u64).sum();

        Some(CheckpointStats {
            total_operations: operations.len(),
            failed_operations: operations.iter().filter(|op| !op.success).count(),
            save_count: count(Save),
            save_success_count: successes(Save),
            load_count: count(Load),
            load_success_count: successes(Load),
            load_hit_count: of_kind(&operations, Load)
                .filter(|op| op.found == Some(true))
                .count(),
            list_count: count(List),
            list_success_count: successes(List),
            average_save_duration_ms: avg_duration(Save),
            average_load_duration_ms: avg_duration(Load),
            average_list_duration_ms: avg_duration(List),
            avg_checkpoint_size_bytes: mean(sizes.iter().map(|s| *s as f64)),
            total_checkpoint_size_bytes: total_size,
        })
    }

    pub fn reset(&self) {
        self.operations.lock().clear();
    }

    fn begin(
        self: &Arc<Self>,
        kind: CheckpointOperationKind,
        config: &RunnableConfig,
        is_async: bool,
    ) -> PendingOperation {
        PendingOperation {
            tracer: Arc::clone(self),
            started: Instant::now(),
            operation: Some(CheckpointOperation {
                operation: kind,
                thread_id: config.thread_id().map(str::to_string),
                checkpoint_id: config.checkpoint_id().map(str::to_string),
                timestamp: self.clock.now(),
                duration_ms: 0.0,
                size_bytes: None,
                success: false,
                error: None,
                found: None,
                count: None,
                is_async,
            }),
        }
    }
}

impl Default for CheckpointTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CheckpointTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointTracer")
            .field("operations", &self.operations.lock().len())
            .finish()
    }
}

fn of_kind(
    operations: &History<CheckpointOperation>,
    kind: CheckpointOperationKind,
) -> impl Iterator<Item = &CheckpointOperation> {
    operations.iter().filter(move |op| op.operation == kind)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn to_record(operation: &CheckpointOperation) -> ObservationRecord {
    let record = ObservationRecord::new(
        ObservationKind::Checkpoint,
        format!("checkpoint.{}", operation.operation),
        operation.timestamp,
    )
    .with_attribute(keys::OPERATION, operation.operation.to_string())
    .with_optional_attribute(keys::THREAD_ID, operation.thread_id.clone())
    .with_optional_attribute(keys::CHECKPOINT_ID, operation.checkpoint_id.clone())
    .with_optional_attribute(keys::SIZE_BYTES, operation.size_bytes)
    .with_optional_attribute(keys::FOUND, operation.found)
    .with_optional_attribute(keys::COUNT, operation.count)
    .with_attribute(keys::DURATION_MS, operation.duration_ms)
    .with_attribute(keys::ASYNC, operation.is_async);

    match &operation.error {
        Some(message) => record.with_error(message.clone()),
        None => record,
    }
}

/// An operation in flight. Dropping it unfinished records a cancellation.
struct PendingOperation {
    tracer: Arc<CheckpointTracer>,
    started: Instant,
    operation: Option<CheckpointOperation>,
}

impl PendingOperation {
    fn update(&mut self, f: impl FnOnce(&mut CheckpointOperation)) {
        if let Some(operation) = self.operation.as_mut() {
            f(operation);
        }
    }

    fn finish(mut self, error: Option<String>) {
        self.complete(error);
    }

    fn complete(&mut self, error: Option<String>) {
        if let Some(mut operation) = self.operation.take() {
            operation.duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
            operation.success = error.is_none();
            operation.error = error;
            self.tracer.record_operation(operation);
        }
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        self.complete(Some(CANCELLED.to_string()));
    }
}

/// A [`CheckpointSaver`] whose calls are recorded on a [`CheckpointTracer`].
/// Results and errors of the wrapped backend pass through unchanged.
pub struct TracedCheckpointSaver<S> {
    inner: S,
    tracer: Arc<CheckpointTracer>,
}

impl<S> TracedCheckpointSaver<S> {
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn tracer(&self) -> &Arc<CheckpointTracer> {
        &self.tracer
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: fmt::Debug> fmt::Debug for TracedCheckpointSaver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedCheckpointSaver")
            .field("inner", &self.inner)
            .finish()
    }
}

fn finish_put(
    mut pending: PendingOperation,
    result: &anyhow::Result<RunnableConfig>,
) {
    match result {
        Ok(saved) => {
            if let Some(id) = saved.checkpoint_id() {
                pending.update(|op| op.checkpoint_id = Some(id.to_string()));
            }
            pending.finish(None);
        }
        Err(e) => pending.finish(Some(e.to_string())),
    }
}

fn finish_get(
    mut pending: PendingOperation,
    result: &anyhow::Result<Option<CheckpointTuple>>,
) {
    match result {
        Ok(found) => {
            pending.update(|op| {
                op.found = Some(found.is_some());
                if let Some(tuple) = found {
                    op.size_bytes = Some(SafeSerializer::estimate_size(&tuple.checkpoint));
                    if op.checkpoint_id.is_none() {
                        op.checkpoint_id = tuple.config.checkpoint_id().map(str::to_string);
                    }
                }
            });
            pending.finish(None);
        }
        Err(e) => pending.finish(Some(e.to_string())),
    }
}

#[async_trait]
impl<S: CheckpointSaver> CheckpointSaver for TracedCheckpointSaver<S> {
    fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Value,
        metadata: &Value,
    ) -> anyhow::Result<RunnableConfig> {
        let mut pending = self.tracer.begin(CheckpointOperationKind::Save, config, false);
        let size = SafeSerializer::estimate_size(checkpoint);
        pending.update(|op| op.size_bytes = Some(size));

        let result = self.inner.put(config, checkpoint, metadata);
        finish_put(pending, &result);
        result
    }

    fn get(&self, config: &RunnableConfig) -> anyhow::Result<Option<CheckpointTuple>> {
        let pending = self.tracer.begin(CheckpointOperationKind::Load, config, false);
        let result = self.inner.get(config);
        finish_get(pending, &result);
        result
    }

    fn list(&self, config: &RunnableConfig, limit: Option<usize>) -> anyhow::Result<CheckpointIter> {
        let pending = self.tracer.begin(CheckpointOperationKind::List, config, false);
        match self.inner.list(config, limit) {
            Ok(inner) => Ok(Box::new(TracedCheckpointIter {
                inner,
                pending: Some(pending),
                count: 0,
            })),
            Err(e) => {
                pending.finish(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn aput(
        &self,
        config: &RunnableConfig,
        checkpoint: &Value,
        metadata: &Value,
    ) -> anyhow::Result<RunnableConfig> {
        let mut pending = self.tracer.begin(CheckpointOperationKind::Save, config, true);
        let size = SafeSerializer::estimate_size(checkpoint);
        pending.update(|op| op.size_bytes = Some(size));

        let result = self.inner.aput(config, checkpoint, metadata).await;
        finish_put(pending, &result);
        result
    }

    async fn aget(&self, config: &RunnableConfig) -> anyhow::Result<Option<CheckpointTuple>> {
        let pending = self.tracer.begin(CheckpointOperationKind::Load, config, true);
        let result = self.inner.aget(config).await;
        finish_get(pending, &result);
        result
    }

    async fn alist(
        &self,
        config: &RunnableConfig,
        limit: Option<usize>,
    ) -> anyhow::Result<CheckpointStream> {
        let pending = self.tracer.begin(CheckpointOperationKind::List, config, true);
        match self.inner.alist(config, limit).await {
            Ok(inner) => Ok(Box::pin(TracedCheckpointStream {
                inner,
                pending: Some(pending),
                count: 0,
            })),
            Err(e) => {
                pending.finish(Some(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Shared bookkeeping for the traced list iterator and stream
fn observe_item(
    pending: &mut Option<PendingOperation>,
    count: &mut usize,
    item: Option<&anyhow::Result<CheckpointTuple>>,
) {
    match item {
        Some(Ok(_)) => {
            if pending.is_some() {
                *count += 1;
            }
        }
        Some(Err(e)) => close_list(pending, *count, Some(e.to_string())),
        None => close_list(pending, *count, None),
    }
}

fn close_list(pending: &mut Option<PendingOperation>, count: usize, error: Option<String>) {
    if let Some(mut operation) = pending.take() {
        operation.update(|op| op.count = Some(count));
        operation.finish(error);
    }
}

/// Lazy list iterator; the operation is recorded when the sequence is
/// exhausted, yields an error, or is dropped early
pub struct TracedCheckpointIter {
    inner: CheckpointIter,
    pending: Option<PendingOperation>,
    count: usize,
}

impl Iterator for TracedCheckpointIter {
    type Item = anyhow::Result<CheckpointTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next();
        observe_item(&mut self.pending, &mut self.count, item.as_ref());
        item
    }
}

impl Drop for TracedCheckpointIter {
    fn drop(&mut self) {
        close_list(&mut self.pending, self.count, None);
    }
}

/// Async counterpart of [`TracedCheckpointIter`]
pub struct TracedCheckpointStream {
    inner: CheckpointStream,
    pending: Option<PendingOperation>,
    count: usize,
}

impl Stream for TracedCheckpointStream {
    type Item = anyhow::Result<CheckpointTuple>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(item) => {
                observe_item(&mut this.pending, &mut this.count, item.as_ref());
                Poll::Ready(item)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TracedCheckpointStream {
    fn drop(&mut self) {
        close_list(&mut self.pending, self.count, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointSaver;
    use crate::observation::CollectingSink;
    use serde_json::json;

    fn traced() -> (TracedCheckpointSaver<InMemoryCheckpointSaver>, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let tracer = Arc::new(CheckpointTracer::with_sink(
            None,
            sink.clone(),
            Arc::new(SystemClock),
        ));
        (tracer.wrap_saver(InMemoryCheckpointSaver::new()), sink)
    }

    struct FailingSaver;

    impl CheckpointSaver for FailingSaver {
        fn put(&self, _: &RunnableConfig, _: &Value, _: &Value) -> anyhow::Result<RunnableConfig> {
            anyhow::bail!("disk full")
        }

        fn get(&self, _: &RunnableConfig) -> anyhow::Result<Option<CheckpointTuple>> {
            anyhow::bail!("connection reset")
        }

        fn list(&self, _: &RunnableConfig, _: Option<usize>) -> anyhow::Result<CheckpointIter> {
            anyhow::bail!("connection reset")
        }
    }

    #[test]
    fn test_empty_stats_is_none() {
        assert!(CheckpointTracer::new().get_stats().is_none());
    }

    #[test]
    fn test_save_and_load_are_recorded() {
        let (saver, sink) = traced();
        let config = RunnableConfig::for_thread("t1");
        let checkpoint = json!({"id": "c1", "channel_values": {"messages": ["hi"]}});
        saver.put(&config, &checkpoint, &json!({})).unwrap();
        let loaded = saver.get(&config).unwrap();
        assert!(loaded.is_some());

        let operations = saver.tracer().operations();
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0].operation, CheckpointOperationKind::Save);
        assert_eq!(operations[0].checkpoint_id.as_deref(), Some("c1"));
        assert_eq!(
            operations[0].size_bytes,
            Some(SafeSerializer::estimate_size(&checkpoint))
        );
        assert_eq!(operations[1].found, Some(true));
        assert_eq!(sink.records_of(ObservationKind::Checkpoint).len(), 2);
    }

    #[test]
    fn test_load_not_found_is_success() {
        let (saver, _) = traced();
        let result = saver.get(&RunnableConfig::for_thread("missing")).unwrap();
        assert!(result.is_none());

        let op = &saver.tracer().operations()[0];
        assert!(op.success);
        assert_eq!(op.found, Some(false));
        assert!(op.size_bytes.is_none());
    }

    #[test]
    fn test_backend_error_is_recorded_and_returned_unchanged() {
        let tracer = Arc::new(CheckpointTracer::new());
        let saver = tracer.wrap_saver(FailingSaver);

        let err = saver
            .put(&RunnableConfig::for_thread("t1"), &json!({}), &json!({}))
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(saver.list(&RunnableConfig::for_thread("t1"), None).is_err());

        let stats = tracer.get_stats().unwrap();
        assert_eq!(stats.save_count, 1);
        assert_eq!(stats.save_success_count, 0);
        assert_eq!(stats.failed_operations, 2);
        assert_eq!(tracer.operations()[0].error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_list_is_recorded_after_exhaustion() {
        let (saver, _) = traced();
        let config = RunnableConfig::for_thread("t1");
        for i in 0..3 {
            saver.put(&config, &json!({"v": i}), &json!({})).unwrap();
        }

        let iter = saver.list(&config, None).unwrap();
        assert_eq!(saver.tracer().operations().len(), 3);
        let items: Vec<_> = iter.collect();
        assert_eq!(items.len(), 3);

        let list_op = saver.tracer().operations().pop().unwrap();
        assert_eq!(list_op.operation, CheckpointOperationKind::List);
        assert_eq!(list_op.count, Some(3));
        assert!(list_op.success);
    }

    #[test]
    fn test_list_dropped_early_records_partial_count() {
        let (saver, _) = traced();
        let config = RunnableConfig::for_thread("t1");
        for i in 0..4 {
            saver.put(&config, &json!({"v": i}), &json!({})).unwrap();
        }
        {
            let mut iter = saver.list(&config, None).unwrap();
            iter.next();
        }
        let list_op = saver.tracer().operations().pop().unwrap();
        assert_eq!(list_op.count, Some(1));
        assert!(list_op.success);
    }

    #[tokio::test]
    async fn test_async_operations_are_flagged() {
        let (saver, _) = traced();
        let config = RunnableConfig::for_thread("t1");
        saver.aput(&config, &json!({"v": 1}), &json!({})).await.unwrap();
        saver.aget(&config).await.unwrap();
        let listed: Vec<_> = saver.alist(&config, None).await.unwrap().collect().await;
        assert_eq!(listed.len(), 1);

        let operations = saver.tracer().operations();
        assert_eq!(operations.len(), 3);
        assert!(operations.iter().all(|op| op.is_async));
        assert_eq!(operations[2].count, Some(1));
    }

    struct SlowSaver;

    #[async_trait]
    impl CheckpointSaver for SlowSaver {
        fn put(&self, _: &RunnableConfig, _: &Value, _: &Value) -> anyhow::Result<RunnableConfig> {
            Ok(RunnableConfig::new())
        }

        fn get(&self, _: &RunnableConfig) -> anyhow::Result<Option<CheckpointTuple>> {
            Ok(None)
        }

        fn list(&self, _: &RunnableConfig, _: Option<usize>) -> anyhow::Result<CheckpointIter> {
            Ok(Box::new(std::iter::empty()))
        }

        async fn aput(
            &self,
            config: &RunnableConfig,
            _: &Value,
            _: &Value,
        ) -> anyhow::Result<RunnableConfig> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(config.clone())
        }
    }

    #[tokio::test]
    async fn test_cancelled_async_save_is_recorded() {
        let tracer = Arc::new(CheckpointTracer::new());
        let saver = tracer.wrap_saver(SlowSaver);
        let config = RunnableConfig::for_thread("t1");

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            saver.aput(&config, &json!({"v": 1}), &json!({})),
        )
        .await;
        assert!(outcome.is_err());

        let op = &tracer.operations()[0];
        assert!(!op.success);
        assert_eq!(op.error.as_deref(), Some(CANCELLED));
    }
}
