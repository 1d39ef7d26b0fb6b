//! The engine root: owns every tracker and wraps the host's graph callables.

use super::run::{ExecutionMode, ExecutionRun, NodeStats};
use super::stream::{TracedRunIter, TracedRunStream};
use super::usage::extract_usage;
use crate::checkpoint::{CheckpointSaver, CheckpointStats, CheckpointTracer, RunnableConfig, TracedCheckpointSaver};
use crate::clock::{Clock, SystemClock};
use crate::config::TracerConfig;
use crate::constants::{graph as graph_keys, node as node_keys};
use crate::history::History;
use crate::interrupt::{InterruptResumeCorrelator, InterruptStats};
use crate::logging::log_graph_operation;
use crate::multi_agent::{MultiAgentCorrelator, MultiAgentStats};
use crate::observation::{NoopSink, ObservationKind, ObservationRecord, ObservationSink};
use crate::serializer::SafeSerializer;
use crate::topology::{GraphIntrospectable, GraphTopology, TopologyRecorder, TopologyStats};
use crate::trackers::superstep::short_type_name;
use crate::trackers::{
    CostAccumulator, CostStats, CostTotals, MemoryStats, ModelPricing, PricingTable,
    ReducerAttributor, ReducerStats, StateTransitionTracker, SuperstepStats, SuperstepTracker,
};
use futures::future::BoxFuture;
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Snapshot of every tracker's statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub topology: Option<TopologyStats>,
    pub total_runs: usize,
    pub last_run: Option<ExecutionRun>,
    pub node_stats: BTreeMap<String, NodeStats>,
    pub memory: Option<MemoryStats>,
    pub supersteps: Option<SuperstepStats>,
    pub reducers: ReducerStats,
    pub cost: CostStats,
    pub cost_by_node: BTreeMap<String, CostTotals>,
    pub cost_by_model: BTreeMap<String, CostTotals>,
    pub checkpoints: Option<CheckpointStats>,
    pub interrupts: InterruptStats,
    pub multi_agent: MultiAgentStats,
}

/// Configures an [`ExecutionTracer`]
#[derive(Default)]
pub struct ExecutionTracerBuilder {
    config: Option<TracerConfig>,
    sink: Option<Arc<dyn ObservationSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ExecutionTracerBuilder {
    pub fn config(mut self, config: TracerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ObservationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and assemble the engine
    pub fn build(self) -> crate::error::Result<ExecutionTracer> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(ExecutionTracer::from_parts(
            config,
            self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        ))
    }
}

/// Tracing engine for one compiled graph.
///
/// Share it as `Arc<ExecutionTracer>`; the `wrap_*` methods return callables
/// with the host's own signature whose results and errors pass through
/// unchanged. Several engines may coexist in one process.
pub struct ExecutionTracer {
    config: TracerConfig,
    sink: Arc<dyn ObservationSink>,
    clock: Arc<dyn Clock>,
    serializer: SafeSerializer,
    topology_recorder: TopologyRecorder,
    topology: RwLock<Option<GraphTopology>>,
    state_tracker: StateTransitionTracker,
    superstep_tracker: SuperstepTracker,
    reducer_attributor: ReducerAttributor,
    cost_accumulator: CostAccumulator,
    checkpoint_tracer: Arc<CheckpointTracer>,
    interrupt_correlator: InterruptResumeCorrelator,
    multi_agent: MultiAgentCorrelator,
    node_stats: Mutex<BTreeMap<String, NodeStats>>,
    runs: Mutex<History<ExecutionRun>>,
}

impl ExecutionTracer {
    pub fn builder() -> ExecutionTracerBuilder {
        ExecutionTracerBuilder::default()
    }

    /// Engine with default configuration, no sink and the system clock
    pub fn new() -> Self {
        Self::from_parts(TracerConfig::default(), Arc::new(NoopSink), Arc::new(SystemClock))
    }

    fn from_parts(config: TracerConfig, sink: Arc<dyn ObservationSink>, clock: Arc<dyn Clock>) -> Self {
        let serializer = SafeSerializer::new(config.max_serialized_length);
        let pricing = Arc::new(PricingTable::from_map(&config.pricing));

        Self {
            serializer,
            topology_recorder: TopologyRecorder::new(),
            topology: RwLock::new(None),
            state_tracker: StateTransitionTracker::with_clock(
                config.max_state_history,
                config.enable_memory_tracking,
                serializer,
                Arc::clone(&clock),
            ),
            superstep_tracker: SuperstepTracker::with_clock(Arc::clone(&clock)),
            reducer_attributor: ReducerAttributor::with_clock(
                config.max_event_history,
                serializer,
                Arc::clone(&clock),
            ),
            cost_accumulator: CostAccumulator::new(pricing),
            checkpoint_tracer: Arc::new(CheckpointTracer::with_sink(
                config.max_event_history,
                Arc::clone(&sink),
                Arc::clone(&clock),
            )),
            interrupt_correlator: InterruptResumeCorrelator::from_config(
                &config,
                Arc::clone(&sink),
                Arc::clone(&clock),
            ),
            multi_agent: MultiAgentCorrelator::from_config(&config, Arc::clone(&sink), Arc::clone(&clock)),
            node_stats: Mutex::new(BTreeMap::new()),
            runs: Mutex::new(History::new(config.max_event_history)),
            sink,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn state_tracker(&self) -> &StateTransitionTracker {
        &self.state_tracker
    }

    pub fn superstep_tracker(&self) -> &SuperstepTracker {
        &self.superstep_tracker
    }

    pub fn reducer_attributor(&self) -> &ReducerAttributor {
        &self.reducer_attributor
    }

    pub fn cost_accumulator(&self) -> &CostAccumulator {
        &self.cost_accumulator
    }

    pub fn checkpoint_tracer(&self) -> &Arc<CheckpointTracer> {
        &self.checkpoint_tracer
    }

    pub fn interrupts(&self) -> &InterruptResumeCorrelator {
        &self.interrupt_correlator
    }

    pub fn multi_agent(&self) -> &MultiAgentCorrelator {
        &self.multi_agent
    }

    pub fn register_reducer(&self, field: impl Into<String>, reducer: impl Into<String>) {
        self.reducer_attributor.register_reducer(field, reducer);
    }

    pub fn register_pricing(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.cost_accumulator.pricing().register(model, pricing);
    }

    pub fn wrap_checkpoint_saver<S: CheckpointSaver>(&self, saver: S) -> TracedCheckpointSaver<S> {
        self.checkpoint_tracer.wrap_saver(saver)
    }

    // =========================================================================
    // Topology
    // =========================================================================

    /// Capture and keep the static shape of `graph`
    pub fn capture_topology(&self, graph: &dyn GraphIntrospectable) -> GraphTopology {
        let topology = self.topology_recorder.capture(graph);
        *self.topology.write() = Some(topology.clone());

        let stats = topology.stats();
        self.sink.emit(
            ObservationRecord::new(ObservationKind::Graph, "graph.compile", topology.captured_at)
                .with_attribute(graph_keys::NODE_COUNT, stats.node_count)
                .with_attribute(graph_keys::EDGE_COUNT, stats.edge_count)
                .with_attribute(graph_keys::CONDITIONAL_EDGE_COUNT, stats.conditional_edge_count)
                .with_optional_attribute(graph_keys::ENTRY_POINT, topology.entry_point.clone()),
        );
        log_graph_operation("compile", None, None, "success", None, None);
        topology
    }

    pub fn topology(&self) -> Option<GraphTopology> {
        self.topology.read().clone()
    }

    /// Wrap the host's compile function; the compiled graph's topology is
    /// captured on success
    pub fn wrap_compile<A, G, E, F>(self: &Arc<Self>, compile: F) -> impl Fn(A) -> Result<G, E>
    where
        F: Fn(A) -> Result<G, E>,
        G: GraphIntrospectable,
    {
        let tracer = Arc::clone(self);
        move |args: A| {
            let graph = compile(args)?;
            tracer.capture_topology(&graph);
            Ok(graph)
        }
    }

    // =========================================================================
    // Runs
    // =========================================================================

    pub fn wrap_invoke<F, I, O, E>(self: &Arc<Self>, invoke: F) -> impl Fn(I, &RunnableConfig) -> Result<O, E>
    where
        F: Fn(I, &RunnableConfig) -> Result<O, E>,
        I: Serialize,
        O: Serialize,
        E: fmt::Display,
    {
        let tracer = Arc::clone(self);
        move |input: I, config: &RunnableConfig| {
            let run = tracer.begin_run(ExecutionMode::Invoke, config.thread_id(), &input);
            let result = invoke(input, config);
            match &result {
                Ok(output) => run.finish_ok(output),
                Err(e) => run.finish_err(e),
            }
            result
        }
    }

    pub fn wrap_ainvoke<F, Fut, I, O, E>(
        self: &Arc<Self>,
        ainvoke: F,
    ) -> impl Fn(I, RunnableConfig) -> BoxFuture<'static, Result<O, E>>
    where
        F: Fn(I, RunnableConfig) -> Fut,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: Serialize,
        O: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let tracer = Arc::clone(self);
        move |input: I, config: RunnableConfig| {
            let run = tracer.begin_run(ExecutionMode::AInvoke, config.thread_id(), &input);
            let future = ainvoke(input, config);
            Box::pin(async move {
                let result = future.await;
                match &result {
                    Ok(output) => run.finish_ok(output),
                    Err(e) => run.finish_err(e),
                }
                result
            })
        }
    }

    /// Wrap a chunk iterator; the run closes when the iterator is exhausted,
    /// yields an error, or is dropped
    pub fn wrap_stream<F, S, I, O, E>(self: &Arc<Self>, stream: F) -> impl Fn(I, &RunnableConfig) -> TracedRunIter<S>
    where
        F: Fn(I, &RunnableConfig) -> S,
        S: Iterator<Item = Result<O, E>>,
        I: Serialize,
        O: Serialize,
        E: fmt::Display,
    {
        let tracer = Arc::clone(self);
        move |input: I, config: &RunnableConfig| {
            let run = tracer.begin_run(ExecutionMode::Stream, config.thread_id(), &input);
            TracedRunIter::new(stream(input, config), run)
        }
    }

    pub fn wrap_astream<F, St, I, O, E>(self: &Arc<Self>, astream: F) -> impl Fn(I, RunnableConfig) -> TracedRunStream<St>
    where
        F: Fn(I, RunnableConfig) -> St,
        St: Stream<Item = Result<O, E>>,
        I: Serialize,
        O: Serialize,
        E: fmt::Display,
    {
        let tracer = Arc::clone(self);
        move |input: I, config: RunnableConfig| {
            let run = tracer.begin_run(ExecutionMode::AStream, config.thread_id(), &input);
            TracedRunStream::new(astream(input, config), run)
        }
    }

    /// Reset per-run trackers and open a run
    pub(crate) fn begin_run<I: Serialize + ?Sized>(
        self: &Arc<Self>,
        mode: ExecutionMode,
        thread_id: Option<&str>,
        input: &I,
    ) -> RunGuard {
        self.state_tracker.reset();
        self.superstep_tracker.reset();
        self.reducer_attributor.reset();
        self.cost_accumulator.reset();

        let run = ExecutionRun {
            run_id: Uuid::new_v4().to_string(),
            mode,
            thread_id: thread_id.map(str::to_string),
            start_time: self.clock.now(),
            end_time: None,
            input: self.serializer.serialize(input),
            output: None,
            duration_ms: None,
            success: false,
            error_type: None,
            error: None,
            chunk_count: None,
            supersteps: 0,
            nodes_executed: 0,
            state_transitions: 0,
            total_cost: 0.0,
            total_tokens: 0,
        };
        debug!(run_id = %run.run_id, mode = %mode, thread_id = ?thread_id, "Graph run started");

        RunGuard {
            tracer: Arc::clone(self),
            run: Some(run),
            started: Instant::now(),
            chunk_count: mode.is_streaming().then_some(0),
            last_output: None,
        }
    }

    fn end_run(
        &self,
        mut run: ExecutionRun,
        elapsed: Duration,
        completion: RunCompletion,
    ) {
        self.superstep_tracker.end_superstep(completion.final_state.as_ref());

        run.end_time = Some(self.clock.now());
        run.duration_ms = Some(elapsed.as_secs_f64() * 1000.0);
        run.output = completion.output;
        run.chunk_count = completion.chunk_count;
        run.success = completion.error.is_none();
        if let Some((error_type, message)) = completion.error {
            run.error_type = Some(error_type);
            run.error = Some(message);
        }
        if let Some(stats) = self.superstep_tracker.stats() {
            run.supersteps = stats.total_supersteps;
            run.nodes_executed = stats.total_nodes_executed;
        }
        run.state_transitions = self.state_tracker.total_recorded();
        let cost = self.cost_accumulator.stats();
        run.total_cost = cost.total_cost;
        run.total_tokens = cost.total_input_tokens + cost.total_output_tokens;

        match &run.error {
            Some(message) => error!(
                run_id = %run.run_id,
                mode = %run.mode,
                thread_id = ?run.thread_id,
                error_type = ?run.error_type,
                error = %message,
                "Graph run failed"
            ),
            None => info!(
                run_id = %run.run_id,
                mode = %run.mode,
                thread_id = ?run.thread_id,
                duration_ms = ?run.duration_ms,
                supersteps = run.supersteps,
                nodes_executed = run.nodes_executed,
                "Graph run completed"
            ),
        }
        let mode = run.mode.to_string();
        log_graph_operation(
            "run",
            Some(mode.as_str()),
            run.thread_id.as_deref(),
            if run.success { "success" } else { "error" },
            run.duration_ms.map(|ms| ms as u64),
            run.error.as_deref(),
        );

        let record = self.run_record(&run);
        self.runs.lock().push(run);
        self.sink.emit(record);
    }

    fn run_record(&self, run: &ExecutionRun) -> ObservationRecord {
        let mut record = ObservationRecord::new(
            ObservationKind::Graph,
            format!("graph.{}", run.mode),
            run.start_time,
        )
        .with_attribute(graph_keys::EXECUTION_MODE, run.mode.to_string())
        .with_optional_attribute(graph_keys::THREAD_ID, run.thread_id.clone())
        .with_attribute(graph_keys::INPUT, &run.input)
        .with_optional_attribute(graph_keys::OUTPUT, run.output.clone())
        .with_optional_attribute(graph_keys::DURATION_MS, run.duration_ms)
        .with_attribute(graph_keys::SUPERSTEP_COUNT, run.supersteps)
        .with_attribute(graph_keys::NODES_EXECUTED, run.nodes_executed)
        .with_attribute(graph_keys::STATE_TRANSITIONS, run.state_transitions)
        .with_attribute(graph_keys::TOTAL_COST, run.total_cost)
        .with_attribute(graph_keys::TOTAL_TOKENS, run.total_tokens)
        .with_optional_attribute(graph_keys::STREAM_CHUNKS, run.chunk_count)
        .with_optional_attribute(
            graph_keys::PEAK_STATE_BYTES,
            self.state_tracker.memory_stats().map(|m| m.peak_bytes),
        )
        .with_metadata("run_id", Value::String(run.run_id.clone()));

        if let Some(topology) = self.topology.read().as_ref() {
            record = record
                .with_attribute(graph_keys::NODE_COUNT, topology.nodes.len())
                .with_attribute(graph_keys::EDGE_COUNT, topology.edges.len());
        }
        if let Some(message) = &run.error {
            record = record
                .with_optional_attribute(graph_keys::ERROR_TYPE, run.error_type.clone())
                .with_error(message.clone());
        }
        record
    }

    pub fn last_run(&self) -> Option<ExecutionRun> {
        self.runs.lock().last().cloned()
    }

    pub fn runs(&self) -> Vec<ExecutionRun> {
        self.runs.lock().to_vec()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Wrap a node function. The node receives the current state and returns
    /// its partial update.
    pub fn wrap_node<F, E>(
        self: &Arc<Self>,
        node_name: impl Into<String>,
        node: F,
        is_entry: bool,
    ) -> impl Fn(&Value) -> Result<Value, E>
    where
        F: Fn(&Value) -> Result<Value, E>,
        E: fmt::Display,
    {
        let tracer = Arc::clone(self);
        let node_name = node_name.into();
        move |state: &Value| {
            let call = tracer.begin_node(&node_name, is_entry, state);
            let result = node(state);
            match &result {
                Ok(update) => call.succeed(state, update),
                Err(e) => call.fail(short_type_name::<E>(), &e.to_string()),
            }
            result
        }
    }

    pub fn wrap_async_node<F, Fut, E>(
        self: &Arc<Self>,
        node_name: impl Into<String>,
        node: F,
        is_entry: bool,
    ) -> impl Fn(Value) -> BoxFuture<'static, Result<Value, E>>
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let tracer = Arc::clone(self);
        let node_name = node_name.into();
        move |state: Value| {
            let call = tracer.begin_node(&node_name, is_entry, &state);
            let before = state.clone();
            let future = node(state);
            Box::pin(async move {
                let result = future.await;
                match &result {
                    Ok(update) => call.succeed(&before, update),
                    Err(e) => call.fail(short_type_name::<E>(), &e.to_string()),
                }
                result
            })
        }
    }

    /// A new superstep starts at the entry node, when none is active, when the
    /// node already ran in the active superstep, or when the captured topology
    /// has an edge into it from a node of the active superstep
    fn begin_node(self: &Arc<Self>, node: &str, is_entry: bool, state: &Value) -> NodeCall {
        let active = self.superstep_tracker.current_superstep();
        let (is_entry, follows_active) = {
            let topology = self.topology.read();
            let is_entry = is_entry
                || topology.as_ref().and_then(|t| t.entry_point.as_deref()) == Some(node);
            let follows_active = match (topology.as_ref(), active.as_ref()) {
                (Some(topology), Some(active)) => active
                    .nodes_executed
                    .iter()
                    .any(|ran| topology.successors(ran).contains(&node)),
                _ => false,
            };
            (is_entry, follows_active)
        };

        let starts_superstep = match &active {
            None => true,
            Some(active) => {
                is_entry || follows_active || active.nodes_executed.iter().any(|ran| ran == node)
            }
        };
        if starts_superstep {
            self.superstep_tracker.end_superstep(Some(state));
            self.superstep_tracker.start_superstep(Some(state));
        }
        self.superstep_tracker.record_node_execution(node);
        let superstep = self.superstep_tracker.current_superstep().map(|s| s.number);

        debug!(node = %node, superstep = ?superstep, is_entry = is_entry, "Node started");
        NodeCall {
            tracer: Arc::clone(self),
            node: node.to_string(),
            is_entry,
            superstep,
            started: Instant::now(),
            finished: false,
        }
    }

    fn complete_node(&self, call: &NodeCall, outcome: NodeOutcome<'_>) {
        let node = call.node.as_str();
        let duration_ms = call.started.elapsed().as_secs_f64() * 1000.0;
        let mut record = ObservationRecord::new(ObservationKind::Node, format!("node.{node}"), self.clock.now())
            .with_attribute(node_keys::NAME, node)
            .with_attribute(node_keys::IS_ENTRY, call.is_entry)
            .with_optional_attribute(node_keys::SUPERSTEP, call.superstep)
            .with_attribute(node_keys::DURATION_MS, duration_ms);

        let success = match outcome {
            NodeOutcome::Updated { before, update } => {
                let after = merge_update(before, update);
                self.state_tracker.record_transition(before, &after, Some(node));

                let mut updated_fields = Vec::new();
                if let Value::Object(fields) = update {
                    for (field, new_value) in fields {
                        let old_value = before.get(field).unwrap_or(&Value::Null);
                        self.reducer_attributor
                            .attribute_change(field, old_value, new_value, node);
                        updated_fields.push(field.as_str());
                    }
                }
                for usage in extract_usage(update) {
                    self.cost_accumulator.track_llm_usage(
                        node,
                        &usage.model,
                        usage.input_tokens,
                        usage.output_tokens,
                        usage.cached_tokens,
                    );
                }

                debug!(node = %node, duration_ms = duration_ms, updated = ?updated_fields, "Node completed");
                record = record.with_attribute(node_keys::UPDATED_FIELDS, updated_fields.join(","));
                true
            }
            NodeOutcome::Failed { error_type, message } => {
                self.superstep_tracker.record_error(node, error_type, message);
                error!(node = %node, error_type = %error_type, error = %message, "Node execution failed");
                record = record
                    .with_attribute(graph_keys::ERROR_TYPE, error_type)
                    .with_error(message);
                false
            }
        };

        self.node_stats
            .lock()
            .entry(node.to_string())
            .or_default()
            .record(duration_ms, success, call.superstep);
        self.sink.emit(record);
    }

    pub fn node_stats(&self) -> BTreeMap<String, NodeStats> {
        self.node_stats.lock().clone()
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            topology: self.topology.read().as_ref().map(GraphTopology::stats),
            total_runs: self.runs.lock().len(),
            last_run: self.last_run(),
            node_stats: self.node_stats(),
            memory: self.state_tracker.memory_stats(),
            supersteps: self.superstep_tracker.stats(),
            reducers: self.reducer_attributor.stats(),
            cost: self.cost_accumulator.stats(),
            cost_by_node: self.cost_accumulator.get_cost_by_node(),
            cost_by_model: self.cost_accumulator.get_cost_by_model(),
            checkpoints: self.checkpoint_tracer.get_stats(),
            interrupts: self.interrupt_correlator.stats(),
            multi_agent: self.multi_agent.stats(),
        }
    }

    pub fn summary_json(&self) -> crate::error::Result<Value> {
        Ok(serde_json::to_value(self.summary())?)
    }

    /// Clear all recorded data. Topology, reducer registrations and pricing
    /// are kept, and so are pending interrupts.
    pub fn reset(&self) {
        self.state_tracker.reset();
        self.superstep_tracker.reset();
        self.reducer_attributor.reset();
        self.cost_accumulator.reset();
        self.checkpoint_tracer.reset();
        self.interrupt_correlator.reset();
        self.multi_agent.reset();
        self.node_stats.lock().clear();
        self.runs.lock().clear();
    }
}

impl Default for ExecutionTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTracer")
            .field("config", &self.config)
            .field("has_topology", &self.topology.read().is_some())
            .field("runs", &self.runs.lock().len())
            .finish()
    }
}

/// Shallow merge of a node's partial update into the state
fn merge_update(before: &Value, update: &Value) -> Value {
    match (before, update) {
        (Value::Object(state), Value::Object(changes)) => {
            let mut merged = state.clone();
            for (key, value) in changes {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Null) => before.clone(),
        _ => update.clone(),
    }
}

enum NodeOutcome<'a> {
    Updated { before: &'a Value, update: &'a Value },
    Failed { error_type: &'a str, message: &'a str },
}

/// A node execution in flight. Dropping it unfinished records a cancellation.
struct NodeCall {
    tracer: Arc<ExecutionTracer>,
    node: String,
    is_entry: bool,
    superstep: Option<u64>,
    started: Instant,
    finished: bool,
}

impl NodeCall {
    fn succeed(mut self, before: &Value, update: &Value) {
        self.finished = true;
        self.tracer
            .complete_node(&self, NodeOutcome::Updated { before, update });
    }

    fn fail(mut self, error_type: &str, message: &str) {
        self.finished = true;
        self.tracer
            .complete_node(&self, NodeOutcome::Failed { error_type, message });
    }
}

impl Drop for NodeCall {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.tracer.complete_node(
                self,
                NodeOutcome::Failed {
                    error_type: "Cancelled",
                    message: "cancelled",
                },
            );
        }
    }
}

struct RunCompletion {
    output: Option<String>,
    final_state: Option<Value>,
    error: Option<(String, String)>,
    chunk_count: Option<usize>,
}

/// A run in flight. Dropping it unfinished records a cancellation.
pub(crate) struct RunGuard {
    tracer: Arc<ExecutionTracer>,
    run: Option<ExecutionRun>,
    started: Instant,
    chunk_count: Option<usize>,
    last_output: Option<String>,
}

impl RunGuard {
    pub(crate) fn record_chunk<T: Serialize + ?Sized>(&mut self, chunk: &T) {
        self.chunk_count = Some(self.chunk_count.unwrap_or(0) + 1);
        self.last_output = Some(self.tracer.serializer.serialize(chunk));
    }

    pub(crate) fn finish_ok<O: Serialize + ?Sized>(mut self, output: &O) {
        let output_text = self.tracer.serializer.serialize(output);
        let final_state = serde_json::to_value(output).ok();
        self.complete(Some(output_text), final_state, None);
    }

    pub(crate) fn finish_err<E: fmt::Display + ?Sized>(mut self, error: &E) {
        let output = self.last_output.take();
        self.complete(
            output,
            None,
            Some((short_type_name::<E>().to_string(), error.to_string())),
        );
    }

    /// Close a streaming run whose sequence ended or was abandoned by the consumer
    pub(crate) fn finish_stream(mut self) {
        let output = self.last_output.take();
        self.complete(output, None, None);
    }

    fn complete(
        &mut self,
        output: Option<String>,
        final_state: Option<Value>,
        error: Option<(String, String)>,
    ) {
        if let Some(run) = self.run.take() {
            let completion = RunCompletion {
                output,
                final_state,
                error,
                chunk_count: self.chunk_count,
            };
            self.tracer.end_run(run, self.started.elapsed(), completion);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let output = self.last_output.take();
        self.complete(
            output,
            None,
            Some(("Cancelled".to_string(), "cancelled".to_string())),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::CollectingSink;
    use serde_json::json;

    fn tracer_with_sink() -> (Arc<ExecutionTracer>, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let tracer = ExecutionTracer::builder()
            .sink(sink.clone())
            .build()
            .unwrap();
        (Arc::new(tracer), sink)
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = ExecutionTracer::builder()
            .config(TracerConfig {
                max_state_history: 0,
                ..TracerConfig::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_update() {
        assert_eq!(
            merge_update(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4})),
            json!({"a": 1, "b": 3, "c": 4})
        );
        assert_eq!(merge_update(&json!({"a": 1}), &Value::Null), json!({"a": 1}));
        assert_eq!(merge_update(&json!(1), &json!(2)), json!(2));
    }

    #[test]
    fn test_node_records_transition_and_attribution() {
        let (tracer, sink) = tracer_with_sink();
        tracer.register_reducer("messages", "add_messages");

        let node = tracer.wrap_node(
            "respond",
            |state: &Value| -> Result<Value, String> {
                let count = state["count"].as_i64().unwrap_or(0);
                Ok(json!({"count": count + 1, "messages": ["done"]}))
            },
            true,
        );
        let update = node(&json!({"count": 1, "messages": []})).unwrap();
        assert_eq!(update["count"], 2);

        let transitions = tracer.state_tracker().history();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].node.as_deref(), Some("respond"));

        let attributions = tracer.reducer_attributor().attributions();
        assert_eq!(attributions.len(), 2);
        assert!(attributions
            .iter()
            .any(|a| a.field == "messages" && a.reducer.as_deref() == Some("add_messages")));

        assert_eq!(tracer.node_stats()["respond"].executions, 1);
        assert_eq!(sink.records_of(ObservationKind::Node).len(), 1);
    }

    #[test]
    fn test_node_error_is_returned_unchanged() {
        let (tracer, sink) = tracer_with_sink();
        let node = tracer.wrap_node(
            "flaky",
            |_: &Value| -> Result<Value, String> { Err("rate limited".to_string()) },
            true,
        );
        assert_eq!(node(&json!({})).unwrap_err(), "rate limited");

        let active = tracer.superstep_tracker().current_superstep().unwrap();
        assert_eq!(active.errors.len(), 1);
        assert_eq!(active.errors[0].error_type, "String");
        assert_eq!(tracer.node_stats()["flaky"].errors, 1);
        assert!(!sink.records_of(ObservationKind::Node)[0].status.is_success());
    }

    #[test]
    fn test_usage_metadata_feeds_cost() {
        let (tracer, _) = tracer_with_sink();
        tracer.register_pricing("gpt-4o", ModelPricing::new(2.5, 10.0, 1.25));
        let node = tracer.wrap_node(
            "llm",
            |_: &Value| -> Result<Value, String> {
                Ok(json!({"usage_metadata": {"model": "gpt-4o", "input_tokens": 1000000, "output_tokens": 0}}))
            },
            true,
        );
        node(&json!({})).unwrap();
        assert!((tracer.cost_accumulator().total_cost() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_async_node_outside_runtime() {
        let (tracer, _) = tracer_with_sink();
        let node = tracer.wrap_async_node(
            "fetch",
            |_: Value| async { Ok::<_, String>(json!({"done": true})) },
            true,
        );
        let update = tokio_test::block_on(node(json!({}))).unwrap();
        assert_eq!(update["done"], true);
        assert_eq!(tracer.state_tracker().len(), 1);
    }

    #[test]
    fn test_dropped_async_node_records_cancellation() {
        let (tracer, _) = tracer_with_sink();
        let node = tracer.wrap_async_node(
            "slow",
            |_: Value| futures::future::pending::<Result<Value, String>>(),
            true,
        );
        drop(node(json!({})));

        assert_eq!(tracer.node_stats()["slow"].errors, 1);
        let active = tracer.superstep_tracker().current_superstep().unwrap();
        assert_eq!(active.errors[0].error_type, "Cancelled");
    }

    #[test]
    fn test_dropped_run_guard_records_cancellation() {
        let (tracer, _) = tracer_with_sink();
        {
            let _run = tracer.begin_run(ExecutionMode::AInvoke, Some("t1"), &json!({}));
        }
        let run = tracer.last_run().unwrap();
        assert!(!run.success);
        assert_eq!(run.error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_summary_serializes() {
        let (tracer, _) = tracer_with_sink();
        let summary = tracer.summary_json().unwrap();
        assert_eq!(summary["total_runs"], 0);
        assert!(summary["checkpoints"].is_null());
    }
}
