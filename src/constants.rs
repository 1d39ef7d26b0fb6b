//! # Attribute Keys and System Constants
//!
//! Attribute names written onto observation records and caller-supplied
//! observations, plus the operational defaults of the tracing engine.

/// Attribute keys for graph-level records
pub mod graph {
    pub const EXECUTION_MODE: &str = "langgraph.execution_mode";
    pub const THREAD_ID: &str = "langgraph.thread_id";
    pub const NODE_COUNT: &str = "langgraph.graph.node_count";
    pub const EDGE_COUNT: &str = "langgraph.graph.edge_count";
    pub const CONDITIONAL_EDGE_COUNT: &str = "langgraph.graph.conditional_edge_count";
    pub const ENTRY_POINT: &str = "langgraph.graph.entry_point";
    pub const INPUT: &str = "langgraph.input";
    pub const OUTPUT: &str = "langgraph.output";
    pub const DURATION_MS: &str = "langgraph.duration_ms";
    pub const SUPERSTEP_COUNT: &str = "langgraph.superstep_count";
    pub const NODES_EXECUTED: &str = "langgraph.nodes_executed";
    pub const STATE_TRANSITIONS: &str = "langgraph.state_transitions";
    pub const STREAM_CHUNKS: &str = "langgraph.stream.chunk_count";
    pub const TOTAL_COST: &str = "langgraph.cost.total";
    pub const TOTAL_TOKENS: &str = "langgraph.tokens.total";
    pub const PEAK_STATE_BYTES: &str = "langgraph.state.peak_bytes";
    pub const ERROR_TYPE: &str = "langgraph.error.type";
}

/// Attribute keys for node-level records
pub mod node {
    pub const NAME: &str = "langgraph.node.name";
    pub const IS_ENTRY: &str = "langgraph.node.is_entry";
    pub const SUPERSTEP: &str = "langgraph.node.superstep";
    pub const DURATION_MS: &str = "langgraph.node.duration_ms";
    pub const UPDATED_FIELDS: &str = "langgraph.node.updated_fields";
}

/// Attribute keys for checkpoint records
pub mod checkpoint {
    pub const OPERATION: &str = "langgraph.checkpoint.operation";
    pub const THREAD_ID: &str = "langgraph.checkpoint.thread_id";
    pub const CHECKPOINT_ID: &str = "langgraph.checkpoint.id";
    pub const SIZE_BYTES: &str = "langgraph.checkpoint.size_bytes";
    pub const DURATION_MS: &str = "langgraph.checkpoint.duration_ms";
    pub const FOUND: &str = "langgraph.checkpoint.found";
    pub const COUNT: &str = "langgraph.checkpoint.count";
    pub const ASYNC: &str = "langgraph.checkpoint.async";
}

/// Attribute keys for interrupt, resume and human decision records
pub mod interrupt {
    pub const INTERRUPT_ID: &str = "langgraph.interrupt.id";
    pub const THREAD_ID: &str = "langgraph.interrupt.thread_id";
    pub const NODE: &str = "langgraph.interrupt.node";
    pub const REASON: &str = "langgraph.interrupt.reason";
    pub const IS_INTENTIONAL: &str = "langgraph.interrupt.is_intentional";
    pub const STATE: &str = "langgraph.interrupt.state";
    pub const RESUME_ID: &str = "langgraph.resume.id";
    pub const RESUME_INPUT: &str = "langgraph.resume.input";
    pub const FROM_INTERRUPT: &str = "langgraph.resume.from_interrupt";
    pub const WAIT_DURATION_SECONDS: &str = "langgraph.resume.wait_duration_seconds";
    pub const PREVIOUS_TRACE_ID: &str = "langgraph.resume.previous_trace_id";
    pub const PREVIOUS_SPAN_ID: &str = "langgraph.resume.previous_span_id";
    pub const DECISION: &str = "langgraph.human.decision";
    pub const APPROVER_ID: &str = "langgraph.human.approver_id";
    pub const FEEDBACK: &str = "langgraph.human.feedback";
}

/// Attribute keys for multi-agent records
pub mod agent {
    pub const CORRELATION_ID: &str = "langgraph.agent.correlation_id";
    pub const FROM: &str = "langgraph.agent.from";
    pub const TO: &str = "langgraph.agent.to";
    pub const MESSAGE_TYPE: &str = "langgraph.agent.message_type";
    pub const CONTENT_PREVIEW: &str = "langgraph.agent.content_preview";
    pub const SUPERVISOR: &str = "langgraph.supervisor.name";
    pub const SELECTED: &str = "langgraph.supervisor.selected_agent";
    pub const AVAILABLE: &str = "langgraph.supervisor.available_agents";
    pub const REASON: &str = "langgraph.supervisor.reason";
}

/// Operational defaults
pub mod system {
    pub const DEFAULT_MAX_STATE_HISTORY: usize = 100;
    pub const DEFAULT_MAX_EVENT_HISTORY: usize = 10_000;
    pub const DEFAULT_MAX_SERIALIZED_LENGTH: usize = 1000;
    pub const DEFAULT_CONTENT_PREVIEW_LENGTH: usize = 200;
    pub const MIN_SERIALIZED_LENGTH: usize = 16;
    pub const DEFAULT_PUBLISHER_CAPACITY: usize = 1000;
    pub const TRUNCATION_MARKER: &str = "...[truncated]";
    pub const SUPERVISOR_AGENT_TYPE: &str = "supervisor";
    pub const DEFAULT_AGENT_TYPE: &str = "agent";
    pub const DEFAULT_MESSAGE_TYPE: &str = "task";
    pub const ENV_PREFIX: &str = "GRAPH_TRACE";
}
