//! # Multi-Agent Correlation
//!
//! Inter-agent messages threaded by correlation id, supervisor routing
//! decisions, and per-agent execution statistics.

use crate::clock::{Clock, SystemClock};
use crate::config::TracerConfig;
use crate::constants::{agent as keys, system};
use crate::history::History;
use crate::observation::{NoopSink, ObservationKind, ObservationRecord, ObservationSink};
use crate::serializer::SafeSerializer;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub correlation_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: String,
    pub content_preview: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorDecision {
    pub supervisor_name: String,
    pub selected_agent: String,
    pub available_agents: Vec<String>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecutionStats {
    pub agent_type: String,
    pub execution_count: u64,
    pub total_duration_ms: f64,
    pub tasks_completed: u64,
    pub errors: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl AgentExecutionStats {
    fn new(agent_type: &str) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            execution_count: 0,
            total_duration_ms: 0.0,
            tasks_completed: 0,
            errors: 0,
            messages_sent: 0,
            messages_received: 0,
        }
    }

    pub fn avg_duration_ms(&self) -> Option<f64> {
        (self.execution_count > 0).then(|| self.total_duration_ms / self.execution_count as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiAgentStats {
    pub total_agents: usize,
    pub total_messages: usize,
    pub total_conversations: usize,
    pub total_supervisor_decisions: usize,
    pub total_executions: u64,
    pub total_errors: u64,
    pub messages_by_type: BTreeMap<String, usize>,
    /// How often each agent was picked by a supervisor
    pub agent_selection_frequency: BTreeMap<String, usize>,
}

#[derive(Debug)]
struct Inner {
    messages: History<AgentMessage>,
    conversations: HashMap<String, Vec<AgentMessage>>,
    /// First-seen order of correlation ids, oldest first
    conversation_order: VecDeque<String>,
    decisions: History<SupervisorDecision>,
    agents: BTreeMap<String, AgentExecutionStats>,
}

pub struct MultiAgentCorrelator {
    inner: Mutex<Inner>,
    max_conversations: Option<usize>,
    serializer: SafeSerializer,
    sink: Arc<dyn ObservationSink>,
    clock: Arc<dyn Clock>,
}

impl MultiAgentCorrelator {
    pub fn new() -> Self {
        Self::from_config(&TracerConfig::default(), Arc::new(NoopSink), Arc::new(SystemClock))
    }

    pub fn from_config(
        config: &TracerConfig,
        sink: Arc<dyn ObservationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: History::new(config.max_event_history),
                conversations: HashMap::new(),
                conversation_order: VecDeque::new(),
                decisions: History::new(config.max_event_history),
                agents: BTreeMap::new(),
            }),
            max_conversations: config.max_event_history,
            serializer: SafeSerializer::new(config.content_preview_length),
            sink,
            clock,
        }
    }

    /// Declare an agent ahead of its first message or execution
    pub fn register_agent(&self, name: &str, agent_type: &str) {
        let mut inner = self.inner.lock();
        inner
            .agents
            .entry(name.to_string())
            .and_modify(|stats| stats.agent_type = agent_type.to_string())
            .or_insert_with(|| AgentExecutionStats::new(agent_type));
    }

    /// Record a message between two agents and return its correlation id.
    /// Without `correlation_id` a new conversation is started.
    pub fn track_agent_message(
        &self,
        from_agent: &str,
        to_agent: &str,
        message: &Value,
        message_type: Option<&str>,
        correlation_id: Option<&str>,
    ) -> String {
        let correlation_id = correlation_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let entry = AgentMessage {
            correlation_id: correlation_id.clone(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            message_type: message_type.unwrap_or(system::DEFAULT_MESSAGE_TYPE).to_string(),
            content_preview: self.serializer.preview(message),
            timestamp: self.clock.now(),
        };

        {
            let mut inner = self.inner.lock();
            inner.messages.push(entry.clone());
            if !inner.conversations.contains_key(&correlation_id) {
                inner.conversation_order.push_back(correlation_id.clone());
                if let Some(limit) = self.max_conversations {
                    while inner.conversation_order.len() > limit {
                        if let Some(evicted) = inner.conversation_order.pop_front() {
                            inner.conversations.remove(&evicted);
                        }
                    }
                }
            }
            inner
                .conversations
                .entry(correlation_id.clone())
                .or_default()
                .push(entry.clone());

            agent_entry(&mut inner.agents, from_agent).messages_sent += 1;
            agent_entry(&mut inner.agents, to_agent).messages_received += 1;
        }

        debug!(
            correlation_id = %correlation_id,
            from = %from_agent,
            to = %to_agent,
            message_type = %entry.message_type,
            "Agent message tracked"
        );

        self.sink.emit(
            ObservationRecord::new(
                ObservationKind::AgentMessage,
                format!("agent.{from_agent}->{to_agent}"),
                entry.timestamp,
            )
            .with_attribute(keys::CORRELATION_ID, &correlation_id)
            .with_attribute(keys::FROM, from_agent)
            .with_attribute(keys::TO, to_agent)
            .with_attribute(keys::MESSAGE_TYPE, &entry.message_type)
            .with_attribute(keys::CONTENT_PREVIEW, &entry.content_preview),
        );
        correlation_id
    }

    pub fn track_supervisor_routing<I, S>(
        &self,
        supervisor: &str,
        selected_agent: &str,
        available_agents: I,
        reason: Option<&str>,
    ) -> SupervisorDecision
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let decision = SupervisorDecision {
            supervisor_name: supervisor.to_string(),
            selected_agent: selected_agent.to_string(),
            available_agents: available_agents.into_iter().map(Into::into).collect(),
            reason: reason.map(str::to_string),
            timestamp: self.clock.now(),
        };

        {
            let mut inner = self.inner.lock();
            inner.decisions.push(decision.clone());
            agent_entry(&mut inner.agents, supervisor).agent_type =
                system::SUPERVISOR_AGENT_TYPE.to_string();
        }

        info!(
            supervisor = %supervisor,
            selected = %selected_agent,
            available = decision.available_agents.len(),
            "Supervisor routing decision"
        );

        self.sink.emit(
            ObservationRecord::new(
                ObservationKind::SupervisorDecision,
                format!("supervisor.{supervisor}"),
                decision.timestamp,
            )
            .with_attribute(keys::SUPERVISOR, supervisor)
            .with_attribute(keys::SELECTED, selected_agent)
            .with_attribute(keys::AVAILABLE, decision.available_agents.join(","))
            .with_optional_attribute(keys::REASON, reason),
        );
        decision
    }

    pub fn track_agent_execution(&self, agent_name: &str, duration_ms: f64, success: bool) {
        let mut inner = self.inner.lock();
        let stats = agent_entry(&mut inner.agents, agent_name);
        stats.execution_count += 1;
        stats.total_duration_ms += duration_ms.max(0.0);
        if success {
            stats.tasks_completed += 1;
        } else {
            stats.errors += 1;
        }
    }

    /// Messages sharing `correlation_id`, in insertion order
    pub fn get_conversation_thread(&self, correlation_id: &str) -> Vec<AgentMessage> {
        self.inner
            .lock()
            .conversations
            .get(correlation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        self.inner.lock().conversation_order.iter().cloned().collect()
    }

    pub fn get_agent_stats(&self, agent_name: &str) -> Option<AgentExecutionStats> {
        self.inner.lock().agents.get(agent_name).cloned()
    }

    pub fn messages(&self) -> Vec<AgentMessage> {
        self.inner.lock().messages.to_vec()
    }

    pub fn supervisor_decisions(&self) -> Vec<SupervisorDecision> {
        self.inner.lock().decisions.to_vec()
    }

    pub fn stats(&self) -> MultiAgentStats {
        let inner = self.inner.lock();

        let mut messages_by_type = BTreeMap::new();
        for message in inner.messages.iter() {
            *messages_by_type.entry(message.message_type.clone()).or_insert(0) += 1;
        }
        let mut agent_selection_frequency = BTreeMap::new();
        for decision in inner.decisions.iter() {
            *agent_selection_frequency
                .entry(decision.selected_agent.clone())
                .or_insert(0) += 1;
        }

        MultiAgentStats {
            total_agents: inner.agents.len(),
            total_messages: inner.messages.len(),
            total_conversations: inner.conversations.len(),
            total_supervisor_decisions: inner.decisions.len(),
            total_executions: inner.agents.values().map(|a| a.execution_count).sum(),
            total_errors: inner.agents.values().map(|a| a.errors).sum(),
            messages_by_type,
            agent_selection_frequency,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.messages.clear();
        inner.conversations.clear();
        inner.conversation_order.clear();
        inner.decisions.clear();
        inner.agents.clear();
    }
}

impl Default for MultiAgentCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultiAgentCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MultiAgentCorrelator")
            .field("agents", &inner.agents.len())
            .field("messages", &inner.messages.len())
            .field("conversations", &inner.conversations.len())
            .finish()
    }
}

fn agent_entry<'a>(
    agents: &'a mut BTreeMap<String, AgentExecutionStats>,
    name: &str,
) -> &'a mut AgentExecutionStats {
    agents
        .entry(name.to_string())
        .or_insert_with(|| AgentExecutionStats::new(system::DEFAULT_AGENT_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::CollectingSink;
    use serde_json::json;

    #[test]
    fn test_conversation_thread_in_order() {
        let correlator = MultiAgentCorrelator::new();
        let id = correlator.track_agent_message(
            "architect",
            "developer",
            &json!("Design the schema"),
            None,
            None,
        );
        correlator.track_agent_message(
            "developer",
            "architect",
            &json!("Schema drafted"),
            Some("result"),
            Some(&id),
        );

        let thread = correlator.get_conversation_thread(&id);
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].from_agent, "architect");
        assert_eq!(thread[0].message_type, "task");
        assert_eq!(thread[1].message_type, "result");
        assert_eq!(thread[0].content_preview, "Design the schema");

        let architect = correlator.get_agent_stats("architect").unwrap();
        assert_eq!(architect.messages_sent, 1);
        assert_eq!(architect.messages_received, 1);
    }

    #[test]
    fn test_missing_correlation_id_starts_new_conversation() {
        let correlator = MultiAgentCorrelator::new();
        let a = correlator.track_agent_message("x", "y", &json!("1"), None, None);
        let b = correlator.track_agent_message("x", "y", &json!("2"), None, None);
        assert_ne!(a, b);
        assert_eq!(correlator.conversation_ids(), vec![a, b]);
    }

    #[test]
    fn test_supervisor_routing_stats() {
        let sink = Arc::new(CollectingSink::new());
        let correlator = MultiAgentCorrelator::from_config(
            &TracerConfig::default(),
            sink.clone(),
            Arc::new(SystemClock),
        );
        let available = ["researcher", "coder"];
        correlator.track_supervisor_routing("boss", "researcher", available, Some("needs facts"));
        correlator.track_supervisor_routing("boss", "researcher", available, None);
        correlator.track_supervisor_routing("boss", "coder", available, None);

        let boss = correlator.get_agent_stats("boss").unwrap();
        assert_eq!(boss.agent_type, "supervisor");

        let stats = correlator.stats();
        assert_eq!(stats.total_agents, 1);
        assert_eq!(stats.total_supervisor_decisions, 3);
        assert_eq!(stats.agent_selection_frequency["researcher"], 2);
        assert_eq!(sink.records_of(ObservationKind::SupervisorDecision).len(), 3);
    }

    #[test]
    fn test_agent_execution_accumulates() {
        let correlator = MultiAgentCorrelator::new();
        correlator.register_agent("coder", "worker");
        correlator.track_agent_execution("coder", 100.0, true);
        correlator.track_agent_execution("coder", 300.0, false);

        let coder = correlator.get_agent_stats("coder").unwrap();
        assert_eq!(coder.agent_type, "worker");
        assert_eq!(coder.execution_count, 2);
        assert_eq!(coder.tasks_completed, 1);
        assert_eq!(coder.errors, 1);
        assert_eq!(coder.avg_duration_ms(), Some(200.0));
        assert_eq!(correlator.stats().total_errors, 1);
    }

    #[test]
    fn test_content_preview_is_capped() {
        let config = TracerConfig {
            content_preview_length: 32,
            ..TracerConfig::default()
        };
        let correlator =
            MultiAgentCorrelator::from_config(&config, Arc::new(NoopSink), Arc::new(SystemClock));
        let id = correlator.track_agent_message("a", "b", &json!("x".repeat(500)), None, None);
        let message = &correlator.get_conversation_thread(&id)[0];
        assert!(message.content_preview.len() <= 32);
    }

    #[test]
    fn test_conversation_index_is_bounded() {
        let config = TracerConfig {
            max_event_history: Some(2),
            ..TracerConfig::default()
        };
        let correlator =
            MultiAgentCorrelator::from_config(&config, Arc::new(NoopSink), Arc::new(SystemClock));
        let first = correlator.track_agent_message("a", "b", &json!("1"), None, None);
        correlator.track_agent_message("a", "b", &json!("2"), None, None);
        correlator.track_agent_message("a", "b", &json!("3"), None, None);

        assert_eq!(correlator.conversation_ids().len(), 2);
        assert!(correlator.get_conversation_thread(&first).is_empty());
    }

    #[test]
    fn test_reset_clears_everything() {
        let correlator = MultiAgentCorrelator::new();
        correlator.track_agent_message("a", "b", &json!("hi"), None, None);
        correlator.reset();
        assert_eq!(correlator.stats().total_messages, 0);
        assert!(correlator.get_agent_stats("a").is_none());
    }
}
