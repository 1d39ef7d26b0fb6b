use crate::clock::{Clock, SystemClock};
use crate::history::History;
use crate::serializer::SafeSerializer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which reducer (if any) merged a change into a state field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducerAttribution {
    pub field: String,
    /// `None` for fields without a registered reducer (plain overwrite)
    pub reducer: Option<String>,
    pub node: String,
    pub old_value: String,
    pub new_value: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducerStats {
    pub registered_reducers: usize,
    pub total_attributions: usize,
    pub attributed: usize,
    pub unattributed: usize,
    pub by_reducer: BTreeMap<String, usize>,
    pub by_field: BTreeMap<String, usize>,
}

/// Maps changed state fields to the reducer responsible for merging them.
///
/// The registry lives as long as the graph; `reset` only clears attribution history.
pub struct ReducerAttributor {
    registry: DashMap<String, String>,
    attributions: Mutex<History<ReducerAttribution>>,
    serializer: SafeSerializer,
    clock: Arc<dyn Clock>,
}

impl ReducerAttributor {
    pub fn new() -> Self {
        Self::with_clock(None, SafeSerializer::default(), Arc::new(SystemClock))
    }

    pub fn with_clock(
        max_history: Option<usize>,
        serializer: SafeSerializer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: DashMap::new(),
            attributions: Mutex::new(History::new(max_history)),
            serializer,
            clock,
        }
    }

    pub fn register_reducer(&self, field: impl Into<String>, reducer: impl Into<String>) {
        let field = field.into();
        let reducer = reducer.into();
        if let Some(previous) = self.registry.insert(field.clone(), reducer.clone()) {
            if previous != reducer {
                warn!(
                    field = %field,
                    previous = %previous,
                    reducer = %reducer,
                    "Reducer registration replaced"
                );
            }
        }
    }

    pub fn get_field_reducer(&self, field: &str) -> Option<String> {
        self.registry.get(field).map(|entry| entry.value().clone())
    }

    pub fn registered_reducers(&self) -> BTreeMap<String, String> {
        self.registry
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Record one attribution entry and return the registered reducer, if any.
    /// An unregistered field is recorded with `reducer: None`.
    pub fn attribute_change(
        &self,
        field: &str,
        old_value: &Value,
        new_value: &Value,
        node: &str,
    ) -> Option<String> {
        let reducer = self.get_field_reducer(field);
        let attribution = ReducerAttribution {
            field: field.to_string(),
            reducer: reducer.clone(),
            node: node.to_string(),
            old_value: self.serializer.serialize(old_value),
            new_value: self.serializer.serialize(new_value),
            timestamp: self.clock.now(),
        };
        self.attributions.lock().push(attribution);

        debug!(field = %field, node = %node, reducer = ?reducer, "State change attributed");
        reducer
    }

    pub fn attributions(&self) -> Vec<ReducerAttribution> {
        self.attributions.lock().to_vec()
    }

    pub fn attributions_for_node(&self, node: &str) -> Vec<ReducerAttribution> {
        self.attributions
            .lock()
            .iter()
            .filter(|a| a.node == node)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> ReducerStats {
        let attributions = self.attributions.lock();
        let mut by_reducer = BTreeMap::new();
        let mut by_field = BTreeMap::new();
        let mut attributed = 0;

        for attribution in attributions.iter() {
            *by_field.entry(attribution.field.clone()).or_insert(0) += 1;
            if let Some(reducer) = &attribution.reducer {
                attributed += 1;
                *by_reducer.entry(reducer.clone()).or_insert(0) += 1;
            }
        }

        ReducerStats {
            registered_reducers: self.registry.len(),
            total_attributions: attributions.len(),
            attributed,
            unattributed: attributions.len() - attributed,
            by_reducer,
            by_field,
        }
    }

    /// Clear attribution history; registrations are kept
    pub fn reset(&self) {
        self.attributions.lock().clear();
    }
}

impl Default for ReducerAttributor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReducerAttributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerAttributor")
            .field("registered", &self.registry.len())
            .field("attributions", &self.attributions.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registered_field_is_attributed() {
        let attributor = ReducerAttributor::new();
        attributor.register_reducer("messages", "add_messages");

        let reducer =
            attributor.attribute_change("messages", &json!([]), &json!(["hi"]), "chatbot");
        assert_eq!(reducer.as_deref(), Some("add_messages"));
        assert_eq!(attributor.attributions().len(), 1);
    }

    #[test]
    fn test_unregistered_field_records_none() {
        let attributor = ReducerAttributor::new();
        let reducer = attributor.attribute_change("summary", &json!(null), &json!("x"), "summarize");
        assert!(reducer.is_none());

        let attributions = attributor.attributions();
        assert_eq!(attributions.len(), 1);
        assert!(attributions[0].reducer.is_none());
        assert_eq!(attributor.stats().unattributed, 1);
    }

    #[test]
    fn test_reset_keeps_registry() {
        let attributor = ReducerAttributor::new();
        attributor.register_reducer("messages", "add_messages");
        attributor.attribute_change("messages", &json!([]), &json!([1]), "n");
        attributor.reset();

        assert!(attributor.attributions().is_empty());
        assert_eq!(
            attributor.get_field_reducer("messages").as_deref(),
            Some("add_messages")
        );
    }

    #[test]
    fn test_stats_group_by_reducer_and_field() {
        let attributor = ReducerAttributor::new();
        attributor.register_reducer("messages", "add_messages");
        attributor.register_reducer("scores", "operator.add");
        attributor.attribute_change("messages", &json!([]), &json!([1]), "a");
        attributor.attribute_change("messages", &json!([1]), &json!([1, 2]), "b");
        attributor.attribute_change("scores", &json!([]), &json!([3]), "b");
        attributor.attribute_change("plan", &json!(null), &json!("p"), "b");

        let stats = attributor.stats();
        assert_eq!(stats.registered_reducers, 2);
        assert_eq!(stats.total_attributions, 4);
        assert_eq!(stats.attributed, 3);
        assert_eq!(stats.by_reducer["add_messages"], 2);
        assert_eq!(stats.by_field["plan"], 1);
        assert_eq!(attributor.attributions_for_node("b").len(), 3);
    }
}
