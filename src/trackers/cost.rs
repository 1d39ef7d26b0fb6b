use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Token rates in currency units per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    /// Rate for cached input tokens; defaults to zero when omitted
    #[serde(default)]
    pub cached_input_per_million: f64,
}

impl ModelPricing {
    pub fn new(input_per_million: f64, output_per_million: f64, cached_input_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
            cached_input_per_million,
        }
    }

    pub fn is_valid(&self) -> bool {
        [
            self.input_per_million,
            self.output_per_million,
            self.cached_input_per_million,
        ]
        .iter()
        .all(|rate| rate.is_finite() && *rate >= 0.0)
    }

    /// Cached tokens are a subset of input tokens and billed at the cached rate
    pub fn cost(&self, input_tokens: u64, output_tokens: u64, cached_tokens: u64) -> f64 {
        let cached = cached_tokens.min(input_tokens);
        let uncached = input_tokens - cached;
        (uncached as f64 * self.input_per_million
            + cached as f64 * self.cached_input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Model name to pricing, supplied by the host at runtime or from config
#[derive(Debug, Default)]
pub struct PricingTable {
    models: DashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(pricing: &HashMap<String, ModelPricing>) -> Self {
        let table = Self::new();
        for (model, rates) in pricing {
            table.register(model.clone(), *rates);
        }
        table
    }

    pub fn register(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }

    /// Exact match first, then the longest registered prefix
    /// (`gpt-4o` prices `gpt-4o-2024-08-06`)
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        if let Some(pricing) = self.models.get(model) {
            return Some(*pricing.value());
        }
        self.models
            .iter()
            .filter(|entry| model.starts_with(entry.key().as_str()))
            .max_by_key(|entry| entry.key().len())
            .map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Accumulated usage for one (node, model) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCost {
    pub node: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub cost: f64,
    pub calls: u64,
}

/// Usage totals for one grouping key (a node or a model)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub cost: f64,
    pub calls: u64,
}

impl CostTotals {
    fn add(&mut self, entry: &NodeCost) {
        self.input_tokens += entry.input_tokens;
        self.output_tokens += entry.output_tokens;
        self.cached_tokens += entry.cached_tokens;
        self.cost += entry.cost;
        self.calls += entry.calls;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_calls: u64,
    pub nodes: usize,
    pub models: usize,
    /// Models seen without a pricing entry; their usage cost zero
    pub unpriced_models: Vec<String>,
}

/// Per-run token usage and cost, grouped by node and by model
pub struct CostAccumulator {
    pricing: Arc<PricingTable>,
    entries: Mutex<BTreeMap<(String, String), NodeCost>>,
}

impl CostAccumulator {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            pricing,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Accumulate one LLM call and return the updated (node, model) totals.
    /// Unknown models are accumulated at zero cost.
    pub fn track_llm_usage(
        &self,
        node: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
    ) -> NodeCost {
        let cost = self
            .pricing
            .get(model)
            .map(|p| p.cost(input_tokens, output_tokens, cached_tokens))
            .unwrap_or(0.0);

        let mut entries = self.entries.lock();
        let entry = entries
            .entry((node.to_string(), model.to_string()))
            .or_insert_with(|| NodeCost {
                node: node.to_string(),
                model: model.to_string(),
                input_tokens: 0,
                output_tokens: 0,
                cached_tokens: 0,
                cost: 0.0,
                calls: 0,
            });
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.cached_tokens += cached_tokens;
        entry.cost += cost;
        entry.calls += 1;

        debug!(
            node = %node,
            model = %model,
            input_tokens = input_tokens,
            output_tokens = output_tokens,
            cost = cost,
            "LLM usage tracked"
        );
        entry.clone()
    }

    pub fn entries(&self) -> Vec<NodeCost> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn get_cost_by_node(&self) -> BTreeMap<String, CostTotals> {
        self.group_by(|entry| entry.node.clone())
    }

    pub fn get_cost_by_model(&self) -> BTreeMap<String, CostTotals> {
        self.group_by(|entry| entry.model.clone())
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.lock().values().map(|entry| entry.cost).sum()
    }

    pub fn stats(&self) -> CostStats {
        let entries = self.entries.lock();
        let mut totals = CostTotals::default();
        let mut nodes = BTreeSet::new();
        let mut models = BTreeSet::new();
        for entry in entries.values() {
            totals.add(entry);
            nodes.insert(entry.node.as_str());
            models.insert(entry.model.as_str());
        }
        let unpriced_models = models
            .iter()
            .filter(|model| self.pricing.get(model).is_none())
            .map(|model| model.to_string())
            .collect();

        CostStats {
            total_cost: totals.cost,
            total_input_tokens: totals.input_tokens,
            total_output_tokens: totals.output_tokens,
            total_cached_tokens: totals.cached_tokens,
            total_calls: totals.calls,
            nodes: nodes.len(),
            models: models.len(),
            unpriced_models,
        }
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    fn group_by(&self, key: impl Fn(&NodeCost) -> String) -> BTreeMap<String, CostTotals> {
        let mut grouped: BTreeMap<String, CostTotals> = BTreeMap::new();
        for entry in self.entries.lock().values() {
            grouped.entry(key(entry)).or_default().add(entry);
        }
        grouped
    }
}

impl Default for CostAccumulator {
    fn default() -> Self {
        Self::new(Arc::new(PricingTable::new()))
    }
}

impl std::fmt::Debug for CostAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostAccumulator")
            .field("priced_models", &self.pricing.len())
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator() -> CostAccumulator {
        let pricing = PricingTable::new();
        pricing.register("gpt-4o", ModelPricing::new(2.5, 10.0, 1.25));
        pricing.register("gpt-4o-mini", ModelPricing::new(0.15, 0.6, 0.075));
        CostAccumulator::new(Arc::new(pricing))
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_cost_uses_cached_rate_for_cached_subset() {
        let pricing = ModelPricing::new(2.5, 10.0, 1.25);
        // 600k uncached input, 400k cached input, 100k output
        let cost = pricing.cost(1_000_000, 100_000, 400_000);
        assert!(approx(cost, 1.5 + 0.5 + 1.0));
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let acc = accumulator();
        let entry = acc.track_llm_usage("plan", "mystery-model", 1000, 1000, 0);
        assert_eq!(entry.cost, 0.0);
        assert_eq!(entry.calls, 1);
        assert_eq!(acc.stats().unpriced_models, vec!["mystery-model".to_string()]);
    }

    #[test]
    fn test_longest_prefix_pricing() {
        let acc = accumulator();
        let pricing = acc.pricing().get("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(pricing.input_per_million, 0.15);
        let pricing = acc.pricing().get("gpt-4o-2024-08-06").unwrap();
        assert_eq!(pricing.input_per_million, 2.5);
    }

    #[test]
    fn test_grouping_by_node_and_model() {
        let acc = accumulator();
        acc.track_llm_usage("research", "gpt-4o", 1_000_000, 0, 0);
        acc.track_llm_usage("research", "gpt-4o-mini", 1_000_000, 0, 0);
        acc.track_llm_usage("write", "gpt-4o", 0, 1_000_000, 0);

        let by_node = acc.get_cost_by_node();
        assert!(approx(by_node["research"].cost, 2.65));
        assert!(approx(by_node["write"].cost, 10.0));

        let by_model = acc.get_cost_by_model();
        assert_eq!(by_model["gpt-4o"].calls, 2);
        assert!(approx(acc.total_cost(), 12.65));

        let stats = acc.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.models, 2);
        assert!(stats.unpriced_models.is_empty());
    }

    #[test]
    fn test_reset_clears_entries() {
        let acc = accumulator();
        acc.track_llm_usage("n", "gpt-4o", 10, 10, 0);
        acc.reset();
        assert!(acc.entries().is_empty());
        assert_eq!(acc.total_cost(), 0.0);
    }

    #[test]
    fn test_invalid_pricing_detected() {
        assert!(!ModelPricing::new(f64::NAN, 1.0, 0.0).is_valid());
        assert!(ModelPricing::new(0.0, 0.0, 0.0).is_valid());
    }
}
