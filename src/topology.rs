//! # Graph Topology
//!
//! Static shape of a compiled graph: nodes, edges, conditional edges and the
//! entry point. Captured once per compilation through the
//! [`GraphIntrospectable`] adapter the host implements for its graph type.
//!
//! Introspection is best-effort. An adapter method that fails degrades to an
//! empty collection (or no entry point) and the capture still succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{info, warn};

/// Read-only view of a host graph
pub trait GraphIntrospectable {
    /// Node names in declaration order
    fn nodes(&self) -> anyhow::Result<Vec<String>>;

    /// Plain `(source, target)` edges
    fn edges(&self) -> anyhow::Result<Vec<(String, String)>>;

    /// Edges where one source fans out to several targets
    fn fan_out_edges(&self) -> anyhow::Result<Vec<(String, Vec<String>)>> {
        Ok(Vec::new())
    }

    fn conditional_edges(&self) -> anyhow::Result<Vec<ConditionalEdge>> {
        Ok(Vec::new())
    }

    fn entry_point(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Routing edge whose target is chosen at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalEdge {
    pub source: String,
    /// Branch label -> target node
    pub branches: BTreeMap<String, String>,
}

impl ConditionalEdge {
    pub fn new<I, K, V>(source: impl Into<String>, branches: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            source: source.into(),
            branches: branches
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Immutable snapshot of a compiled graph's shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphTopology {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
    pub conditional_edges: Vec<ConditionalEdge>,
    pub entry_point: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Topology summary statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub conditional_edge_count: usize,
    /// Average outgoing edges (plain + conditional branches) per node
    pub branching_factor: f64,
    /// Longest shortest-path distance from the entry point (or root nodes)
    pub max_depth: usize,
}

impl GraphTopology {
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            conditional_edges: Vec::new(),
            entry_point: None,
            captured_at: Utc::now(),
        }
    }

    /// Build a topology from an adjacency map, expanding one-to-many edges
    pub fn from_adjacency(
        adjacency: &HashMap<String, Vec<String>>,
        entry_point: Option<String>,
    ) -> Self {
        let mut sources: Vec<&String> = adjacency.keys().collect();
        sources.sort();

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for source in sources {
            push_unique(&mut nodes, source.clone());
            for target in &adjacency[source] {
                push_unique(&mut nodes, target.clone());
                push_unique(&mut edges, (source.clone(), target.clone()));
            }
        }

        Self {
            nodes,
            edges,
            conditional_edges: Vec::new(),
            entry_point,
            captured_at: Utc::now(),
        }
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n == name)
    }

    /// Targets reachable in one hop, including conditional branch targets
    pub fn successors(&self, node: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .edges
            .iter()
            .filter(|(source, _)| source == node)
            .map(|(_, target)| target.as_str())
            .collect();
        for conditional in self.conditional_edges.iter().filter(|c| c.source == node) {
            for target in conditional.branches.values() {
                if !out.contains(&target.as_str()) {
                    out.push(target.as_str());
                }
            }
        }
        out
    }

    pub fn stats(&self) -> TopologyStats {
        let node_count = self.nodes.len();
        let branch_count: usize = self
            .conditional_edges
            .iter()
            .map(|c| c.branches.len())
            .sum();

        let branching_factor = if node_count > 0 {
            (self.edges.len() + branch_count) as f64 / node_count as f64
        } else {
            0.0
        };

        TopologyStats {
            node_count,
            edge_count: self.edges.len(),
            conditional_edge_count: self.conditional_edges.len(),
            branching_factor,
            max_depth: self.calculate_max_depth(),
        }
    }

    /// BFS levels from the entry point, or from every node without incoming
    /// edges when there is none. Each node is visited once, so cycles terminate.
    fn calculate_max_depth(&self) -> usize {
        let roots: Vec<&str> = match &self.entry_point {
            Some(entry) => vec![entry.as_str()],
            None => {
                let targets: HashSet<&str> = self
                    .edges
                    .iter()
                    .map(|(_, t)| t.as_str())
                    .chain(
                        self.conditional_edges
                            .iter()
                            .flat_map(|c| c.branches.values().map(String::as_str)),
                    )
                    .collect();
                self.nodes
                    .iter()
                    .map(String::as_str)
                    .filter(|n| !targets.contains(n))
                    .collect()
            }
        };

        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for root in roots {
            depth.insert(root, 0);
            queue.push_back(root);
        }

        let mut max_depth = 0;
        while let Some(node) = queue.pop_front() {
            let next_depth = depth[node] + 1;
            for successor in self.successors(node) {
                if !depth.contains_key(successor) {
                    depth.insert(successor, next_depth);
                    max_depth = max_depth.max(next_depth);
                    queue.push_back(successor);
                }
            }
        }

        max_depth
    }

    /// Mermaid flowchart of the graph. Conditional edges are dashed and
    /// labeled with their branch key.
    pub fn to_mermaid(&self) -> String {
        let mut mermaid = String::from("flowchart TD\n");

        if let Some(entry) = &self.entry_point {
            mermaid.push_str(&format!(
                "    __start__([start]) --> {}\n",
                mermaid_id(entry)
            ));
        }

        for node in &self.nodes {
            let class = if self.entry_point.as_deref() == Some(node.as_str()) {
                "entry"
            } else {
                "default"
            };
            mermaid.push_str(&format!(
                "    {}[\"{}\"]:::{}\n",
                mermaid_id(node),
                node.replace('"', "'"),
                class
            ));
        }

        for (source, target) in &self.edges {
            mermaid.push_str(&format!(
                "    {} --> {}\n",
                mermaid_id(source),
                mermaid_id(target)
            ));
        }

        for conditional in &self.conditional_edges {
            for (label, target) in &conditional.branches {
                mermaid.push_str(&format!(
                    "    {} -.->|{}| {}\n",
                    mermaid_id(&conditional.source),
                    label.replace('|', "/"),
                    mermaid_id(target)
                ));
            }
        }

        mermaid.push_str("\n    classDef entry fill:#d1ecf1,stroke:#0c5460,stroke-width:2px\n");
        mermaid.push_str("    classDef default fill:#e2e3e5,stroke:#383d41,stroke-width:1px\n");

        mermaid
    }

    pub fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Captures [`GraphTopology`] from a host graph
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologyRecorder;

impl TopologyRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Introspect `graph`. Never fails; broken adapter calls degrade to empty values.
    pub fn capture(&self, graph: &dyn GraphIntrospectable) -> GraphTopology {
        let mut nodes = Vec::new();
        for node in degrade("nodes", graph.nodes()) {
            push_unique(&mut nodes, node);
        }

        let mut edges = Vec::new();
        for edge in degrade("edges", graph.edges()) {
            push_unique(&mut edges, edge);
        }
        for (source, targets) in degrade("fan_out_edges", graph.fan_out_edges()) {
            for target in targets {
                push_unique(&mut edges, (source.clone(), target));
            }
        }

        let conditional_edges = degrade("conditional_edges", graph.conditional_edges());

        let entry_point = match graph.entry_point() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(field = "entry_point", error = %e, "Graph introspection failed, using default");
                None
            }
        };

        let topology = GraphTopology {
            nodes,
            edges,
            conditional_edges,
            entry_point,
            captured_at: Utc::now(),
        };

        info!(
            node_count = topology.nodes.len(),
            edge_count = topology.edges.len(),
            conditional_edge_count = topology.conditional_edges.len(),
            entry_point = ?topology.entry_point,
            "Graph topology captured"
        );

        topology
    }
}

fn degrade<T>(field: &str, result: anyhow::Result<Vec<T>>) -> Vec<T> {
    match result {
        Ok(values) => values,
        Err(e) => {
            warn!(field = field, error = %e, "Graph introspection failed, using empty collection");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReviewGraph;

    impl GraphIntrospectable for ReviewGraph {
        fn nodes(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["draft".into(), "review".into(), "publish".into(), "draft".into()])
        }

        fn edges(&self) -> anyhow::Result<Vec<(String, String)>> {
            Ok(vec![("draft".into(), "review".into())])
        }

        fn conditional_edges(&self) -> anyhow::Result<Vec<ConditionalEdge>> {
            Ok(vec![ConditionalEdge::new(
                "review",
                [("approved", "publish"), ("rejected", "draft")],
            )])
        }

        fn entry_point(&self) -> anyhow::Result<Option<String>> {
            Ok(Some("draft".into()))
        }
    }

    struct BrokenGraph;

    impl GraphIntrospectable for BrokenGraph {
        fn nodes(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["only".into()])
        }

        fn edges(&self) -> anyhow::Result<Vec<(String, String)>> {
            anyhow::bail!("edge table is locked")
        }

        fn entry_point(&self) -> anyhow::Result<Option<String>> {
            anyhow::bail!("no entry attribute")
        }
    }

    #[test]
    fn test_capture_dedupes_nodes() {
        let topology = TopologyRecorder::new().capture(&ReviewGraph);
        assert_eq!(topology.nodes, vec!["draft", "review", "publish"]);
        assert_eq!(topology.entry_point.as_deref(), Some("draft"));
    }

    #[test]
    fn test_capture_degrades_on_introspection_failure() {
        let topology = TopologyRecorder::new().capture(&BrokenGraph);
        assert_eq!(topology.nodes, vec!["only"]);
        assert!(topology.edges.is_empty());
        assert!(topology.entry_point.is_none());
    }

    #[test]
    fn test_stats_terminate_on_cycles() {
        let topology = TopologyRecorder::new().capture(&ReviewGraph);
        let stats = topology.stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 1);
        assert_eq!(stats.conditional_edge_count, 1);
        assert_eq!(stats.max_depth, 2);
        assert!((stats.branching_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_adjacency_expands_fan_out() {
        let mut adjacency = HashMap::new();
        adjacency.insert(
            "router".to_string(),
            vec!["search".to_string(), "answer".to_string()],
        );
        let topology = GraphTopology::from_adjacency(&adjacency, Some("router".into()));
        assert_eq!(topology.edges.len(), 2);
        assert_eq!(topology.successors("router"), vec!["search", "answer"]);
    }

    #[test]
    fn test_to_mermaid() {
        let topology = TopologyRecorder::new().capture(&ReviewGraph);
        let mermaid = topology.to_mermaid();
        assert!(mermaid.contains("flowchart TD"));
        assert!(mermaid.contains("__start__([start]) --> draft"));
        assert!(mermaid.contains("draft --> review"));
        assert!(mermaid.contains("review -.->|approved| publish"));
    }
}
