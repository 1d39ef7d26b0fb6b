//! Shared fixtures for integration tests

#![allow(dead_code)]

use graph_trace_core::{ConditionalEdge, GraphIntrospectable};

/// Plan/execute/review graph with a conditional loop back to planning
#[derive(Debug, Clone, Default)]
pub struct ReviewGraph;

impl GraphIntrospectable for ReviewGraph {
    fn nodes(&self) -> anyhow::Result<Vec<String>> {
        Ok(["plan", "execute", "review"].map(String::from).to_vec())
    }

    fn edges(&self) -> anyhow::Result<Vec<(String, String)>> {
        Ok(vec![("plan".to_string(), "execute".to_string())])
    }

    fn conditional_edges(&self) -> anyhow::Result<Vec<ConditionalEdge>> {
        Ok(vec![ConditionalEdge::new(
            "execute",
            [("retry", "plan"), ("done", "review")],
        )])
    }

    fn entry_point(&self) -> anyhow::Result<Option<String>> {
        Ok(Some("plan".to_string()))
    }
}

/// Graph whose adapter cannot report edges
#[derive(Debug, Clone, Default)]
pub struct BrokenGraph;

impl GraphIntrospectable for BrokenGraph {
    fn nodes(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["only".to_string()])
    }

    fn edges(&self) -> anyhow::Result<Vec<(String, String)>> {
        anyhow::bail!("edges are private in this graph version")
    }
}
