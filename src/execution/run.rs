use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the graph was driven for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Invoke,
    Stream,
    #[serde(rename = "ainvoke")]
    AInvoke,
    #[serde(rename = "astream")]
    AStream,
}

impl ExecutionMode {
    pub fn is_async(&self) -> bool {
        matches!(self, Self::AInvoke | Self::AStream)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Stream | Self::AStream)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoke => write!(f, "invoke"),
            Self::Stream => write!(f, "stream"),
            Self::AInvoke => write!(f, "ainvoke"),
            Self::AStream => write!(f, "astream"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoke" => Ok(Self::Invoke),
            "stream" => Ok(Self::Stream),
            "ainvoke" => Ok(Self::AInvoke),
            "astream" => Ok(Self::AStream),
            _ => Err(format!("Invalid execution mode: {s}")),
        }
    }
}

/// One invoke/stream call, closed at exit, on error, or when its future or
/// stream is dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub run_id: String,
    pub mode: ExecutionMode,
    pub thread_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub input: String,
    pub output: Option<String>,
    pub duration_ms: Option<f64>,
    pub success: bool,
    pub error_type: Option<String>,
    pub error: Option<String>,
    /// Streaming modes only
    pub chunk_count: Option<usize>,
    pub supersteps: usize,
    pub nodes_executed: usize,
    pub state_transitions: u64,
    pub total_cost: f64,
    pub total_tokens: u64,
}

/// Per-node timing accumulated over the engine's lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub executions: u64,
    pub errors: u64,
    pub total_duration_ms: f64,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub last_superstep: Option<u64>,
}

impl NodeStats {
    pub fn avg_duration_ms(&self) -> Option<f64> {
        (self.executions > 0).then(|| self.total_duration_ms / self.executions as f64)
    }

    pub(crate) fn record(&mut self, duration_ms: f64, success: bool, superstep: Option<u64>) {
        self.executions += 1;
        if !success {
            self.errors += 1;
        }
        self.total_duration_ms += duration_ms;
        self.min_duration_ms = Some(self.min_duration_ms.map_or(duration_ms, |m| m.min(duration_ms)));
        self.max_duration_ms = Some(self.max_duration_ms.map_or(duration_ms, |m| m.max(duration_ms)));
        if superstep.is_some() {
            self.last_superstep = superstep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_string_conversion() {
        assert_eq!(ExecutionMode::AStream.to_string(), "astream");
        assert_eq!("ainvoke".parse::<ExecutionMode>().unwrap(), ExecutionMode::AInvoke);
        assert!("batch".parse::<ExecutionMode>().is_err());
        assert_eq!(
            serde_json::to_string(&ExecutionMode::AInvoke).unwrap(),
            "\"ainvoke\""
        );
    }

    #[test]
    fn test_node_stats_accumulate() {
        let mut stats = NodeStats::default();
        assert!(stats.avg_duration_ms().is_none());
        stats.record(10.0, true, Some(1));
        stats.record(30.0, false, Some(2));
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.avg_duration_ms(), Some(20.0));
        assert_eq!(stats.min_duration_ms, Some(10.0));
        assert_eq!(stats.max_duration_ms, Some(30.0));
        assert_eq!(stats.last_superstep, Some(2));
    }
}
