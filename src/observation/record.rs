use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of tracked operation a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Graph,
    Node,
    Checkpoint,
    Interrupt,
    Resume,
    HumanDecision,
    AgentMessage,
    SupervisorDecision,
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Node => write!(f, "node"),
            Self::Checkpoint => write!(f, "checkpoint"),
            Self::Interrupt => write!(f, "interrupt"),
            Self::Resume => write!(f, "resume"),
            Self::HumanDecision => write!(f, "human_decision"),
            Self::AgentMessage => write!(f, "agent_message"),
            Self::SupervisorDecision => write!(f, "supervisor_decision"),
        }
    }
}

impl std::str::FromStr for ObservationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "graph" => Ok(Self::Graph),
            "node" => Ok(Self::Node),
            "checkpoint" => Ok(Self::Checkpoint),
            "interrupt" => Ok(Self::Interrupt),
            "resume" => Ok(Self::Resume),
            "human_decision" => Ok(Self::HumanDecision),
            "agent_message" => Ok(Self::AgentMessage),
            "supervisor_decision" => Ok(Self::SupervisorDecision),
            _ => Err(format!("Invalid observation kind: {s}")),
        }
    }
}

/// Outcome status. Intentional interrupts are `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    #[default]
    Success,
    Error,
}

impl ObservationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One structured record emitted per tracked operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub kind: ObservationKind,
    pub name: String,
    pub status: ObservationStatus,
    pub status_message: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Open-ended fields that do not fit the scalar attribute model
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ObservationRecord {
    pub fn new(kind: ObservationKind, name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            name: name.into(),
            status: ObservationStatus::Success,
            status_message: None,
            trace_id: None,
            span_id: None,
            attributes: BTreeMap::new(),
            metadata: Map::new(),
            timestamp,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Set the attribute only when `value` is present
    pub fn with_optional_attribute<V: Into<AttributeValue>>(
        mut self,
        key: &str,
        value: Option<V>,
    ) -> Self {
        if let Some(value) = value {
            self.attributes.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.status = ObservationStatus::Error;
        self.status_message = Some(message.into());
        self
    }

    pub fn with_trace_context(mut self, trace_id: Option<String>, span_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self.span_id = span_id;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_conversion() {
        assert_eq!(ObservationKind::HumanDecision.to_string(), "human_decision");
        assert_eq!(
            "supervisor_decision".parse::<ObservationKind>().unwrap(),
            ObservationKind::SupervisorDecision
        );
        assert!("bogus".parse::<ObservationKind>().is_err());
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&ObservationKind::AgentMessage).unwrap();
        assert_eq!(json, "\"agent_message\"");
    }

    #[test]
    fn test_record_builder() {
        let record = ObservationRecord::new(ObservationKind::Checkpoint, "checkpoint.save", Utc::now())
            .with_attribute("size", 42usize)
            .with_optional_attribute::<String>("missing", None)
            .with_error("disk full");

        assert_eq!(record.status, ObservationStatus::Error);
        assert_eq!(record.status_message.as_deref(), Some("disk full"));
        assert_eq!(record.attribute("size").and_then(AttributeValue::as_i64), Some(42));
        assert!(record.attribute("missing").is_none());
    }
}
