//! Token usage carried by node outputs.
//!
//! Chat model messages report usage as
//! `{"usage_metadata": {"input_tokens", "output_tokens", ...}}`, with the model
//! name either inside the usage block or under `response_metadata.model_name`.
//! A node update may carry such a block at the top level or inside any message
//! list it returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const UNKNOWN_MODEL: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

/// Every usage block found in a node update
pub fn extract_usage(update: &Value) -> Vec<UsageMetadata> {
    let mut found = Vec::new();
    let Value::Object(fields) = update else {
        return found;
    };

    if let Some(usage) = parse_message(update) {
        found.push(usage);
    }
    for value in fields.values() {
        match value {
            Value::Array(items) => found.extend(items.iter().filter_map(parse_message)),
            Value::Object(_) => found.extend(parse_message(value)),
            _ => {}
        }
    }
    found
}

fn parse_message(message: &Value) -> Option<UsageMetadata> {
    let usage = message.get("usage_metadata")?.as_object()?;
    let tokens = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);

    let model = usage
        .get("model")
        .and_then(Value::as_str)
        .or_else(|| {
            message
                .get("response_metadata")
                .and_then(|meta| meta.get("model_name").or_else(|| meta.get("model")))
                .and_then(Value::as_str)
        })
        .unwrap_or(UNKNOWN_MODEL)
        .to_string();

    let cached_tokens = usage
        .get("cached_tokens")
        .and_then(Value::as_u64)
        .or_else(|| {
            usage
                .get("input_token_details")
                .and_then(|details| details.get("cache_read"))
                .and_then(Value::as_u64)
        })
        .unwrap_or(0);

    Some(UsageMetadata {
        model,
        input_tokens: tokens("input_tokens"),
        output_tokens: tokens("output_tokens"),
        cached_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_usage() {
        let usage = extract_usage(&json!({
            "usage_metadata": {"model": "gpt-4o", "input_tokens": 120, "output_tokens": 30, "cached_tokens": 100}
        }));
        assert_eq!(
            usage,
            vec![UsageMetadata {
                model: "gpt-4o".to_string(),
                input_tokens: 120,
                output_tokens: 30,
                cached_tokens: 100,
            }]
        );
    }

    #[test]
    fn test_usage_inside_messages() {
        let usage = extract_usage(&json!({
            "messages": [
                {"type": "human", "content": "hi"},
                {
                    "type": "ai",
                    "content": "hello",
                    "response_metadata": {"model_name": "claude-sonnet"},
                    "usage_metadata": {
                        "input_tokens": 10,
                        "output_tokens": 5,
                        "input_token_details": {"cache_read": 4}
                    }
                }
            ]
        }));
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].model, "claude-sonnet");
        assert_eq!(usage[0].cached_tokens, 4);
    }

    #[test]
    fn test_no_usage() {
        assert!(extract_usage(&json!({"plan": "x"})).is_empty());
        assert!(extract_usage(&json!("plain")).is_empty());
    }
}
