//! Checkpoint backend contract and an in-memory reference backend.

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub const THREAD_ID_KEY: &str = "thread_id";
pub const CHECKPOINT_ID_KEY: &str = "checkpoint_id";
pub const CHECKPOINT_NS_KEY: &str = "checkpoint_ns";

/// Call configuration passed to every backend operation.
///
/// Addressing lives in the `configurable` map: `thread_id`, optional
/// `checkpoint_id` and `checkpoint_ns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnableConfig {
    #[serde(default)]
    pub configurable: Map<String, Value>,
}

impl RunnableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self::new().with_value(THREAD_ID_KEY, Value::String(thread_id.into()))
    }

    pub fn with_checkpoint_id(self, checkpoint_id: impl Into<String>) -> Self {
        self.with_value(CHECKPOINT_ID_KEY, Value::String(checkpoint_id.into()))
    }

    pub fn with_checkpoint_ns(self, checkpoint_ns: impl Into<String>) -> Self {
        self.with_value(CHECKPOINT_NS_KEY, Value::String(checkpoint_ns.into()))
    }

    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.configurable.insert(key.to_string(), value);
        self
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.string_value(THREAD_ID_KEY)
    }

    pub fn checkpoint_id(&self) -> Option<&str> {
        self.string_value(CHECKPOINT_ID_KEY)
    }

    pub fn checkpoint_ns(&self) -> Option<&str> {
        self.string_value(CHECKPOINT_NS_KEY)
    }

    fn string_value(&self, key: &str) -> Option<&str> {
        self.configurable.get(key).and_then(Value::as_str)
    }
}

/// A stored checkpoint together with the config that addresses it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTuple {
    pub config: RunnableConfig,
    pub checkpoint: Value,
    pub metadata: Value,
    pub parent_config: Option<RunnableConfig>,
}

pub type CheckpointIter = Box<dyn Iterator<Item = anyhow::Result<CheckpointTuple>> + Send>;
pub type CheckpointStream = BoxStream<'static, anyhow::Result<CheckpointTuple>>;

/// Durable checkpoint store.
///
/// The async methods default to the sync ones, so purely synchronous backends
/// only implement `put`, `get` and `list`.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Persist `checkpoint`, returning the config addressing the stored copy
    fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Value,
        metadata: &Value,
    ) -> anyhow::Result<RunnableConfig>;

    /// Latest checkpoint of the thread, or the one named by `checkpoint_id`
    fn get(&self, config: &RunnableConfig) -> anyhow::Result<Option<CheckpointTuple>>;

    /// Newest first
    fn list(&self, config: &RunnableConfig, limit: Option<usize>) -> anyhow::Result<CheckpointIter>;

    async fn aput(
        &self,
        config: &RunnableConfig,
        checkpoint: &Value,
        metadata: &Value,
    ) -> anyhow::Result<RunnableConfig> {
        self.put(config, checkpoint, metadata)
    }

    async fn aget(&self, config: &RunnableConfig) -> anyhow::Result<Option<CheckpointTuple>> {
        self.get(config)
    }

    async fn alist(
        &self,
        config: &RunnableConfig,
        limit: Option<usize>,
    ) -> anyhow::Result<CheckpointStream> {
        let items: Vec<_> = self.list(config, limit)?.collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Process-local backend keyed by thread id
#[derive(Debug, Default)]
pub struct InMemoryCheckpointSaver {
    threads: Mutex<HashMap<String, Vec<CheckpointTuple>>>,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint_count(&self, thread_id: &str) -> usize {
        self.threads.lock().get(thread_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Value,
        metadata: &Value,
    ) -> anyhow::Result<RunnableConfig> {
        let thread_id = config
            .thread_id()
            .ok_or_else(|| anyhow::anyhow!("configurable.thread_id is required to save a checkpoint"))?
            .to_string();
        let checkpoint_id = checkpoint
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut saved = RunnableConfig::for_thread(&thread_id).with_checkpoint_id(&checkpoint_id);
        if let Some(ns) = config.checkpoint_ns() {
            saved = saved.with_checkpoint_ns(ns);
        }

        let mut threads = self.threads.lock();
        let history = threads.entry(thread_id).or_default();
        let parent_config = history.last().map(|previous| previous.config.clone());
        history.push(CheckpointTuple {
            config: saved.clone(),
            checkpoint: checkpoint.clone(),
            metadata: metadata.clone(),
            parent_config,
        });
        Ok(saved)
    }

    fn get(&self, config: &RunnableConfig) -> anyhow::Result<Option<CheckpointTuple>> {
        let Some(thread_id) = config.thread_id() else {
            return Ok(None);
        };
        let threads = self.threads.lock();
        let Some(history) = threads.get(thread_id) else {
            return Ok(None);
        };
        let found = match config.checkpoint_id() {
            Some(id) => history.iter().find(|t| t.config.checkpoint_id() == Some(id)),
            None => history.last(),
        };
        Ok(found.cloned())
    }

    fn list(&self, config: &RunnableConfig, limit: Option<usize>) -> anyhow::Result<CheckpointIter> {
        let threads = self.threads.lock();
        let mut items: Vec<CheckpointTuple> = match config.thread_id() {
            Some(thread_id) => threads
                .get(thread_id)
                .map(|history| history.iter().rev().cloned().collect())
                .unwrap_or_default(),
            None => threads
                .values()
                .flat_map(|history| history.iter().rev().cloned())
                .collect(),
        };
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(Box::new(items.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn test_put_then_get_latest_and_by_id() {
        let saver = InMemoryCheckpointSaver::new();
        let config = RunnableConfig::for_thread("t1");
        let first = saver.put(&config, &json!({"id": "c1", "v": 1}), &json!({})).unwrap();
        saver.put(&config, &json!({"id": "c2", "v": 2}), &json!({})).unwrap();

        assert_eq!(first.checkpoint_id(), Some("c1"));
        let latest = saver.get(&config).unwrap().unwrap();
        assert_eq!(latest.checkpoint["v"], 2);
        assert_eq!(latest.parent_config.unwrap().checkpoint_id(), Some("c1"));

        let by_id = saver.get(&config.clone().with_checkpoint_id("c1")).unwrap().unwrap();
        assert_eq!(by_id.checkpoint["v"], 1);
    }

    #[test]
    fn test_put_requires_thread_id() {
        let saver = InMemoryCheckpointSaver::new();
        assert!(saver.put(&RunnableConfig::new(), &json!({}), &json!({})).is_err());
    }

    #[test]
    fn test_get_unknown_thread_is_none() {
        let saver = InMemoryCheckpointSaver::new();
        assert!(saver.get(&RunnableConfig::for_thread("nope")).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let saver = InMemoryCheckpointSaver::new();
        let config = RunnableConfig::for_thread("t1");
        for i in 0..5 {
            saver.put(&config, &json!({"v": i}), &json!({})).unwrap();
        }
        let values: Vec<i64> = saver
            .list(&config, Some(3))
            .unwrap()
            .map(|t| t.unwrap().checkpoint["v"].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_default_async_methods_delegate() {
        let saver = InMemoryCheckpointSaver::new();
        let config = RunnableConfig::for_thread("t1");
        saver.aput(&config, &json!({"v": 1}), &json!({})).await.unwrap();
        assert!(saver.aget(&config).await.unwrap().is_some());
        let listed: Vec<_> = saver.alist(&config, None).await.unwrap().collect().await;
        assert_eq!(listed.len(), 1);
    }
}
