//! # Tracer Configuration
//!
//! Options recognized by the tracing engine. Values come from code
//! (`TracerConfig::default()` plus struct update syntax), from `GRAPH_TRACE_*`
//! environment variables, or from a layered file + environment load through the
//! `config` crate.
//!
//! ```rust,no_run
//! use graph_trace_core::config::TracerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TracerConfig::load("config/graph-trace.toml")?;
//! assert!(config.max_state_history > 0);
//! # Ok(())
//! # }
//! ```

use crate::constants::system;
use crate::error::{Result, TracerError};
use crate::trackers::cost::ModelPricing;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Estimate state snapshot footprint in the state transition tracker
    pub enable_memory_tracking: bool,
    /// Ring-buffer bound for state transitions
    pub max_state_history: usize,
    /// Bound for interrupt/resume/decision/checkpoint/agent/run histories.
    /// `None` keeps them unbounded.
    pub max_event_history: Option<usize>,
    /// Cap for serialized snapshots written onto records
    pub max_serialized_length: usize,
    /// Cap for agent message content previews
    pub content_preview_length: usize,
    /// Capture a state snapshot on interrupt records
    pub capture_state_snapshots: bool,
    /// Per-model token pricing, keyed by model name
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enable_memory_tracking: true,
            max_state_history: system::DEFAULT_MAX_STATE_HISTORY,
            max_event_history: Some(system::DEFAULT_MAX_EVENT_HISTORY),
            max_serialized_length: system::DEFAULT_MAX_SERIALIZED_LENGTH,
            content_preview_length: system::DEFAULT_CONTENT_PREVIEW_LENGTH,
            capture_state_snapshots: true,
            pricing: HashMap::new(),
        }
    }
}

impl TracerConfig {
    /// Defaults overridden by `GRAPH_TRACE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("GRAPH_TRACE_ENABLE_MEMORY_TRACKING") {
            config.enable_memory_tracking = value.parse().map_err(|e| {
                TracerError::Configuration(format!("Invalid enable_memory_tracking: {e}"))
            })?;
        }

        if let Ok(value) = std::env::var("GRAPH_TRACE_MAX_STATE_HISTORY") {
            config.max_state_history = value.parse().map_err(|e| {
                TracerError::Configuration(format!("Invalid max_state_history: {e}"))
            })?;
        }

        if let Ok(value) = std::env::var("GRAPH_TRACE_MAX_EVENT_HISTORY") {
            config.max_event_history = match value.as_str() {
                "" | "none" | "unbounded" => None,
                other => Some(other.parse().map_err(|e| {
                    TracerError::Configuration(format!("Invalid max_event_history: {e}"))
                })?),
            };
        }

        if let Ok(value) = std::env::var("GRAPH_TRACE_MAX_SERIALIZED_LENGTH") {
            config.max_serialized_length = value.parse().map_err(|e| {
                TracerError::Configuration(format!("Invalid max_serialized_length: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Layered load: defaults, then `path` (TOML/YAML/JSON by extension, optional),
    /// then `GRAPH_TRACE_` environment variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading tracer configuration");

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(system::ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the trackers cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.max_state_history == 0 {
            return Err(TracerError::Configuration(
                "max_state_history must be greater than zero".to_string(),
            ));
        }
        if self.max_event_history == Some(0) {
            return Err(TracerError::Configuration(
                "max_event_history must be greater than zero when set".to_string(),
            ));
        }
        if self.max_serialized_length < system::MIN_SERIALIZED_LENGTH {
            return Err(TracerError::Configuration(format!(
                "max_serialized_length must be at least {}",
                system::MIN_SERIALIZED_LENGTH
            )));
        }
        for (model, pricing) in &self.pricing {
            if !pricing.is_valid() {
                return Err(TracerError::Configuration(format!(
                    "Pricing for model '{model}' must be finite and non-negative"
                )));
            }
        }
        Ok(())
    }
}
