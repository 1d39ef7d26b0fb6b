//! # Per-Run Trackers
//!
//! Bookkeeping driven by node execution inside one graph run. Each tracker owns
//! its history behind a single `parking_lot::Mutex` so the history and any
//! derived indexes change together; none of them hold a lock while calling
//! back into host code.
//!
//! - [`state_transition`] - before/after state snapshots and footprint
//! - [`reducer`] - which named reducer owns a changed state field
//! - [`superstep`] - synchronous execution rounds
//! - [`cost`] - token usage to monetary cost

pub mod cost;
pub mod reducer;
pub mod state_transition;
pub mod superstep;

pub use cost::{CostAccumulator, CostStats, CostTotals, ModelPricing, NodeCost, PricingTable};
pub use reducer::{ReducerAttribution, ReducerAttributor, ReducerStats};
pub use state_transition::{MemoryStats, StateTransition, StateTransitionTracker};
pub use superstep::{Superstep, SuperstepError, SuperstepStats, SuperstepTracker};
