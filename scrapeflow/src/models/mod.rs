//! Target models and the collectors that fill them.
//!
//! Every branch of a run carries a [`ContextModels`] stack. Steps push fresh
//! models through [`ModelCollector`]s and write parsed values into enclosing
//! models through [`ValueCollector`]s.

mod collector;
mod stack;

pub use collector::{
    Applied, Cardinality, Collector, CollectorId, ModelAccumulator, ModelCollector, ValueCollector,
};
pub use stack::{ContextModels, ModelHandle};
