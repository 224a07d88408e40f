//! Thread-safe generation of sibling orders.

use super::StepOrder;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Generates child orders with strictly increasing sibling indices.
///
/// One atomic counter is kept per parent path. Concurrent callers asking for
/// children of the same parent never receive the same index.
#[derive(Debug, Default)]
pub struct StepOrderGenerator {
    counters: DashMap<StepOrder, AtomicU32>,
}

impl StepOrderGenerator {
    /// Creates a new generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next child order of `parent`.
    pub fn gen_next(&self, parent: &StepOrder) -> StepOrder {
        let next = {
            let counter = self
                .counters
                .entry(parent.clone())
                .or_insert_with(|| AtomicU32::new(0));
            counter.fetch_add(1, Ordering::SeqCst) + 1
        };
        parent.child(next)
    }

    /// Returns the number of parents that have spawned children so far.
    #[must_use]
    pub fn parent_count(&self) -> usize {
        self.counters.len()
    }
}
