//! Step execution.
//!
//! This module provides:
//! - The task scheduler with exclusivity, throttling and bounded concurrency
//! - Subtree completion tracking
//! - Failure collection
//! - Per-kind step dispatch, collector processing and pagination

mod context;
mod engine;
mod failures;
mod helper;
mod pagination;
mod scheduler;
mod throttle;
mod tracker;

pub use context::{PaginationFrame, RunContext, StepContext, StepInput};
pub use failures::{FailureCollector, FailureRecord, FailureSummary};
pub use scheduler::{TaskScheduler, UnitOfWork, UnitState};
pub use throttle::{IntervalThrottle, NoThrottle, Throttle};
pub use tracker::{SiblingRegistry, Subtree, SubtreeGuard};

pub(crate) use engine::schedule_step;
