//! Step ordering.
//!
//! This module provides:
//! - `StepOrder`, the comparable path identifying a unit of work
//! - `StepOrderGenerator`, the concurrent sibling counter

mod generator;
mod step_order;

pub use generator::StepOrderGenerator;
pub use step_order::StepOrder;
