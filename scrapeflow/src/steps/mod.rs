//! Declared step trees.
//!
//! A [`StepNode`] is one operation ([`StepKind`]) plus the composition of
//! its capabilities: filters, collectors, an optional guard, and next steps.
//! Trees are built bottom-up with the functions in [`builders`].

pub mod builders;
mod guard;
mod kind;
mod node;

pub use guard::{ExecutionGuard, GuardOutcome};
pub use kind::{PageLink, Pagination, Parser, StepKind};
pub use node::{DeclarationSite, StepNode};
