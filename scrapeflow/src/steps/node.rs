//! The declared step tree.

use super::{ExecutionGuard, StepKind};
use crate::filters::{Filter, FilterPipeline};
use crate::models::Collector;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Where a step was declared, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclarationSite {
    file: &'static str,
    line: u32,
    column: u32,
}

impl DeclarationSite {
    /// Captures the caller's location.
    #[track_caller]
    #[must_use]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }

    /// The source file.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// The source line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for DeclarationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One declared operation and the steps that follow it.
///
/// Steps are assembled bottom-up. Every attach operation stores a deep copy
/// of the attached step, so a step value can serve as a template for any
/// number of parents.
pub struct StepNode {
    kind: StepKind,
    name: String,
    next: Vec<Arc<StepNode>>,
    exclusive: bool,
    guard: Option<ExecutionGuard>,
    filters: FilterPipeline,
    collectors: Vec<Collector>,
    declared_at: DeclarationSite,
}

impl StepNode {
    /// Creates a step of the given kind, recording the caller as its
    /// declaration site.
    #[track_caller]
    #[must_use]
    pub fn new(kind: StepKind) -> Self {
        Self {
            name: kind.label(),
            kind,
            next: Vec::new(),
            exclusive: false,
            guard: None,
            filters: FilterPipeline::new(),
            collectors: Vec::new(),
            declared_at: DeclarationSite::caller(),
        }
    }

    /// Renames the step.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches a copy of `step` as a next step.
    #[must_use]
    pub fn next(mut self, step: &Self) -> Self {
        self.next.push(Arc::new(step.clone()));
        self
    }

    /// Attaches a copy of `step` that runs only after every earlier sibling
    /// has finished.
    #[must_use]
    pub fn next_exclusively(mut self, step: &Self) -> Self {
        let mut copy = step.clone();
        copy.exclusive = true;
        self.next.push(Arc::new(copy));
        self
    }

    /// Attaches a copy of `step` that runs only when `guard` passes.
    #[must_use]
    pub fn next_if(mut self, guard: ExecutionGuard, step: &Self) -> Self {
        let mut copy = step.clone();
        copy.guard = Some(guard);
        self.next.push(Arc::new(copy));
        self
    }

    /// Appends a filter over the nodes this step finds.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Appends a collector.
    #[must_use]
    pub fn collect(mut self, collector: impl Into<Collector>) -> Self {
        self.collectors.push(collector.into());
        self
    }

    /// The operation.
    #[must_use]
    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    /// The diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The steps run for every node this step produces.
    #[must_use]
    pub fn next_steps(&self) -> &[Arc<StepNode>] {
        &self.next
    }

    /// Whether this step waits for its earlier siblings.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// The execution guard, if any.
    #[must_use]
    pub fn guard(&self) -> Option<&ExecutionGuard> {
        self.guard.as_ref()
    }

    /// The filters.
    #[must_use]
    pub fn filters(&self) -> &FilterPipeline {
        &self.filters
    }

    /// The collectors, in declaration order.
    #[must_use]
    pub fn collectors(&self) -> &[Collector] {
        &self.collectors
    }

    /// Where the step was declared.
    #[must_use]
    pub fn declared_at(&self) -> DeclarationSite {
        self.declared_at
    }
}

impl Clone for StepNode {
    /// Deep copy. Next steps are copied into fresh allocations and pagination
    /// links start unbound.
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            name: self.name.clone(),
            next: self
                .next
                .iter()
                .map(|step| Arc::new(Self::clone(step)))
                .collect(),
            exclusive: self.exclusive,
            guard: self.guard.clone(),
            filters: self.filters.clone(),
            collectors: self.collectors.clone(),
            declared_at: self.declared_at,
        }
    }
}

impl fmt::Debug for StepNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepNode")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("exclusive", &self.exclusive)
            .field("guard", &self.guard)
            .field("filters", &self.filters)
            .field("collectors", &self.collectors)
            .field("next", &self.next)
            .field("declared_at", &self.declared_at.to_string())
            .finish()
    }
}
