//! Conditional execution of a step.

use crate::models::{ContextModels, ModelHandle};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

type Predicate = dyn Fn(&ModelHandle) -> bool + Send + Sync;

/// Outcome of checking a guard against the model stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The step runs.
    Pass,
    /// The predicate rejected the model.
    Reject,
    /// No model of the guarded type is in scope.
    MissingModel,
}

/// A predicate over the innermost model of one type.
#[derive(Clone)]
pub struct ExecutionGuard {
    model: TypeId,
    model_name: &'static str,
    predicate: Arc<Predicate>,
}

impl ExecutionGuard {
    /// Runs the step only when `predicate` holds for the innermost `T`.
    pub fn new<T, F>(predicate: F) -> Self
    where
        T: 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            model: TypeId::of::<T>(),
            model_name: std::any::type_name::<T>(),
            predicate: Arc::new(move |handle| handle.with(|model: &T| predicate(model)).unwrap_or(false)),
        }
    }

    /// The guarded model type name.
    #[must_use]
    pub fn model_name(&self) -> &'static str {
        self.model_name
    }

    /// Checks the guard.
    #[must_use]
    pub fn check(&self, models: &ContextModels) -> GuardOutcome {
        match models.find(self.model) {
            None => GuardOutcome::MissingModel,
            Some(handle) if (self.predicate)(handle) => GuardOutcome::Pass,
            Some(_) => GuardOutcome::Reject,
        }
    }
}

impl fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("model", &self.model_name)
            .finish()
    }
}
