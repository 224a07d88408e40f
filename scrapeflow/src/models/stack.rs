//! Per-branch stack of target models.

use super::CollectorId;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

type SnapshotFn = fn(&(dyn Any + Send)) -> Option<Box<dyn Any + Send>>;

fn snapshot_of<T: Clone + Send + 'static>(value: &(dyn Any + Send)) -> Option<Box<dyn Any + Send>> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as Box<dyn Any + Send>)
}

/// A shared, type-erased model instance.
///
/// Descendant steps write into the same instance; the stack that refers to it
/// is what gets copied at every fan-out.
#[derive(Clone)]
pub struct ModelHandle {
    cell: Arc<ModelCell>,
}

struct ModelCell {
    id: u64,
    type_id: TypeId,
    type_name: &'static str,
    value: Mutex<Box<dyn Any + Send>>,
    applied: Mutex<HashSet<CollectorId>>,
    snapshot: SnapshotFn,
}

impl ModelHandle {
    /// Wraps a model value.
    pub fn new<T: Clone + Send + 'static>(value: T) -> Self {
        Self {
            cell: Arc::new(ModelCell {
                id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                value: Mutex::new(Box::new(value)),
                applied: Mutex::new(HashSet::new()),
                snapshot: snapshot_of::<T>,
            }),
        }
    }

    /// A process-unique id, for diagnostics.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.cell.id
    }

    /// The model's type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.cell.type_id
    }

    /// The model's type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.cell.type_name
    }

    /// Returns true if the model is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.cell.type_id == TypeId::of::<T>()
    }

    /// Reads the model as a `T`.
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.cell.value.lock();
        guard.downcast_ref::<T>().map(f)
    }

    /// Mutates the model as a `T`.
    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.cell.value.lock();
        guard.downcast_mut::<T>().map(f)
    }

    pub(crate) fn with_any_mut<R>(&self, f: impl FnOnce(&mut (dyn Any + Send)) -> R) -> R {
        let mut guard = self.cell.value.lock();
        f(guard.as_mut())
    }

    /// Clones the current value out of the handle.
    #[must_use]
    pub fn snapshot(&self) -> Box<dyn Any + Send> {
        let guard = self.cell.value.lock();
        // The snapshot function was monomorphized for the stored type.
        (self.cell.snapshot)(guard.as_ref()).unwrap_or_else(|| Box::new(()))
    }

    /// Returns true if `collector` already wrote into this model.
    #[must_use]
    pub fn is_applied(&self, collector: CollectorId) -> bool {
        self.cell.applied.lock().contains(&collector)
    }

    /// Records that `collector` wrote into this model.
    ///
    /// Returns false if it had already been recorded.
    pub fn mark_applied(&self, collector: CollectorId) -> bool {
        self.cell.applied.lock().insert(collector)
    }

    /// Returns true if both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.cell.id)
            .field("type", &self.cell.type_name)
            .finish()
    }
}

/// The models in scope for a branch of the execution tree, innermost last.
#[derive(Debug, Clone, Default)]
pub struct ContextModels {
    entries: Vec<ModelHandle>,
}

impl ContextModels {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a model.
    pub fn push(&mut self, model: ModelHandle) {
        self.entries.push(model);
    }

    /// Returns the innermost model with the given type.
    #[must_use]
    pub fn find(&self, type_id: TypeId) -> Option<&ModelHandle> {
        self.entries
            .iter()
            .rev()
            .find(|m| ModelHandle::type_id(m) == type_id)
    }

    /// Returns the innermost `T`.
    #[must_use]
    pub fn get<T: 'static>(&self) -> Option<&ModelHandle> {
        self.find(TypeId::of::<T>())
    }

    /// Returns the innermost model.
    #[must_use]
    pub fn top(&self) -> Option<&ModelHandle> {
        self.entries.last()
    }

    /// Returns the number of models in scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no models are in scope.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates from outermost to innermost.
    pub fn iter(&self) -> impl Iterator<Item = &ModelHandle> {
        self.entries.iter()
    }
}
