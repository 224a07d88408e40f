//! Subtree completion tracking.
//!
//! Every unit of work owns a [`Subtree`]. A subtree is finished once the unit
//! itself, every unit submitted beneath it, and every hold taken on it have
//! been released. Exclusivity, the publish barrier and run completion all
//! wait on subtrees.

use crate::order::StepOrder;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A wait-group over one unit of work and everything below it.
pub struct Subtree {
    order: StepOrder,
    pending: AtomicUsize,
    done: watch::Sender<bool>,
    parent: Option<Arc<Subtree>>,
}

impl Subtree {
    fn create(order: StepOrder, parent: Option<Arc<Self>>) -> (Arc<Self>, SubtreeGuard) {
        let (done, _) = watch::channel(false);
        let subtree = Arc::new(Self {
            order,
            pending: AtomicUsize::new(1),
            done,
            parent,
        });
        let guard = SubtreeGuard {
            subtree: Arc::clone(&subtree),
        };
        (subtree, guard)
    }

    /// Creates a top-level subtree held by the returned guard.
    #[must_use]
    pub fn root(order: StepOrder) -> (Arc<Self>, SubtreeGuard) {
        Self::create(order, None)
    }

    /// Creates a subtree nested in this one.
    ///
    /// This subtree stays unfinished until the child is.
    #[must_use]
    pub fn child(self: &Arc<Self>, order: StepOrder) -> (Arc<Self>, SubtreeGuard) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        Self::create(order, Some(Arc::clone(self)))
    }

    /// Keeps this subtree unfinished until the returned guard is dropped.
    ///
    /// Must be called while another hold is still alive.
    #[must_use]
    pub fn hold(self: &Arc<Self>) -> SubtreeGuard {
        self.pending.fetch_add(1, Ordering::AcqRel);
        SubtreeGuard {
            subtree: Arc::clone(self),
        }
    }

    /// The order of the unit owning this subtree.
    #[must_use]
    pub fn order(&self) -> &StepOrder {
        &self.order
    }

    /// Returns true once every hold has been released.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Waits until the subtree is finished.
    pub async fn wait(&self) {
        let mut done = self.done.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = done.wait_for(|finished| *finished).await;
    }

    fn release(&self) {
        let mut current = Some(self);
        while let Some(subtree) = current {
            if subtree.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
                break;
            }
            subtree.done.send_replace(true);
            current = subtree.parent.as_deref();
        }
    }
}

impl fmt::Debug for Subtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtree")
            .field("order", &self.order)
            .field("pending", &self.pending.load(Ordering::Acquire))
            .field("done", &self.is_done())
            .finish()
    }
}

/// One hold on a [`Subtree`], released on drop.
#[derive(Debug)]
pub struct SubtreeGuard {
    subtree: Arc<Subtree>,
}

impl SubtreeGuard {
    /// The held subtree.
    #[must_use]
    pub fn subtree(&self) -> &Arc<Subtree> {
        &self.subtree
    }
}

impl Drop for SubtreeGuard {
    fn drop(&mut self) {
        self.subtree.release();
    }
}

/// Submitted subtrees grouped by parent order, in submission order.
#[derive(Debug, Default)]
pub struct SiblingRegistry {
    siblings: DashMap<StepOrder, Vec<Arc<Subtree>>>,
}

impl SiblingRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subtree` under `parent`.
    ///
    /// Returns the unfinished siblings registered before it when `exclusive`
    /// is set, and nothing otherwise.
    pub fn register(
        &self,
        parent: &StepOrder,
        subtree: Arc<Subtree>,
        exclusive: bool,
    ) -> Vec<Arc<Subtree>> {
        let mut entry = self.siblings.entry(parent.clone()).or_default();
        entry.retain(|sibling| !sibling.is_done());
        let predecessors = if exclusive { entry.to_vec() } else { Vec::new() };
        entry.push(subtree);
        predecessors
    }

    /// Returns the number of parents with registered children.
    #[must_use]
    pub fn parent_count(&self) -> usize {
        self.siblings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn order(path: &[u32]) -> StepOrder {
        StepOrder::from_path(path.to_vec())
    }

    #[test]
    fn test_subtree_finishes_after_children() {
        let (root, root_guard) = Subtree::root(order(&[0]));
        let (child, child_guard) = root.child(order(&[0, 1]));
        let (grandchild, grandchild_guard) = child.child(order(&[0, 1, 1]));

        drop(root_guard);
        drop(child_guard);
        assert!(!root.is_done());
        assert!(!child.is_done());

        drop(grandchild_guard);
        assert!(grandchild.is_done());
        assert!(child.is_done());
        assert!(root.is_done());
    }

    #[test]
    fn test_hold_delays_completion() {
        let (root, guard) = Subtree::root(order(&[0]));
        let hold = root.hold();
        drop(guard);
        assert!(!root.is_done());
        assert_eq!(hold.subtree().order(), &order(&[0]));
        drop(hold);
        assert!(root.is_done());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_completion() {
        let (root, guard) = Subtree::root(order(&[0]));
        let waiter = {
            let root = Arc::clone(&root);
            tokio::spawn(async move { root.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Waiting on a finished subtree returns immediately.
        root.wait().await;
    }

    #[test]
    fn test_registry_returns_predecessors_for_exclusive_only() {
        let registry = SiblingRegistry::new();
        let parent = order(&[0]);
        let (root, _guard) = Subtree::root(parent.clone());

        let (a, _a) = root.child(order(&[0, 1]));
        let (b, b_guard) = root.child(order(&[0, 2]));
        let (c, _c) = root.child(order(&[0, 3]));
        let (d, _d) = root.child(order(&[0, 4]));

        assert!(registry.register(&parent, a, true).is_empty());
        assert!(registry.register(&parent, b, false).is_empty());
        drop(b_guard);

        let before_c = registry.register(&parent, c, true);
        let orders: Vec<_> = before_c.iter().map(|s| s.order().clone()).collect();
        // The finished sibling is pruned.
        assert_eq!(orders, vec![order(&[0, 1])]);

        assert!(registry.register(&parent, d, false).is_empty());
        assert_eq!(registry.parent_count(), 1);
    }
}
