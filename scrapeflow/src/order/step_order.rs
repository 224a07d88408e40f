//! Hierarchical identifier for a scheduled unit of work.

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// An ordered path of sibling indices, one per tree level.
///
/// Orders compare lexicographically, so a parent sorts before all of its
/// descendants and the descendants of an earlier sibling sort before a later
/// sibling. This comparison is the only ordering authority at the publishing
/// boundary.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepOrder {
    path: Arc<[u32]>,
}

impl StepOrder {
    /// The distinguished root order every run starts from.
    #[must_use]
    pub fn initial() -> Self {
        Self::from_path(vec![0])
    }

    /// Builds an order from an explicit path.
    #[must_use]
    pub fn from_path(path: impl Into<Vec<u32>>) -> Self {
        Self {
            path: path.into().into(),
        }
    }

    /// Returns the path components.
    #[must_use]
    pub fn path(&self) -> &[u32] {
        &self.path
    }

    /// Returns the number of levels in the path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Returns the last sibling index.
    #[must_use]
    pub fn last(&self) -> Option<u32> {
        self.path.last().copied()
    }

    /// Returns the order one level up, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Self::from_path(&self.path[..self.path.len() - 1]))
    }

    /// Returns the child order with the given sibling index.
    #[must_use]
    pub fn child(&self, index: u32) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend_from_slice(&self.path);
        path.push(index);
        Self::from_path(path)
    }

    /// Returns true if `other` strictly extends this order's path.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.path.len() > self.path.len() && other.path.starts_with(&self.path)
    }

    /// Returns true if `other` extends this order's path by exactly one level.
    #[must_use]
    pub fn is_parent_of(&self, other: &Self) -> bool {
        other.path.len() == self.path.len() + 1 && other.path.starts_with(&self.path)
    }
}

impl From<&[u32]> for StepOrder {
    fn from(path: &[u32]) -> Self {
        Self::from_path(path)
    }
}

impl fmt::Display for StepOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for index in self.path.iter() {
            if !first {
                f.write_str("-")?;
            }
            write!(f, "{index}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for StepOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepOrder({self})")
    }
}

impl Serialize for StepOrder {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.path.serialize(serializer)
    }
}
